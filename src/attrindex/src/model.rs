// Copyright 2023 Greptime Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory model of the trace rows stored in a block's data file.

use std::cmp::Ordering;
use std::hash::Hasher;
use std::str::FromStr;

use fnv::FnvHasher;

use crate::error::{Error, UnknownScopeSnafu};

/// Number of dedicated string columns per scope.
pub const MAX_DEDICATED_COLUMNS: usize = 10;

/// The nesting location an attribute is attached to. Tags are the on-disk
/// representation and define the scope sort order inside the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i64)]
pub enum ScopeTag {
    Resource = 1,
    Span = 2,
    Event = 3,
    Link = 4,
    Instrumentation = 5,
}

impl ScopeTag {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(tag: i64) -> Option<ScopeTag> {
        match tag {
            1 => Some(ScopeTag::Resource),
            2 => Some(ScopeTag::Span),
            3 => Some(ScopeTag::Event),
            4 => Some(ScopeTag::Link),
            5 => Some(ScopeTag::Instrumentation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeTag::Resource => "resource",
            ScopeTag::Span => "span",
            ScopeTag::Event => "event",
            ScopeTag::Link => "link",
            ScopeTag::Instrumentation => "instrumentation",
        }
    }
}

impl FromStr for ScopeTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "resource" => Ok(ScopeTag::Resource),
            "span" => Ok(ScopeTag::Span),
            "event" => Ok(ScopeTag::Event),
            "link" => Ok(ScopeTag::Link),
            "instrumentation" => Ok(ScopeTag::Instrumentation),
            _ => UnknownScopeSnafu { scope: s }.fail(),
        }
    }
}

/// An attribute value: one of four element types, scalar or array. A scalar
/// is a one-element vector; [`Attribute::is_array`] distinguishes the two on
/// disk.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    String(Vec<String>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
}

impl AttrValue {
    pub fn string(value: impl Into<String>) -> AttrValue {
        AttrValue::String(vec![value.into()])
    }

    pub fn int(value: i64) -> AttrValue {
        AttrValue::Int(vec![value])
    }

    pub fn float(value: f64) -> AttrValue {
        AttrValue::Float(vec![value])
    }

    pub fn boolean(value: bool) -> AttrValue {
        AttrValue::Bool(vec![value])
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AttrValue::String(v) => v.is_empty(),
            AttrValue::Int(v) => v.is_empty(),
            AttrValue::Float(v) => v.is_empty(),
            AttrValue::Bool(v) => v.is_empty(),
        }
    }

    /// FNV-1a over the value's byte representation: element bytes
    /// concatenated in order, little-endian for ints, IEEE-754 bits for
    /// floats, 0/1 for bools. Distinct values only collide when their byte
    /// encodings collide, a probability we accept.
    pub fn fnv_hash(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        match self {
            AttrValue::String(values) => {
                for v in values {
                    hasher.write(v.as_bytes());
                }
            }
            AttrValue::Int(values) => {
                for v in values {
                    hasher.write(&v.to_le_bytes());
                }
            }
            AttrValue::Float(values) => {
                for v in values {
                    hasher.write(&v.to_bits().to_le_bytes());
                }
            }
            AttrValue::Bool(values) => {
                for v in values {
                    hasher.write(&[*v as u8]);
                }
            }
        }
        hasher.finish()
    }
}

/// Lexicographic comparison of two slices with a per-element ordering.
pub(crate) fn cmp_elements<T>(a: &[T], b: &[T], cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match cmp(x, y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

/// A key/value pair attached to a resource, instrumentation scope, span,
/// event or link.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: AttrValue,
    pub is_array: bool,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: AttrValue) -> Attribute {
        Attribute {
            key: key.into(),
            value,
            is_array: false,
        }
    }

    pub fn array(key: impl Into<String>, value: AttrValue) -> Attribute {
        Attribute {
            key: key.into(),
            value,
            is_array: true,
        }
    }
}

/// Values of the block's dedicated string columns, positional: slot `i`
/// pairs with the `i`-th dedicated column name in the block meta.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DedicatedAttributes {
    pub strings: [Option<String>; MAX_DEDICATED_COLUMNS],
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trace {
    pub trace_id: Vec<u8>,
    pub resource_spans: Vec<ResourceSpans>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSpans {
    pub resource: Resource,
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resource {
    pub attrs: Vec<Attribute>,
    pub service_name: Option<String>,
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub pod: Option<String>,
    pub container: Option<String>,
    pub k8s_cluster_name: Option<String>,
    pub k8s_namespace_name: Option<String>,
    pub k8s_pod_name: Option<String>,
    pub k8s_container_name: Option<String>,
    pub dedicated: DedicatedAttributes,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScopeSpans {
    pub scope: InstrumentationScope,
    pub spans: Vec<Span>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstrumentationScope {
    pub name: Option<String>,
    pub version: Option<String>,
    pub attrs: Vec<Attribute>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Span {
    pub name: Option<String>,
    pub kind: Option<i64>,
    pub status_code: Option<i64>,
    pub status_message: Option<String>,
    pub http_method: Option<String>,
    pub http_url: Option<String>,
    pub http_status_code: Option<i64>,
    pub attrs: Vec<Attribute>,
    pub dedicated: DedicatedAttributes,
    pub events: Vec<Event>,
    pub links: Vec<Link>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Event {
    pub name: Option<String>,
    pub attrs: Vec<Attribute>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Link {
    pub attrs: Vec<Attribute>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_tag_round_trip() {
        for tag in [
            ScopeTag::Resource,
            ScopeTag::Span,
            ScopeTag::Event,
            ScopeTag::Link,
            ScopeTag::Instrumentation,
        ] {
            assert_eq!(Some(tag), ScopeTag::from_i64(tag.as_i64()));
            assert_eq!(tag, tag.as_str().parse().unwrap());
        }
        assert!(ScopeTag::from_i64(0).is_none());
        assert!("spam".parse::<ScopeTag>().is_err());
    }

    #[test]
    fn test_fnv_hash_discriminates_values() {
        assert_eq!(
            AttrValue::string("prod").fnv_hash(),
            AttrValue::string("prod").fnv_hash()
        );
        assert_ne!(
            AttrValue::string("prod").fnv_hash(),
            AttrValue::string("dev").fnv_hash()
        );
        assert_ne!(AttrValue::int(1).fnv_hash(), AttrValue::int(2).fnv_hash());
        assert_ne!(
            AttrValue::boolean(true).fnv_hash(),
            AttrValue::boolean(false).fnv_hash()
        );
        // Array hashing covers all elements.
        assert_ne!(
            AttrValue::String(vec!["a".into(), "b".into()]).fnv_hash(),
            AttrValue::String(vec!["a".into(), "c".into()]).fnv_hash()
        );
    }

    #[test]
    fn test_fnv_hash_known_vector() {
        // FNV-1a 64 of "a" is 0xaf63dc4c8601ec8c.
        assert_eq!(0xaf63dc4c8601ec8c, AttrValue::string("a").fnv_hash());
    }
}
