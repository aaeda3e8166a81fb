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

//! Streaming aggregation of attribute occurrences over a data file.
//!
//! The builder walks traces in row order, advancing one [`RowNumber`] per
//! nesting level, and groups every observed `(key, scope, value)` into
//! per-value coordinate lists. Coordinate lists come out sorted because the
//! walk is a single pass in row order.

use std::collections::HashMap;

use tracing::warn;

use parquetscan::RowNumber;

use crate::model::{
    Attribute, AttrValue, DedicatedAttributes, ScopeTag, Trace, MAX_DEDICATED_COLUMNS,
};

/// One deduplicated value of one `(key, scope)` pair and the coordinates of
/// its occurrences.
#[derive(Debug)]
pub struct ValueInfo {
    pub value: AttrValue,
    pub row_numbers: Vec<RowNumber>,
}

/// Per-scope aggregate of one attribute key.
#[derive(Debug)]
pub struct ScopeInfo {
    pub scope: ScopeTag,
    /// Total occurrences across all values.
    pub count: usize,
    /// Values keyed by the FNV-1a hash of their byte encoding.
    pub values_string: HashMap<u64, ValueInfo>,
    pub values_int: HashMap<u64, ValueInfo>,
    pub values_float: HashMap<u64, ValueInfo>,
    pub values_bool: HashMap<u64, ValueInfo>,
}

impl ScopeInfo {
    fn new(scope: ScopeTag) -> ScopeInfo {
        ScopeInfo {
            scope,
            count: 0,
            values_string: HashMap::new(),
            values_int: HashMap::new(),
            values_float: HashMap::new(),
            values_bool: HashMap::new(),
        }
    }

    pub fn cardinality(&self) -> usize {
        self.values_string.len()
            + self.values_int.len()
            + self.values_float.len()
            + self.values_bool.len()
    }
}

#[derive(Debug)]
pub struct AttributeInfo {
    pub key: String,
    pub scopes: HashMap<ScopeTag, ScopeInfo>,
}

/// The aggregate produced by one scan of a data file.
#[derive(Debug, Default)]
pub struct AttrStats {
    pub traces: usize,
    pub resources: usize,
    pub spans: usize,
    pub events: usize,
    pub links: usize,
    pub arrays: usize,
    pub attributes: HashMap<String, AttributeInfo>,
}

/// Walks traces in row order and accumulates [`AttrStats`]. Strictly
/// single-threaded per data file; parallelism across blocks is the caller's
/// concern.
pub struct AttrStatsBuilder {
    add_intrinsics: bool,
    dedicated_resource: Vec<String>,
    dedicated_span: Vec<String>,
    stats: AttrStats,
    row: RowNumber,
}

impl AttrStatsBuilder {
    /// `dedicated_resource` and `dedicated_span` are the block's dedicated
    /// column names in column order. Names beyond the 10-column limit are
    /// dropped with a warning.
    pub fn new(
        add_intrinsics: bool,
        mut dedicated_resource: Vec<String>,
        mut dedicated_span: Vec<String>,
    ) -> AttrStatsBuilder {
        for (scope, columns) in [
            ("resource", &mut dedicated_resource),
            ("span", &mut dedicated_span),
        ] {
            if columns.len() > MAX_DEDICATED_COLUMNS {
                warn!(
                    scope,
                    dropped = columns.len() - MAX_DEDICATED_COLUMNS,
                    "more dedicated columns than the format supports, extra names ignored"
                );
                columns.truncate(MAX_DEDICATED_COLUMNS);
            }
        }
        AttrStatsBuilder {
            add_intrinsics,
            dedicated_resource,
            dedicated_span,
            stats: AttrStats::default(),
            row: RowNumber::empty(),
        }
    }

    pub fn finish(self) -> AttrStats {
        self.stats
    }

    /// Feeds one trace. Traces must arrive in data-file row order.
    pub fn add_trace(&mut self, trace: &Trace) {
        self.stats.traces += 1;
        self.row.next(0, 0);

        for rs in &trace.resource_spans {
            self.stats.resources += 1;
            self.row.next(1, 1);
            let row = self.row;

            let res = &rs.resource;
            self.add_attributes(row, ScopeTag::Resource, &res.attrs);
            self.add_dedicated(row, ScopeTag::Resource, &res.dedicated);

            self.add_opt_string(row, ScopeTag::Resource, "service.name", &res.service_name);
            self.add_opt_string(row, ScopeTag::Resource, "cluster", &res.cluster);
            self.add_opt_string(row, ScopeTag::Resource, "namespace", &res.namespace);
            self.add_opt_string(row, ScopeTag::Resource, "pod", &res.pod);
            self.add_opt_string(row, ScopeTag::Resource, "container", &res.container);
            self.add_opt_string(
                row,
                ScopeTag::Resource,
                "k8s.cluster.name",
                &res.k8s_cluster_name,
            );
            self.add_opt_string(
                row,
                ScopeTag::Resource,
                "k8s.namespace.name",
                &res.k8s_namespace_name,
            );
            self.add_opt_string(row, ScopeTag::Resource, "k8s.pod.name", &res.k8s_pod_name);
            self.add_opt_string(
                row,
                ScopeTag::Resource,
                "k8s.container.name",
                &res.k8s_container_name,
            );

            for ss in &rs.scope_spans {
                self.row.next(2, 2);
                let row = self.row;

                self.add_attributes(row, ScopeTag::Instrumentation, &ss.scope.attrs);
                if self.add_intrinsics {
                    // Scoped name to distinguish from span.name.
                    self.add_opt_string(
                        row,
                        ScopeTag::Instrumentation,
                        "scope.name",
                        &ss.scope.name,
                    );
                    self.add_opt_string(
                        row,
                        ScopeTag::Instrumentation,
                        "version",
                        &ss.scope.version,
                    );
                }

                for span in &ss.spans {
                    self.stats.spans += 1;
                    self.row.next(3, 3);
                    let row = self.row;

                    self.stats.events += span.events.len();
                    self.stats.links += span.links.len();

                    self.add_attributes(row, ScopeTag::Span, &span.attrs);
                    self.add_dedicated(row, ScopeTag::Span, &span.dedicated);
                    self.add_opt_string(row, ScopeTag::Span, "http.method", &span.http_method);
                    self.add_opt_string(row, ScopeTag::Span, "http.url", &span.http_url);
                    self.add_opt_i64(
                        row,
                        ScopeTag::Span,
                        "http.status_code",
                        span.http_status_code,
                    );
                    if self.add_intrinsics {
                        self.add_opt_string(row, ScopeTag::Span, "name", &span.name);
                        self.add_opt_i64(row, ScopeTag::Span, "kind", span.kind);
                        self.add_opt_i64(row, ScopeTag::Span, "status.code", span.status_code);
                        self.add_opt_string(
                            row,
                            ScopeTag::Span,
                            "status.message",
                            &span.status_message,
                        );
                    }

                    for event in &span.events {
                        self.add_attributes(row, ScopeTag::Event, &event.attrs);
                        if self.add_intrinsics {
                            self.add_opt_string(row, ScopeTag::Event, "event.name", &event.name);
                        }
                    }
                    for link in &span.links {
                        self.add_attributes(row, ScopeTag::Link, &link.attrs);
                    }
                }
            }
        }
    }

    fn add_attributes(&mut self, row: RowNumber, scope: ScopeTag, attrs: &[Attribute]) {
        for attr in attrs {
            if attr.is_array {
                self.stats.arrays += 1;
            }
            self.add_attribute(row, scope, &attr.key, attr.value.clone());
        }
    }

    fn add_dedicated(&mut self, row: RowNumber, scope: ScopeTag, attrs: &DedicatedAttributes) {
        let columns = match scope {
            ScopeTag::Resource => &self.dedicated_resource,
            _ => &self.dedicated_span,
        };
        // Positional: slot i pairs with the i-th dedicated column name.
        let pairs: Vec<(String, String)> = columns
            .iter()
            .zip(attrs.strings.iter())
            .filter_map(|(name, value)| value.as_ref().map(|v| (name.clone(), v.clone())))
            .collect();
        for (name, value) in pairs {
            self.add_attribute(row, scope, &name, AttrValue::String(vec![value]));
        }
    }

    fn add_opt_string(
        &mut self,
        row: RowNumber,
        scope: ScopeTag,
        key: &str,
        value: &Option<String>,
    ) {
        if let Some(value) = value {
            self.add_attribute(row, scope, key, AttrValue::String(vec![value.clone()]));
        }
    }

    fn add_opt_i64(&mut self, row: RowNumber, scope: ScopeTag, key: &str, value: Option<i64>) {
        if let Some(value) = value {
            self.add_attribute(row, scope, key, AttrValue::Int(vec![value]));
        }
    }

    fn add_attribute(&mut self, row: RowNumber, scope: ScopeTag, key: &str, value: AttrValue) {
        // Empty arrays carry nothing to index.
        if value.is_empty() {
            return;
        }

        let attr = self
            .stats
            .attributes
            .entry(key.to_string())
            .or_insert_with(|| AttributeInfo {
                key: key.to_string(),
                scopes: HashMap::new(),
            });
        let scope_info = attr
            .scopes
            .entry(scope)
            .or_insert_with(|| ScopeInfo::new(scope));
        scope_info.count += 1;

        let hash = value.fnv_hash();
        let values = match &value {
            AttrValue::String(_) => &mut scope_info.values_string,
            AttrValue::Int(_) => &mut scope_info.values_int,
            AttrValue::Float(_) => &mut scope_info.values_float,
            AttrValue::Bool(_) => &mut scope_info.values_bool,
        };
        values
            .entry(hash)
            .or_insert_with(|| ValueInfo {
                value,
                row_numbers: Vec::new(),
            })
            .row_numbers
            .push(row);
    }
}
