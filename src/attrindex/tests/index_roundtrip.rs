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

//! End-to-end: data file -> stats -> index file -> probe.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use parquetscan::{RowNumber, ResultPool, ScanFile};

use attrindex::iterator::{IndexIterator, IndexResult};
use attrindex::model::{
    Attribute, AttrValue, Event, Resource, ResourceSpans, ScopeSpans, ScopeTag, Span, Trace,
};
use attrindex::stats::AttrStatsBuilder;
use attrindex::writer::{build_index, write_index, IndexTypes};
use attrindex::{DataWriter, TraceReader};

fn rn(slots: &[i32]) -> RowNumber {
    let mut row = RowNumber::empty();
    for (i, s) in slots.iter().enumerate() {
        row[i] = *s;
    }
    row
}

fn resource(cluster: &str) -> ResourceSpans {
    ResourceSpans {
        resource: Resource {
            cluster: Some(cluster.into()),
            service_name: Some(format!("svc-{cluster}")),
            ..Default::default()
        },
        scope_spans: vec![ScopeSpans {
            spans: vec![Span {
                attrs: vec![Attribute::new(
                    "env",
                    AttrValue::string(if cluster == "prod" { "live" } else { "test" }),
                )],
                events: vec![Event {
                    name: None,
                    attrs: vec![Attribute::new("cause", AttrValue::string("timeout"))],
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// 20 traces; "prod" occurs at resource coordinates [0,0], [5,2], [17,0].
fn test_traces() -> Vec<Trace> {
    (0..20)
        .map(|i| {
            let resource_spans = match i {
                0 | 17 => vec![resource("prod")],
                5 => vec![resource("dev"), resource("dev"), resource("prod")],
                _ => vec![resource("dev")],
            };
            Trace {
                trace_id: vec![i as u8; 16],
                resource_spans,
            }
        })
        .collect()
}

fn build_block(dir: &Path, traces: &[Trace]) -> (attrindex::AttrStats, ScanFile<File>) {
    let data_path = dir.join("data.parquet");
    let mut writer = DataWriter::new(File::create(&data_path).unwrap(), 8).unwrap();
    for trace in traces {
        writer.append(trace).unwrap();
    }
    writer.finish().unwrap();

    let mut builder = AttrStatsBuilder::new(false, vec![], vec![]);
    for trace in TraceReader::open(&data_path).unwrap() {
        builder.add_trace(&trace.unwrap());
    }
    let stats = builder.finish();

    // Build the index twice so the caller keeps the stats for verification.
    let mut builder = AttrStatsBuilder::new(false, vec![], vec![]);
    for trace in traces {
        builder.add_trace(trace);
    }
    let index = build_index(builder.finish());

    let index_path = dir.join("index.parquet");
    write_index(
        File::create(&index_path).unwrap(),
        &index,
        IndexTypes::default(),
    )
    .unwrap();

    let file = ScanFile::open(File::open(&index_path).unwrap()).unwrap();
    (stats, file)
}

fn probe(
    file: &ScanFile<File>,
    pool: &Arc<ResultPool<IndexResult>>,
    scope: ScopeTag,
    key: &str,
    value: &str,
    max: usize,
) -> Option<(String, ScopeTag, String, Vec<RowNumber>)> {
    let mut iter = IndexIterator::new(file, max, scope, key, value, pool.clone()).unwrap();
    let result = iter.next().unwrap()?;
    let out = (
        result.key.clone(),
        result.scope,
        result.value.clone(),
        result.row_numbers.clone(),
    );
    assert!(iter.next().unwrap().is_none(), "stream yields one result");
    Some(out)
}

#[test]
fn test_probe_known_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let (_, file) = build_block(dir.path(), &test_traces());
    let pool = ResultPool::new(4);

    let (key, scope, value, rows) =
        probe(&file, &pool, ScopeTag::Resource, "cluster", "prod", 0).unwrap();
    assert_eq!("cluster", key);
    assert_eq!(ScopeTag::Resource, scope);
    assert_eq!("prod", value);
    assert_eq!(vec![rn(&[0, 0]), rn(&[5, 2]), rn(&[17, 0])], rows);
}

#[test]
fn test_probe_span_scope() {
    let dir = tempfile::tempdir().unwrap();
    let (_, file) = build_block(dir.path(), &test_traces());
    let pool = ResultPool::new(4);

    let (_, scope, _, rows) =
        probe(&file, &pool, ScopeTag::Span, "env", "live", 0).unwrap();
    assert_eq!(ScopeTag::Span, scope);
    // One span per resource; "live" rides with "prod" resources.
    assert_eq!(
        vec![rn(&[0, 0, 0, 0]), rn(&[5, 2, 0, 0]), rn(&[17, 0, 0, 0])],
        rows
    );
}

#[test]
fn test_probe_event_scope_uses_span_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let (_, file) = build_block(dir.path(), &test_traces());
    let pool = ResultPool::new(4);

    let (_, scope, _, rows) =
        probe(&file, &pool, ScopeTag::Event, "cause", "timeout", 3).unwrap();
    assert_eq!(ScopeTag::Event, scope);
    assert_eq!(3, rows.len(), "capped at three coordinates");
    assert_eq!(rn(&[0, 0, 0, 0]), rows[0]);
}

#[test]
fn test_probe_absent() {
    let dir = tempfile::tempdir().unwrap();
    let (_, file) = build_block(dir.path(), &test_traces());
    let pool = ResultPool::new(4);

    // Unknown value under a known key.
    assert!(probe(&file, &pool, ScopeTag::Resource, "cluster", "staging", 0).is_none());
    // Unknown key entirely.
    assert!(probe(&file, &pool, ScopeTag::Resource, "rack", "prod", 0).is_none());
    // Value exists in the file, but under a different key: the alignment
    // guard must reject the neighboring match.
    assert!(probe(&file, &pool, ScopeTag::Span, "env", "prod", 0).is_none());
    // Known key and value, wrong scope.
    assert!(probe(&file, &pool, ScopeTag::Span, "cluster", "prod", 0).is_none());
}

#[test]
fn test_probe_respects_cap() {
    let dir = tempfile::tempdir().unwrap();
    let (_, file) = build_block(dir.path(), &test_traces());
    let pool = ResultPool::new(4);

    let (_, _, _, rows) =
        probe(&file, &pool, ScopeTag::Resource, "cluster", "dev", 2).unwrap();
    assert_eq!(2, rows.len());
    assert_eq!(vec![rn(&[1, 0]), rn(&[2, 0])], rows);
}

#[test]
fn test_every_string_occurrence_is_indexed() {
    let dir = tempfile::tempdir().unwrap();
    let (stats, file) = build_block(dir.path(), &test_traces());
    let pool = ResultPool::new(4);

    let mut probes = 0;
    for attr in stats.attributes.values() {
        for scope_info in attr.scopes.values() {
            for value_info in scope_info.values_string.values() {
                let AttrValue::String(elements) = &value_info.value else {
                    continue;
                };
                // The equality iterator probes scalar string values.
                let [value] = elements.as_slice() else {
                    continue;
                };

                let (_, _, _, rows) =
                    probe(&file, &pool, scope_info.scope, &attr.key, value, 0)
                        .unwrap_or_else(|| panic!("missing {}={}", attr.key, value));
                let expected: Vec<RowNumber> = value_info
                    .row_numbers
                    .iter()
                    .map(|r| RowNumber::truncate(3, *r))
                    .collect();
                assert_eq!(expected, rows, "{}={}", attr.key, value);
                probes += 1;
            }
        }
    }
    assert!(probes >= 6, "expected several distinct probes, got {probes}");
}
