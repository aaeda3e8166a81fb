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

//! Reading and writing the block's `data.parquet` through the trace model.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parquet::basic::Compression;
use parquet::file::properties::{WriterProperties, WriterVersion};
use parquet::file::reader::SerializedFileReader;
use parquet::file::writer::SerializedFileWriter;
use parquet::record::reader::RowIter;
use parquet::record::{Field, List, Row};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::{
    ReadFileSnafu, ReadParquetSnafu, Result, UnexpectedRowShapeSnafu, WriteParquetSnafu,
    WriteRowCountSnafu,
};
use crate::model::{
    Attribute, AttrValue, DedicatedAttributes, Event, InstrumentationScope, Link, Resource,
    ResourceSpans, ScopeSpans, Span, Trace, MAX_DEDICATED_COLUMNS,
};
use crate::schema::data_message_type;
use crate::shred::{RecordValue, Shredder};

/// Traces per row group when rewriting a data file.
pub const DEFAULT_DATA_ROW_GROUP_SIZE: usize = 1000;

/// Streams traces into a `data.parquet`, flushing a row group every
/// `row_group_size` traces.
pub struct DataWriter<W: Write + Send> {
    writer: SerializedFileWriter<W>,
    shredder: Shredder,
    row_group_size: usize,
    rows: usize,
}

impl<W: Write + Send> DataWriter<W> {
    pub fn new(out: W, row_group_size: usize) -> Result<DataWriter<W>> {
        let schema = data_message_type()?;
        let props = Arc::new(
            WriterProperties::builder()
                .set_writer_version(WriterVersion::PARQUET_2_0)
                .set_compression(Compression::SNAPPY)
                .build(),
        );
        let shredder = Shredder::new(&schema)?;
        let writer = SerializedFileWriter::new(out, schema, props).context(WriteParquetSnafu)?;
        Ok(DataWriter {
            writer,
            shredder,
            row_group_size,
            rows: 0,
        })
    }

    pub fn append(&mut self, trace: &Trace) -> Result<()> {
        self.shredder.shred(&trace_to_record(trace))?;
        self.rows += 1;
        if self.shredder.buffered_rows() >= self.row_group_size {
            self.shredder.write_row_group(&mut self.writer)?;
        }
        Ok(())
    }

    /// Flushes the tail row group, writes the footer and verifies that every
    /// appended trace was accepted. Returns the number of rows written.
    pub fn finish(mut self) -> Result<usize> {
        if self.shredder.buffered_rows() > 0 {
            self.shredder.write_row_group(&mut self.writer)?;
        }
        let metadata = self.writer.close().context(WriteParquetSnafu)?;
        ensure!(
            metadata.num_rows as usize == self.rows,
            WriteRowCountSnafu {
                expected: self.rows,
                actual: metadata.num_rows as usize,
            }
        );
        Ok(self.rows)
    }
}

/// Iterates the traces of a data file in row order.
pub struct TraceReader {
    rows: RowIter<'static>,
}

impl TraceReader {
    pub fn open(path: &Path) -> Result<TraceReader> {
        let file = File::open(path).context(ReadFileSnafu { path })?;
        let reader = SerializedFileReader::new(file).context(ReadParquetSnafu)?;
        Ok(TraceReader {
            rows: RowIter::from_file_into(Box::new(reader)),
        })
    }
}

impl Iterator for TraceReader {
    type Item = Result<Trace>;

    fn next(&mut self) -> Option<Result<Trace>> {
        let row = match self.rows.next()? {
            Ok(row) => row,
            Err(error) => return Some(Err(error).context(ReadParquetSnafu)),
        };
        Some(trace_from_row(&row))
    }
}

fn trace_to_record(trace: &Trace) -> RecordValue {
    RecordValue::Group(vec![
        RecordValue::Bytes(trace.trace_id.clone()),
        RecordValue::List(
            trace
                .resource_spans
                .iter()
                .map(resource_spans_to_record)
                .collect(),
        ),
    ])
}

fn resource_spans_to_record(rs: &ResourceSpans) -> RecordValue {
    RecordValue::Group(vec![
        resource_to_record(&rs.resource),
        RecordValue::List(rs.scope_spans.iter().map(scope_spans_to_record).collect()),
    ])
}

fn resource_to_record(resource: &Resource) -> RecordValue {
    RecordValue::Group(vec![
        attrs_to_record(&resource.attrs),
        RecordValue::opt_string(&resource.service_name),
        RecordValue::opt_string(&resource.cluster),
        RecordValue::opt_string(&resource.namespace),
        RecordValue::opt_string(&resource.pod),
        RecordValue::opt_string(&resource.container),
        RecordValue::opt_string(&resource.k8s_cluster_name),
        RecordValue::opt_string(&resource.k8s_namespace_name),
        RecordValue::opt_string(&resource.k8s_pod_name),
        RecordValue::opt_string(&resource.k8s_container_name),
        dedicated_to_record(&resource.dedicated),
    ])
}

fn dedicated_to_record(dedicated: &DedicatedAttributes) -> RecordValue {
    RecordValue::Group(dedicated.strings.iter().map(RecordValue::opt_string).collect())
}

fn scope_spans_to_record(ss: &ScopeSpans) -> RecordValue {
    RecordValue::Group(vec![
        RecordValue::Group(vec![
            RecordValue::opt_string(&ss.scope.name),
            RecordValue::opt_string(&ss.scope.version),
            attrs_to_record(&ss.scope.attrs),
        ]),
        RecordValue::List(ss.spans.iter().map(span_to_record).collect()),
    ])
}

fn span_to_record(span: &Span) -> RecordValue {
    RecordValue::Group(vec![
        RecordValue::opt_string(&span.name),
        RecordValue::opt_i64(span.kind),
        RecordValue::opt_i64(span.status_code),
        RecordValue::opt_string(&span.status_message),
        RecordValue::opt_string(&span.http_method),
        RecordValue::opt_string(&span.http_url),
        RecordValue::opt_i64(span.http_status_code),
        attrs_to_record(&span.attrs),
        dedicated_to_record(&span.dedicated),
        RecordValue::List(span.events.iter().map(event_to_record).collect()),
        RecordValue::List(span.links.iter().map(link_to_record).collect()),
    ])
}

fn event_to_record(event: &Event) -> RecordValue {
    RecordValue::Group(vec![
        RecordValue::opt_string(&event.name),
        attrs_to_record(&event.attrs),
    ])
}

fn link_to_record(link: &Link) -> RecordValue {
    RecordValue::Group(vec![attrs_to_record(&link.attrs)])
}

fn attrs_to_record(attrs: &[Attribute]) -> RecordValue {
    RecordValue::List(attrs.iter().map(attr_to_record).collect())
}

fn attr_to_record(attr: &Attribute) -> RecordValue {
    let (strings, ints, doubles, bools) = match &attr.value {
        AttrValue::String(v) => (v.as_slice(), &[][..], &[][..], &[][..]),
        AttrValue::Int(v) => (&[][..], v.as_slice(), &[][..], &[][..]),
        AttrValue::Float(v) => (&[][..], &[][..], v.as_slice(), &[][..]),
        AttrValue::Bool(v) => (&[][..], &[][..], &[][..], v.as_slice()),
    };
    RecordValue::Group(vec![
        RecordValue::string(attr.key.clone()),
        RecordValue::List(strings.iter().map(|v| RecordValue::string(v.clone())).collect()),
        RecordValue::List(ints.iter().map(|v| RecordValue::Int64(*v)).collect()),
        RecordValue::List(doubles.iter().map(|v| RecordValue::Double(*v)).collect()),
        RecordValue::List(bools.iter().map(|v| RecordValue::Bool(*v)).collect()),
        RecordValue::Bool(attr.is_array),
    ])
}

fn field<'a>(row: &'a Row, name: &str) -> Result<&'a Field> {
    row.get_column_iter()
        .find(|(n, _)| n.as_str() == name)
        .map(|(_, f)| f)
        .context(UnexpectedRowShapeSnafu {
            reason: format!("missing field {name}"),
        })
}

fn opt_string_field(row: &Row, name: &str) -> Result<Option<String>> {
    match field(row, name)? {
        Field::Str(s) => Ok(Some(s.clone())),
        Field::Null => Ok(None),
        other => UnexpectedRowShapeSnafu {
            reason: format!("field {name} is not a string: {other:?}"),
        }
        .fail(),
    }
}

fn opt_i64_field(row: &Row, name: &str) -> Result<Option<i64>> {
    match field(row, name)? {
        Field::Long(v) => Ok(Some(*v)),
        Field::Null => Ok(None),
        other => UnexpectedRowShapeSnafu {
            reason: format!("field {name} is not an int64: {other:?}"),
        }
        .fail(),
    }
}

fn bool_field(row: &Row, name: &str) -> Result<bool> {
    match field(row, name)? {
        Field::Bool(v) => Ok(*v),
        other => UnexpectedRowShapeSnafu {
            reason: format!("field {name} is not a bool: {other:?}"),
        }
        .fail(),
    }
}

fn bytes_field(row: &Row, name: &str) -> Result<Vec<u8>> {
    match field(row, name)? {
        Field::Bytes(v) => Ok(v.data().to_vec()),
        Field::Str(s) => Ok(s.clone().into_bytes()),
        other => UnexpectedRowShapeSnafu {
            reason: format!("field {name} is not bytes: {other:?}"),
        }
        .fail(),
    }
}

fn list_field<'a>(row: &'a Row, name: &str) -> Result<&'a List> {
    match field(row, name)? {
        Field::ListInternal(list) => Ok(list),
        other => UnexpectedRowShapeSnafu {
            reason: format!("field {name} is not a list: {other:?}"),
        }
        .fail(),
    }
}

fn group_field<'a>(row: &'a Row, name: &str) -> Result<&'a Row> {
    match field(row, name)? {
        Field::Group(group) => Ok(group),
        other => UnexpectedRowShapeSnafu {
            reason: format!("field {name} is not a group: {other:?}"),
        }
        .fail(),
    }
}

fn group_elements<'a>(list: &'a List, name: &str) -> Result<Vec<&'a Row>> {
    list.elements()
        .iter()
        .map(|element| match element {
            Field::Group(group) => Ok(group),
            other => UnexpectedRowShapeSnafu {
                reason: format!("element of {name} is not a group: {other:?}"),
            }
            .fail(),
        })
        .collect()
}

fn trace_from_row(row: &Row) -> Result<Trace> {
    let mut resource_spans = Vec::new();
    for rs in group_elements(list_field(row, "ResourceSpans")?, "ResourceSpans")? {
        resource_spans.push(resource_spans_from_row(rs)?);
    }
    Ok(Trace {
        trace_id: bytes_field(row, "TraceID")?,
        resource_spans,
    })
}

fn resource_spans_from_row(row: &Row) -> Result<ResourceSpans> {
    let resource = group_field(row, "Resource")?;
    let mut scope_spans = Vec::new();
    for ss in group_elements(list_field(row, "ScopeSpans")?, "ScopeSpans")? {
        scope_spans.push(scope_spans_from_row(ss)?);
    }
    Ok(ResourceSpans {
        resource: Resource {
            attrs: attrs_from_row(resource)?,
            service_name: opt_string_field(resource, "ServiceName")?,
            cluster: opt_string_field(resource, "Cluster")?,
            namespace: opt_string_field(resource, "Namespace")?,
            pod: opt_string_field(resource, "Pod")?,
            container: opt_string_field(resource, "Container")?,
            k8s_cluster_name: opt_string_field(resource, "K8sClusterName")?,
            k8s_namespace_name: opt_string_field(resource, "K8sNamespaceName")?,
            k8s_pod_name: opt_string_field(resource, "K8sPodName")?,
            k8s_container_name: opt_string_field(resource, "K8sContainerName")?,
            dedicated: dedicated_from_row(resource)?,
        },
        scope_spans,
    })
}

fn dedicated_from_row(row: &Row) -> Result<DedicatedAttributes> {
    let group = group_field(row, "DedicatedAttributes")?;
    let mut dedicated = DedicatedAttributes::default();
    for i in 0..MAX_DEDICATED_COLUMNS {
        dedicated.strings[i] = opt_string_field(group, &format!("String{:02}", i + 1))?;
    }
    Ok(dedicated)
}

fn scope_spans_from_row(row: &Row) -> Result<ScopeSpans> {
    let scope = group_field(row, "Scope")?;
    let mut spans = Vec::new();
    for span in group_elements(list_field(row, "Spans")?, "Spans")? {
        spans.push(span_from_row(span)?);
    }
    Ok(ScopeSpans {
        scope: InstrumentationScope {
            name: opt_string_field(scope, "Name")?,
            version: opt_string_field(scope, "Version")?,
            attrs: attrs_from_row(scope)?,
        },
        spans,
    })
}

fn span_from_row(row: &Row) -> Result<Span> {
    let mut events = Vec::new();
    for event in group_elements(list_field(row, "Events")?, "Events")? {
        events.push(Event {
            name: opt_string_field(event, "Name")?,
            attrs: attrs_from_row(event)?,
        });
    }
    let mut links = Vec::new();
    for link in group_elements(list_field(row, "Links")?, "Links")? {
        links.push(Link {
            attrs: attrs_from_row(link)?,
        });
    }
    Ok(Span {
        name: opt_string_field(row, "Name")?,
        kind: opt_i64_field(row, "Kind")?,
        status_code: opt_i64_field(row, "StatusCode")?,
        status_message: opt_string_field(row, "StatusMessage")?,
        http_method: opt_string_field(row, "HttpMethod")?,
        http_url: opt_string_field(row, "HttpUrl")?,
        http_status_code: opt_i64_field(row, "HttpStatusCode")?,
        attrs: attrs_from_row(row)?,
        dedicated: dedicated_from_row(row)?,
        events,
        links,
    })
}

fn attrs_from_row(row: &Row) -> Result<Vec<Attribute>> {
    let mut attrs = Vec::new();
    for attr in group_elements(list_field(row, "Attrs")?, "Attrs")? {
        attrs.push(attr_from_row(attr)?);
    }
    Ok(attrs)
}

fn attr_from_row(row: &Row) -> Result<Attribute> {
    let key = String::from_utf8_lossy(&bytes_field(row, "Key")?).into_owned();
    let is_array = bool_field(row, "IsArray")?;

    let strings = scalar_list(list_field(row, "ValueString")?, |f| match f {
        Field::Str(s) => Some(s.clone()),
        _ => None,
    })?;
    let ints = scalar_list(list_field(row, "ValueInt")?, |f| match f {
        Field::Long(v) => Some(*v),
        _ => None,
    })?;
    let doubles = scalar_list(list_field(row, "ValueDouble")?, |f| match f {
        Field::Double(v) => Some(*v),
        _ => None,
    })?;
    let bools = scalar_list(list_field(row, "ValueBool")?, |f| match f {
        Field::Bool(v) => Some(*v),
        _ => None,
    })?;

    let value = if !strings.is_empty() {
        AttrValue::String(strings)
    } else if !ints.is_empty() {
        AttrValue::Int(ints)
    } else if !doubles.is_empty() {
        AttrValue::Float(doubles)
    } else if !bools.is_empty() {
        AttrValue::Bool(bools)
    } else {
        AttrValue::String(Vec::new())
    };

    Ok(Attribute {
        key,
        value,
        is_array,
    })
}

fn scalar_list<T>(list: &List, extract: impl Fn(&Field) -> Option<T>) -> Result<Vec<T>> {
    list.elements()
        .iter()
        .map(|element| {
            extract(element).context(UnexpectedRowShapeSnafu {
                reason: format!("unexpected list element {element:?}"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_trace(id: u8) -> Trace {
        Trace {
            trace_id: vec![id; 16],
            resource_spans: vec![ResourceSpans {
                resource: Resource {
                    attrs: vec![
                        Attribute::new("team", AttrValue::string("storage")),
                        Attribute::array(
                            "zones",
                            AttrValue::String(vec!["a".into(), "b".into()]),
                        ),
                    ],
                    service_name: Some("query-frontend".into()),
                    cluster: Some("prod".into()),
                    dedicated: DedicatedAttributes {
                        strings: [
                            Some("d01".into()),
                            None,
                            None,
                            None,
                            None,
                            None,
                            None,
                            None,
                            None,
                            None,
                        ],
                    },
                    ..Default::default()
                },
                scope_spans: vec![ScopeSpans {
                    scope: InstrumentationScope {
                        name: Some("otel-sdk".into()),
                        version: Some("1.2.3".into()),
                        attrs: vec![],
                    },
                    spans: vec![
                        Span {
                            name: Some("GET /".into()),
                            kind: Some(2),
                            http_method: Some("GET".into()),
                            http_status_code: Some(200),
                            attrs: vec![
                                Attribute::new("latency", AttrValue::float(0.25)),
                                Attribute::new("retries", AttrValue::int(3)),
                            ],
                            events: vec![Event {
                                name: Some("retry".into()),
                                attrs: vec![Attribute::new(
                                    "cause",
                                    AttrValue::string("timeout"),
                                )],
                            }],
                            links: vec![Link {
                                attrs: vec![Attribute::new(
                                    "linked",
                                    AttrValue::boolean(true),
                                )],
                            }],
                            ..Default::default()
                        },
                        Span {
                            name: Some("SELECT".into()),
                            attrs: vec![Attribute::new("db", AttrValue::string("traces"))],
                            ..Default::default()
                        },
                    ],
                }],
            }],
        }
    }

    #[test]
    fn test_write_read_round_trip() {
        let traces: Vec<Trace> = (0..5).map(test_trace).collect();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.parquet");
        let out = File::create(&path).unwrap();
        let mut writer = DataWriter::new(out, 2).unwrap();
        for trace in &traces {
            writer.append(trace).unwrap();
        }
        assert_eq!(5, writer.finish().unwrap());

        let read: Vec<Trace> = TraceReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(traces, read);
    }
}
