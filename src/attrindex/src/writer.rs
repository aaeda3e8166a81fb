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

//! Turns an [`AttrStats`] aggregate into the sorted index file.

use std::cmp::Ordering;
use std::io::Write;
use std::sync::Arc;

use parquet::basic::{Compression, Encoding};
use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::ColumnPath;
use snafu::{ensure, ResultExt};
use tracing::info;

use parquetscan::RowNumber;

use crate::codec::row_numbers_encode;
use crate::error::{Result, WriteParquetSnafu, WriteRowCountSnafu};
use crate::model::{cmp_elements, AttrValue, ScopeTag};
use crate::schema::index_message_type;
use crate::shred::{RecordValue, Shredder};
use crate::stats::{AttrStats, ValueInfo};

/// Which column families the index file carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexTypes {
    /// Per-value row number columns (`RowNumbers.Lvl01..04`, `RowNumbersEnc`).
    pub rows: bool,
    /// Dense `KeyCode`/`ValueCode` columns.
    pub codes: bool,
}

impl Default for IndexTypes {
    /// The combined variant.
    fn default() -> Self {
        IndexTypes {
            rows: true,
            codes: true,
        }
    }
}

/// One unique value of a `(key, scope)` pair, sorted into place.
#[derive(Debug)]
pub struct IndexValue {
    pub value: AttrValue,
    pub value_code: i64,
    pub row_numbers: Vec<RowNumber>,
}

#[derive(Debug)]
pub struct IndexScope {
    pub scope: ScopeTag,
    pub values_string: Vec<IndexValue>,
    pub values_int: Vec<IndexValue>,
    pub values_float: Vec<IndexValue>,
    pub values_bool: Vec<IndexValue>,
}

/// One row of the index file; rows are sorted by key.
#[derive(Debug)]
pub struct IndexRow {
    pub key: String,
    pub key_code: i64,
    pub scopes: Vec<IndexScope>,
}

/// Element-wise value ordering: strings byte-lexicographic, ints natural,
/// floats IEEE total order, bools false < true; arrays lexicographic over
/// their elements, shorter first on ties.
fn attr_value_cmp(a: &AttrValue, b: &AttrValue) -> Ordering {
    match (a, b) {
        (AttrValue::String(x), AttrValue::String(y)) => {
            cmp_elements(x, y, |a, b| a.as_bytes().cmp(b.as_bytes()))
        }
        (AttrValue::Int(x), AttrValue::Int(y)) => cmp_elements(x, y, |a, b| a.cmp(b)),
        (AttrValue::Float(x), AttrValue::Float(y)) => cmp_elements(x, y, |a, b| a.total_cmp(b)),
        (AttrValue::Bool(x), AttrValue::Bool(y)) => cmp_elements(x, y, |a, b| a.cmp(b)),
        // Each value bucket holds a single variant.
        _ => Ordering::Equal,
    }
}

fn sorted_values(values: impl Iterator<Item = ValueInfo>) -> Vec<IndexValue> {
    let mut out: Vec<IndexValue> = values
        .map(|info| IndexValue {
            value: info.value,
            value_code: 0,
            row_numbers: info.row_numbers,
        })
        .collect();
    out.sort_by(|a, b| attr_value_cmp(&a.value, &b.value));
    for (i, value) in out.iter_mut().enumerate() {
        value.value_code = i as i64 + 1;
    }
    out
}

/// Flattens and sorts the aggregate into index rows: values sorted within
/// each scope, scopes by tag, rows by key; dense 1-based codes assigned in
/// sorted order.
pub fn build_index(stats: AttrStats) -> Vec<IndexRow> {
    let mut index: Vec<IndexRow> = stats
        .attributes
        .into_values()
        .map(|attr| {
            let mut scopes: Vec<IndexScope> = attr
                .scopes
                .into_values()
                .map(|scope| IndexScope {
                    scope: scope.scope,
                    values_string: sorted_values(scope.values_string.into_values()),
                    values_int: sorted_values(scope.values_int.into_values()),
                    values_float: sorted_values(scope.values_float.into_values()),
                    values_bool: sorted_values(scope.values_bool.into_values()),
                })
                .collect();
            scopes.sort_by_key(|s| s.scope);
            IndexRow {
                key: attr.key,
                key_code: 0,
                scopes,
            }
        })
        .collect();
    index.sort_by(|a, b| a.key.cmp(&b.key));
    for (i, row) in index.iter_mut().enumerate() {
        row.key_code = i as i64 + 1;
    }
    index
}

/// Page size the row-group estimate assumes.
const UNCOMPRESSED_PAGE_SIZE: i64 = 4_500_000;
const PAGES_PER_ROW_GROUP: i64 = 5;
const MIN_ROW_GROUPS: i64 = 3;

/// Sizes row groups so each holds roughly five uncompressed pages of string
/// values, with at least three row groups per file.
pub fn estimate_rows_per_row_group(index: &[IndexRow]) -> usize {
    let mut value_bytes: i64 = 0;
    for row in index {
        for scope in &row.scopes {
            for value in &scope.values_string {
                if let AttrValue::String(elements) = &value.value {
                    value_bytes += elements.iter().map(|v| v.len() as i64).sum::<i64>();
                }
            }
        }
    }

    let row_groups = (value_bytes / (UNCOMPRESSED_PAGE_SIZE * PAGES_PER_ROW_GROUP))
        .max(MIN_ROW_GROUPS) as usize;
    (index.len().div_ceil(row_groups)).max(1)
}

fn column_path(path: &str) -> ColumnPath {
    ColumnPath::new(path.split('.').map(str::to_string).collect())
}

fn writer_properties(rows_per_row_group: usize) -> WriterProperties {
    let mut builder = WriterProperties::builder()
        .set_writer_version(WriterVersion::PARQUET_2_0)
        .set_compression(Compression::SNAPPY)
        .set_max_row_group_size(rows_per_row_group);

    // Delta-encoded integer columns.
    let mut delta = vec!["KeyCode".to_string(), "Scopes.list.element.Scope".to_string()];
    // Value columns and row-number columns carry no useful min/max for
    // pruning; keep chunk statistics only, dropping the page index.
    let mut chunk_stats = Vec::new();
    for family in ["ValuesString", "ValuesInt", "ValuesFloat", "ValuesBool"] {
        let element = format!("Scopes.list.element.{family}.list.element");
        delta.push(format!("{element}.ValueCode"));
        chunk_stats.push(format!("{element}.Value.list.element"));
        chunk_stats.push(format!("{element}.RowNumbersEnc"));
        for lvl in ["Lvl01", "Lvl02", "Lvl03", "Lvl04"] {
            chunk_stats.push(format!("{element}.RowNumbers.{lvl}.list.element"));
        }
    }
    for path in delta {
        let path = column_path(&path);
        builder = builder
            .set_column_encoding(path.clone(), Encoding::DELTA_BINARY_PACKED)
            .set_column_dictionary_enabled(path, false);
    }
    for path in chunk_stats {
        builder = builder.set_column_statistics_enabled(column_path(&path), EnabledStatistics::Chunk);
    }

    builder.build()
}

/// Writes the sorted index rows as a parquet file, flushes it, and verifies
/// every queued row was accepted. Returns the number of rows written.
pub fn write_index<W: Write + Send>(
    out: W,
    index: &[IndexRow],
    types: IndexTypes,
) -> Result<usize> {
    let rows_per_row_group = estimate_rows_per_row_group(index);
    info!(
        rows = index.len(),
        rows_per_row_group,
        rows_variant = types.rows,
        codes_variant = types.codes,
        "writing attribute index"
    );

    let schema = index_message_type(types.codes, types.rows)?;
    let props = Arc::new(writer_properties(rows_per_row_group));
    let mut shredder = Shredder::new(&schema)?;
    let mut writer = SerializedFileWriter::new(out, schema, props).context(WriteParquetSnafu)?;

    let mut enc_buf = Vec::new();
    for chunk in index.chunks(rows_per_row_group) {
        for row in chunk {
            let (record, buf) = index_row_to_record(row, types, enc_buf);
            enc_buf = buf;
            shredder.shred(&record)?;
        }
        shredder.write_row_group(&mut writer)?;
    }

    let metadata = writer.close().context(WriteParquetSnafu)?;
    ensure!(
        metadata.num_rows as usize == index.len(),
        WriteRowCountSnafu {
            expected: index.len(),
            actual: metadata.num_rows as usize,
        }
    );
    Ok(index.len())
}

fn index_row_to_record(
    row: &IndexRow,
    types: IndexTypes,
    mut enc_buf: Vec<u8>,
) -> (RecordValue, Vec<u8>) {
    let mut fields = vec![RecordValue::string(row.key.clone())];
    if types.codes {
        fields.push(RecordValue::Int64(row.key_code));
    }

    let mut scopes = Vec::with_capacity(row.scopes.len());
    for scope in &row.scopes {
        let mut scope_fields = vec![RecordValue::Int64(scope.scope.as_i64())];
        for values in [
            &scope.values_string,
            &scope.values_int,
            &scope.values_float,
            &scope.values_bool,
        ] {
            let mut elements = Vec::with_capacity(values.len());
            for value in values {
                let (record, buf) = index_value_to_record(value, types, enc_buf);
                enc_buf = buf;
                elements.push(record);
            }
            scope_fields.push(RecordValue::List(elements));
        }
        scopes.push(RecordValue::Group(scope_fields));
    }
    fields.push(RecordValue::List(scopes));

    (RecordValue::Group(fields), enc_buf)
}

fn index_value_to_record(
    value: &IndexValue,
    types: IndexTypes,
    mut enc_buf: Vec<u8>,
) -> (RecordValue, Vec<u8>) {
    let elements = match &value.value {
        AttrValue::String(v) => v.iter().map(|s| RecordValue::string(s.clone())).collect(),
        AttrValue::Int(v) => v.iter().map(|i| RecordValue::Int64(*i)).collect(),
        AttrValue::Float(v) => v.iter().map(|f| RecordValue::Double(*f)).collect(),
        AttrValue::Bool(v) => v.iter().map(|b| RecordValue::Bool(*b)).collect(),
    };
    let mut fields = vec![RecordValue::List(elements)];
    if types.codes {
        fields.push(RecordValue::Int64(value.value_code));
    }
    if types.rows {
        let levels = (0..4)
            .map(|slot| {
                RecordValue::List(
                    value
                        .row_numbers
                        .iter()
                        .map(|row| RecordValue::Int32(row[slot]))
                        .collect(),
                )
            })
            .collect();
        fields.push(RecordValue::Group(levels));

        enc_buf = row_numbers_encode(enc_buf, &value.row_numbers);
        fields.push(RecordValue::Bytes(enc_buf.clone()));
    }
    (RecordValue::Group(fields), enc_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attribute, Resource, ResourceSpans, Trace};
    use crate::stats::AttrStatsBuilder;

    fn stats_for(traces: &[Trace]) -> AttrStats {
        let mut builder = AttrStatsBuilder::new(false, vec![], vec![]);
        for trace in traces {
            builder.add_trace(trace);
        }
        builder.finish()
    }

    fn resource_trace(attrs: Vec<Attribute>) -> Trace {
        Trace {
            trace_id: vec![1; 16],
            resource_spans: vec![ResourceSpans {
                resource: Resource {
                    attrs,
                    ..Default::default()
                },
                scope_spans: vec![],
            }],
        }
    }

    #[test]
    fn test_build_index_sorted() {
        let stats = stats_for(&[
            resource_trace(vec![
                Attribute::new("zebra", AttrValue::string("z")),
                Attribute::new("alpha", AttrValue::string("m")),
            ]),
            resource_trace(vec![
                Attribute::new("alpha", AttrValue::string("a")),
                Attribute::new("alpha", AttrValue::int(7)),
            ]),
        ]);

        let index = build_index(stats);
        assert_eq!(
            vec!["alpha", "zebra"],
            index.iter().map(|r| r.key.as_str()).collect::<Vec<_>>()
        );
        assert_eq!(vec![1, 2], index.iter().map(|r| r.key_code).collect::<Vec<_>>());

        let alpha = &index[0];
        assert_eq!(1, alpha.scopes.len());
        let scope = &alpha.scopes[0];
        // String values sorted by bytes, codes dense from 1.
        assert_eq!(
            vec![AttrValue::string("a"), AttrValue::string("m")],
            scope
                .values_string
                .iter()
                .map(|v| v.value.clone())
                .collect::<Vec<_>>()
        );
        assert_eq!(
            vec![1, 2],
            scope
                .values_string
                .iter()
                .map(|v| v.value_code)
                .collect::<Vec<_>>()
        );
        assert_eq!(vec![AttrValue::int(7)], scope
            .values_int
            .iter()
            .map(|v| v.value.clone())
            .collect::<Vec<_>>());
    }

    #[test]
    fn test_value_ordering() {
        // Arrays compare lexicographically, floats by total order.
        assert_eq!(
            Ordering::Less,
            attr_value_cmp(
                &AttrValue::String(vec!["a".into()]),
                &AttrValue::String(vec!["a".into(), "b".into()]),
            )
        );
        assert_eq!(
            Ordering::Less,
            attr_value_cmp(&AttrValue::float(1.0), &AttrValue::float(f64::NAN)),
        );
        assert_eq!(
            Ordering::Less,
            attr_value_cmp(&AttrValue::boolean(false), &AttrValue::boolean(true)),
        );
    }

    #[test]
    fn test_estimate_rows_per_row_group() {
        // Small indexes still spread over the minimum three row groups.
        let stats = stats_for(&[resource_trace(vec![
            Attribute::new("a", AttrValue::string("1")),
            Attribute::new("b", AttrValue::string("2")),
            Attribute::new("c", AttrValue::string("3")),
            Attribute::new("d", AttrValue::string("4")),
            Attribute::new("e", AttrValue::string("5")),
            Attribute::new("f", AttrValue::string("6")),
        ])]);
        let index = build_index(stats);
        assert_eq!(6, index.len());
        assert_eq!(2, estimate_rows_per_row_group(&index));
    }

    #[test]
    fn test_empty_index() {
        let index = build_index(AttrStats::default());
        assert!(index.is_empty());
        assert_eq!(1, estimate_rows_per_row_group(&index));

        let mut out = Vec::new();
        assert_eq!(0, write_index(&mut out, &index, IndexTypes::default()).unwrap());
        assert!(!out.is_empty()); // footer still written
    }
}
