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

//! Columnar iteration with row-number tracking.
//!
//! A [`SyncIterator`] scans one leaf column of a nested parquet file and
//! yields each value that passes its predicate together with the
//! [`RowNumber`] identifying the value's position in the nested row tree.
//! `seek_to` fast-forwards without decoding the skipped stretch: whole row
//! groups are dropped by their row range, records inside a row group are
//! skipped through the page reader, and when the file carries a page index
//! the predicate prunes entire pages by their min/max bounds.

use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use parquet::basic::Type as PhysicalType;
use parquet::column::reader::{get_column_reader, ColumnReader};
use parquet::data_type::ByteArray;
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};
use parquet::file::page_index::index::Index;
use parquet::file::reader::ChunkReader;
use parquet::file::serialized_reader::SerializedPageReader;
use parquet::schema::types::ColumnDescPtr;
use snafu::{OptionExt, ResultExt};

use crate::error::{
    ColumnNotFoundSnafu, OpenColumnChunkSnafu, ReadColumnSnafu, ReadMetadataSnafu,
    Result, SkipRecordsSnafu, UnsupportedColumnTypeSnafu, ValueCountMismatchSnafu,
};
use crate::predicate::{PageBounds, Predicate};
use crate::row_number::{compare_row_numbers, RowNumber};
use crate::value::ColumnValue;

/// One value produced by an iterator, tagged with the column's `select_as`
/// name so group predicates can extract fields without knowing column order.
#[derive(Debug, Default)]
pub struct IteratorResult {
    pub row_number: RowNumber,
    pub entries: Vec<(&'static str, ColumnValue)>,
}

impl IteratorResult {
    pub fn entry(&self, key: &str) -> Option<&ColumnValue> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Callback deciding whether a group of entries assembled from multiple
/// columns of the same row lineage is kept. Implementations extract fields
/// by entry name and append them into a caller-provided accumulator.
pub trait GroupPredicate: Send {
    fn keep_group(&mut self, result: &mut IteratorResult) -> bool;
}

/// An opened parquet file shared by the iterators scanning it. Metadata,
/// including the page index, is read once up front; every iterator keeps its
/// own page buffers, so one `ScanFile` serves concurrent readers.
pub struct ScanFile<R: ChunkReader + 'static> {
    source: Arc<R>,
    metadata: Arc<ParquetMetaData>,
}

impl<R: ChunkReader + 'static> ScanFile<R> {
    pub fn open(source: R) -> Result<Self> {
        let metadata = ParquetMetaDataReader::new()
            .with_page_indexes(true)
            .parse_and_finish(&source)
            .context(ReadMetadataSnafu)?;
        Ok(Self {
            source: Arc::new(source),
            metadata: Arc::new(metadata),
        })
    }

    pub fn metadata(&self) -> &Arc<ParquetMetaData> {
        &self.metadata
    }

    /// Creates an iterator over the leaf column at `column_path` (dotted
    /// schema path), yielding values under `select_as`.
    pub fn iter(
        &self,
        column_path: &str,
        predicate: Option<Box<dyn Predicate>>,
        select_as: &'static str,
    ) -> Result<SyncIterator<R>> {
        SyncIterator::new(
            self.source.clone(),
            self.metadata.clone(),
            column_path,
            predicate,
            select_as,
        )
    }
}

/// A row group selected for scanning, with its absolute row range.
#[derive(Clone, Copy, Debug)]
struct RowGroupSlice {
    index: usize,
    first_row: i64,
    num_rows: i64,
}

enum ValuesBuffer {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Double(Vec<f64>),
    Bytes(Vec<ByteArray>),
}

impl ValuesBuffer {
    fn clear(&mut self) {
        match self {
            ValuesBuffer::Bool(v) => v.clear(),
            ValuesBuffer::Int32(v) => v.clear(),
            ValuesBuffer::Int64(v) => v.clear(),
            ValuesBuffer::Double(v) => v.clear(),
            ValuesBuffer::Bytes(v) => v.clear(),
        }
    }

    fn get(&self, idx: usize) -> Option<ColumnValue> {
        match self {
            ValuesBuffer::Bool(v) => v.get(idx).map(|v| ColumnValue::Bool(*v)),
            ValuesBuffer::Int32(v) => v.get(idx).map(|v| ColumnValue::Int32(*v)),
            ValuesBuffer::Int64(v) => v.get(idx).map(|v| ColumnValue::Int64(*v)),
            ValuesBuffer::Double(v) => v.get(idx).map(|v| ColumnValue::Float64(*v)),
            ValuesBuffer::Bytes(v) => v.get(idx).map(|v| ColumnValue::Bytes(v.clone())),
        }
    }
}

struct ActiveRowGroup {
    reader: ColumnReader,
    /// Absolute row index one past the last row of this group.
    end_row: i64,
    /// Absolute row ranges that may contain matching values, ascending and
    /// non-overlapping. `None` when no page index or no predicate applies.
    keep_rows: Option<Vec<Range<i64>>>,
}

/// Iterates one leaf column, producing `(RowNumber, value)` pairs for values
/// that pass the predicate. Forward-only; a single logical task drives it
/// from creation to exhaustion.
pub struct SyncIterator<R: ChunkReader + 'static> {
    source: Arc<R>,
    metadata: Arc<ParquetMetaData>,
    column: usize,
    column_path: String,
    select_as: &'static str,
    predicate: Option<Box<dyn Predicate>>,
    max_def: i16,
    max_rep: i16,
    descr: ColumnDescPtr,

    row_groups: Vec<RowGroupSlice>,
    rg_cursor: usize,
    active: Option<ActiveRowGroup>,
    /// Absolute index of the next unread record. Between records the current
    /// row number's top slot is `next_row - 1`.
    next_row: i64,
    curr: RowNumber,
    done: bool,

    defs: Vec<i16>,
    reps: Vec<i16>,
    values: ValuesBuffer,
    levels_in_buf: usize,
    entry_idx: usize,
    value_idx: usize,
}

impl<R: ChunkReader + 'static> SyncIterator<R> {
    fn new(
        source: Arc<R>,
        metadata: Arc<ParquetMetaData>,
        column_path: &str,
        predicate: Option<Box<dyn Predicate>>,
        select_as: &'static str,
    ) -> Result<Self> {
        let schema = metadata.file_metadata().schema_descr();
        let column = schema
            .columns()
            .iter()
            .position(|c| c.path().string() == column_path)
            .context(ColumnNotFoundSnafu {
                column: column_path,
            })?;
        let descr = schema.column(column);

        let values = match descr.physical_type() {
            PhysicalType::BOOLEAN => ValuesBuffer::Bool(Vec::new()),
            PhysicalType::INT32 => ValuesBuffer::Int32(Vec::new()),
            PhysicalType::INT64 => ValuesBuffer::Int64(Vec::new()),
            PhysicalType::DOUBLE => ValuesBuffer::Double(Vec::new()),
            PhysicalType::BYTE_ARRAY => ValuesBuffer::Bytes(Vec::new()),
            other => {
                return UnsupportedColumnTypeSnafu {
                    column: column_path,
                    physical: other.to_string(),
                }
                .fail()
            }
        };

        // Row groups whose chunk statistics cannot contain a match are
        // dropped here; their rows still count toward absolute row numbers.
        let mut row_groups = Vec::with_capacity(metadata.num_row_groups());
        let mut first_row = 0i64;
        for (index, rg) in metadata.row_groups().iter().enumerate() {
            let keep = match &predicate {
                Some(p) => p.keep_column_chunk(rg.column(column)),
                None => true,
            };
            if keep {
                row_groups.push(RowGroupSlice {
                    index,
                    first_row,
                    num_rows: rg.num_rows(),
                });
            }
            first_row += rg.num_rows();
        }

        Ok(Self {
            source,
            metadata,
            column,
            column_path: column_path.to_string(),
            select_as,
            predicate,
            max_def: descr.max_def_level(),
            max_rep: descr.max_rep_level(),
            descr,
            row_groups,
            rg_cursor: 0,
            active: None,
            next_row: 0,
            curr: RowNumber::empty(),
            done: false,
            defs: Vec::new(),
            reps: Vec::new(),
            values,
            levels_in_buf: 0,
            entry_idx: 0,
            value_idx: 0,
        })
    }

    /// Returns the next matching value at or after the current position.
    pub fn next(&mut self) -> Result<Option<IteratorResult>> {
        loop {
            if let Some(result) = self.scan_buffered(None)? {
                return Ok(Some(result));
            }
            if !self.advance_record()? {
                return Ok(None);
            }
        }
    }

    /// Returns the next matching value whose row number is at or after `to`
    /// when compared down to `definition_level`. Skips row groups, pruned
    /// pages and whole records between the current position and the target
    /// without decoding them. Forward-only: a target behind the current
    /// position degenerates to `next`.
    pub fn seek_to(
        &mut self,
        to: RowNumber,
        definition_level: usize,
    ) -> Result<Option<IteratorResult>> {
        let target = Some((to, definition_level));
        loop {
            if let Some(result) = self.scan_buffered(target)? {
                return Ok(Some(result));
            }
            self.fast_forward_to_row(to[0] as i64)?;
            if !self.advance_record()? {
                return Ok(None);
            }
        }
    }

    /// Releases the column reader state. Also invoked on drop.
    pub fn close(&mut self) {
        self.active = None;
        self.done = true;
        self.levels_in_buf = 0;
        self.entry_idx = 0;
        self.values.clear();
    }

    /// Consumes buffered entries, tracking the row number per entry, until a
    /// value passes the predicate (and reaches `target`, if given).
    fn scan_buffered(
        &mut self,
        target: Option<(RowNumber, usize)>,
    ) -> Result<Option<IteratorResult>> {
        while self.entry_idx < self.levels_in_buf {
            let idx = self.entry_idx;
            self.entry_idx += 1;

            let rep = if self.max_rep > 0 {
                self.reps[idx] as usize
            } else {
                0
            };
            let def = if self.max_def > 0 {
                self.defs[idx] as usize
            } else {
                0
            };
            self.curr.next(rep, def);

            if def != self.max_def as usize {
                continue;
            }
            let value = self
                .values
                .get(self.value_idx)
                .context(ValueCountMismatchSnafu {
                    column: &self.column_path,
                    values: self.value_idx,
                    levels: self.levels_in_buf,
                })?;
            self.value_idx += 1;

            if let Some((to, level)) = target {
                if compare_row_numbers(level, self.curr, to) == Ordering::Less {
                    continue;
                }
            }
            if let Some(predicate) = &self.predicate {
                if !predicate.keep_value(&value) {
                    continue;
                }
            }

            return Ok(Some(IteratorResult {
                row_number: self.curr,
                entries: vec![(self.select_as, value)],
            }));
        }
        Ok(None)
    }

    /// Reads the next record into the entry buffer, opening row groups and
    /// skipping pruned pages as needed. Returns `false` at stream end.
    fn advance_record(&mut self) -> Result<bool> {
        loop {
            if self.done {
                return Ok(false);
            }
            if self.active.is_none() && !self.open_next_row_group()? {
                return Ok(false);
            }

            // Jump over rows whose pages cannot contain a match.
            enum Prune {
                Read,
                Skip(i64),
                Exhausted,
            }
            let prune = match self.active.as_ref().and_then(|a| a.keep_rows.as_deref()) {
                Some(keep) => match keep.iter().find(|r| r.end > self.next_row) {
                    None => Prune::Exhausted,
                    Some(range) if range.start > self.next_row => {
                        Prune::Skip(range.start - self.next_row)
                    }
                    Some(_) => Prune::Read,
                },
                None => Prune::Read,
            };
            match prune {
                Prune::Exhausted => {
                    self.active = None;
                    continue;
                }
                Prune::Skip(num_records) => {
                    self.skip_records(num_records)?;
                    continue;
                }
                Prune::Read => {}
            }

            self.defs.clear();
            self.reps.clear();
            self.values.clear();

            let active = self.active.as_mut().unwrap();
            let def_levels = (self.max_def > 0).then_some(&mut self.defs);
            let rep_levels = (self.max_rep > 0).then_some(&mut self.reps);
            let (records, values_read, levels_read) = match (&mut active.reader, &mut self.values)
            {
                (ColumnReader::BoolColumnReader(r), ValuesBuffer::Bool(v)) => {
                    r.read_records(1, def_levels, rep_levels, v)
                }
                (ColumnReader::Int32ColumnReader(r), ValuesBuffer::Int32(v)) => {
                    r.read_records(1, def_levels, rep_levels, v)
                }
                (ColumnReader::Int64ColumnReader(r), ValuesBuffer::Int64(v)) => {
                    r.read_records(1, def_levels, rep_levels, v)
                }
                (ColumnReader::DoubleColumnReader(r), ValuesBuffer::Double(v)) => {
                    r.read_records(1, def_levels, rep_levels, v)
                }
                (ColumnReader::ByteArrayColumnReader(r), ValuesBuffer::Bytes(v)) => {
                    r.read_records(1, def_levels, rep_levels, v)
                }
                _ => unreachable!("value buffer built from the column's physical type"),
            }
            .context(ReadColumnSnafu {
                column: &self.column_path,
            })?;

            if records == 0 {
                self.active = None;
                continue;
            }

            self.next_row += records as i64;
            self.levels_in_buf = if self.max_def == 0 && self.max_rep == 0 {
                values_read
            } else {
                levels_read
            };
            self.entry_idx = 0;
            self.value_idx = 0;
            return Ok(true);
        }
    }

    /// Drops row groups entirely below `target` and bulk-skips records in
    /// the active one up to it.
    fn fast_forward_to_row(&mut self, target: i64) -> Result<()> {
        loop {
            match &self.active {
                None => {
                    let Some(slice) = self.row_groups.get(self.rg_cursor) else {
                        return Ok(());
                    };
                    if slice.first_row + slice.num_rows <= target {
                        self.rg_cursor += 1;
                        continue;
                    }
                    return Ok(());
                }
                Some(active) => {
                    if self.next_row >= target {
                        return Ok(());
                    }
                    let skip = target.min(active.end_row) - self.next_row;
                    if skip > 0 {
                        self.skip_records(skip)?;
                    }
                    if self.next_row < target {
                        // Row group exhausted below the target.
                        self.active = None;
                        continue;
                    }
                    return Ok(());
                }
            }
        }
    }

    fn skip_records(&mut self, num_records: i64) -> Result<()> {
        let active = self.active.as_mut().unwrap();
        let skipped = match &mut active.reader {
            ColumnReader::BoolColumnReader(r) => r.skip_records(num_records as usize),
            ColumnReader::Int32ColumnReader(r) => r.skip_records(num_records as usize),
            ColumnReader::Int64ColumnReader(r) => r.skip_records(num_records as usize),
            ColumnReader::DoubleColumnReader(r) => r.skip_records(num_records as usize),
            ColumnReader::ByteArrayColumnReader(r) => r.skip_records(num_records as usize),
            _ => unreachable!("value buffer built from the column's physical type"),
        }
        .context(SkipRecordsSnafu {
            column: &self.column_path,
            num_records,
        })?;

        self.curr.skip(skipped as i64);
        self.next_row += skipped as i64;
        if (skipped as i64) < num_records {
            self.active = None;
        }
        Ok(())
    }

    fn open_next_row_group(&mut self) -> Result<bool> {
        let Some(slice) = self.row_groups.get(self.rg_cursor).copied() else {
            self.done = true;
            return Ok(false);
        };
        self.rg_cursor += 1;

        let rg_meta = self.metadata.row_group(slice.index);
        let chunk = rg_meta.column(self.column);

        let page_locations = self
            .metadata
            .offset_index()
            .and_then(|oi| oi.get(slice.index))
            .and_then(|rg| rg.get(self.column))
            .map(|meta| meta.page_locations().clone());

        let keep_rows = match (&self.predicate, self.metadata.column_index(), &page_locations) {
            (Some(predicate), Some(ci), Some(locations)) if !locations.is_empty() => ci
                .get(slice.index)
                .and_then(|rg| rg.get(self.column))
                .and_then(|index| {
                    keep_row_ranges(predicate.as_ref(), index, locations, slice)
                }),
            _ => None,
        };

        let pages = SerializedPageReader::new(
            self.source.clone(),
            chunk,
            rg_meta.num_rows() as usize,
            page_locations,
        )
        .context(OpenColumnChunkSnafu {
            column: &self.column_path,
            row_group: slice.index,
        })?;
        let reader = get_column_reader(self.descr.clone(), Box::new(pages));
        tracing::debug!(
            column = %self.column_path,
            row_group = slice.index,
            kept_ranges = keep_rows.as_ref().map(|r| r.len()),
            "opening column chunk"
        );

        // Rows of skipped groups never pass through the buffer; account for
        // them before the first read.
        if self.next_row < slice.first_row {
            self.curr.skip(slice.first_row - self.next_row);
            self.next_row = slice.first_row;
        }

        self.active = Some(ActiveRowGroup {
            reader,
            end_row: slice.first_row + slice.num_rows,
            keep_rows,
        });
        Ok(true)
    }
}

impl<R: ChunkReader + 'static> Drop for SyncIterator<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Evaluates the page predicate against the column index and returns the
/// absolute row ranges of the kept pages, coalescing adjacent ranges.
/// Returns `None` (scan everything) when the index shape is unusable.
fn keep_row_ranges(
    predicate: &dyn Predicate,
    index: &Index,
    locations: &[parquet::format::PageLocation],
    slice: RowGroupSlice,
) -> Option<Vec<Range<i64>>> {
    let bounds: Vec<PageBounds> = match index {
        Index::BOOLEAN(native) => native
            .indexes
            .iter()
            .map(|p| PageBounds {
                min: p.min().map(|v| ColumnValue::Bool(*v)),
                max: p.max().map(|v| ColumnValue::Bool(*v)),
            })
            .collect(),
        Index::INT32(native) => native
            .indexes
            .iter()
            .map(|p| PageBounds {
                min: p.min().map(|v| ColumnValue::Int32(*v)),
                max: p.max().map(|v| ColumnValue::Int32(*v)),
            })
            .collect(),
        Index::INT64(native) => native
            .indexes
            .iter()
            .map(|p| PageBounds {
                min: p.min().map(|v| ColumnValue::Int64(*v)),
                max: p.max().map(|v| ColumnValue::Int64(*v)),
            })
            .collect(),
        Index::DOUBLE(native) => native
            .indexes
            .iter()
            .map(|p| PageBounds {
                min: p.min().map(|v| ColumnValue::Float64(*v)),
                max: p.max().map(|v| ColumnValue::Float64(*v)),
            })
            .collect(),
        Index::BYTE_ARRAY(native) => native
            .indexes
            .iter()
            .map(|p| PageBounds {
                min: p.min().map(|v| ColumnValue::Bytes(v.clone())),
                max: p.max().map(|v| ColumnValue::Bytes(v.clone())),
            })
            .collect(),
        _ => return None,
    };
    if bounds.len() != locations.len() {
        return None;
    }

    let mut ranges: Vec<Range<i64>> = Vec::new();
    for (i, page_bounds) in bounds.iter().enumerate() {
        if !predicate.keep_page(page_bounds) {
            continue;
        }
        let start = slice.first_row + locations[i].first_row_index;
        let end = match locations.get(i + 1) {
            Some(next) => slice.first_row + next.first_row_index,
            None => slice.first_row + slice.num_rows,
        };
        match ranges.last_mut() {
            Some(last) if last.end == start => last.end = end,
            _ => ranges.push(start..end),
        }
    }
    Some(ranges)
}
