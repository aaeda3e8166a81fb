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

//! Resolves a `(scope, key, value)` probe against the index file.
//!
//! Four column streams run in lock-step: the key stream positions on the
//! probed key, the scope stream aligns to the same top-level row, the value
//! stream descends one definition level further, and the row-number level
//! streams are consumed positionally until their rows diverge from the
//! matched value at definition level 2. The join is correct because the
//! index is sorted by `(key, scope, value)` and row numbers are stored in
//! increasing order within each value.

use std::sync::Arc;

use parquet::file::reader::ChunkReader;
use snafu::{ensure, OptionExt, ResultExt};

use parquetscan::{
    equal_row_numbers, ColumnValue, GroupPredicate, IntEqualPredicate, IteratorResult, PoolItem,
    Pooled, Predicate, ResultPool, RowNumber, ScanFile, StringEqualPredicate, SyncIterator,
};

use crate::error::{
    CorruptIndexSnafu, Result, ScanIndexSnafu, UnknownScopeTagSnafu,
};
use crate::model::ScopeTag;
use crate::schema::{
    COLUMN_KEY, COLUMN_SCOPE, COLUMN_STRING_ROW_NUMBERS_LVL, COLUMN_STRING_VALUE, ENTRY_KEY,
    ENTRY_ROW_NUMBER_LVL, ENTRY_SCOPE, ENTRY_VALUE,
};

/// Default capacity of a fresh coordinate list.
const ROW_NUMBERS_CAPACITY: usize = 1024;

/// One matched `(key, scope, value)` and the coordinates of its
/// occurrences. Obtained from a [`ResultPool`]; buffers return to the pool
/// when the consumer drops the lease.
#[derive(Debug)]
pub struct IndexResult {
    pub key: String,
    pub scope: ScopeTag,
    pub value: String,
    pub row_numbers: Vec<RowNumber>,
}

impl Default for IndexResult {
    fn default() -> Self {
        IndexResult {
            key: String::new(),
            scope: ScopeTag::Resource,
            value: String::new(),
            row_numbers: Vec::with_capacity(ROW_NUMBERS_CAPACITY),
        }
    }
}

impl PoolItem for IndexResult {
    fn reset(&mut self) {
        self.key.clear();
        self.value.clear();
        self.scope = ScopeTag::Resource;
        self.row_numbers.clear();
    }
}

/// Extracts one row number from the per-level entries of a joined group,
/// writing slots into a caller-provided accumulator.
struct RowNumberCollector<'a> {
    row: &'a mut RowNumber,
}

impl GroupPredicate for RowNumberCollector<'_> {
    fn keep_group(&mut self, result: &mut IteratorResult) -> bool {
        for (key, value) in &result.entries {
            if let Some(slot) = ENTRY_ROW_NUMBER_LVL.iter().position(|n| n == key) {
                if let Some(v) = value.as_i32() {
                    self.row[slot] = v;
                }
            }
        }
        true
    }
}

/// Lazy, finite, non-restartable stream of [`IndexResult`]s for one probe.
/// State advances `Init -> PositionedOnKey -> PositionedOnScope ->
/// PositionedOnValue -> EmittingRowNumbers -> Done`; any inner stream
/// running dry is terminal.
pub struct IndexIterator<R: ChunkReader + 'static> {
    key_iter: SyncIterator<R>,
    scope_iter: SyncIterator<R>,
    value_iter: SyncIterator<R>,
    row_number_iters: Vec<SyncIterator<R>>,
    max_row_numbers: usize,
    pool: Arc<ResultPool<IndexResult>>,
    done: bool,
}

impl<R: ChunkReader + 'static> IndexIterator<R> {
    /// `max_row_numbers` caps the coordinates returned per result; `0`
    /// means unlimited. Resource-scope probes open two row-number level
    /// streams, all other scopes four.
    pub fn new(
        file: &ScanFile<R>,
        max_row_numbers: usize,
        scope: ScopeTag,
        key: &str,
        value: &str,
        pool: Arc<ResultPool<IndexResult>>,
    ) -> Result<IndexIterator<R>> {
        let levels = if scope == ScopeTag::Resource { 2 } else { 4 };
        let mut row_number_iters = Vec::with_capacity(levels);
        for lvl in 0..levels {
            row_number_iters.push(
                file.iter(COLUMN_STRING_ROW_NUMBERS_LVL[lvl], None, ENTRY_ROW_NUMBER_LVL[lvl])
                    .context(ScanIndexSnafu)?,
            );
        }

        let key_pred: Box<dyn Predicate> = Box::new(StringEqualPredicate::new(key.as_bytes()));
        let scope_pred: Box<dyn Predicate> = Box::new(IntEqualPredicate::new(scope.as_i64()));
        let value_pred: Box<dyn Predicate> = Box::new(StringEqualPredicate::new(value.as_bytes()));

        Ok(IndexIterator {
            key_iter: file
                .iter(COLUMN_KEY, Some(key_pred), ENTRY_KEY)
                .context(ScanIndexSnafu)?,
            scope_iter: file
                .iter(COLUMN_SCOPE, Some(scope_pred), ENTRY_SCOPE)
                .context(ScanIndexSnafu)?,
            value_iter: file
                .iter(COLUMN_STRING_VALUE, Some(value_pred), ENTRY_VALUE)
                .context(ScanIndexSnafu)?,
            row_number_iters,
            max_row_numbers,
            pool,
            done: false,
        })
    }

    /// Returns the next matched value with its coordinates, or `None` when
    /// the probe has no (further) match. An absent probe is not an error.
    pub fn next(&mut self) -> Result<Option<Pooled<IndexResult>>> {
        if self.done {
            return Ok(None);
        }

        let Some(key_res) = self.key_iter.next().context(ScanIndexSnafu)? else {
            self.done = true;
            return Ok(None);
        };
        let key = entry_string(&key_res, ENTRY_KEY)?;

        // Align the scope stream to the key's top-level row.
        let Some(scope_res) = self
            .scope_iter
            .seek_to(key_res.row_number, 0)
            .context(ScanIndexSnafu)?
        else {
            self.done = true;
            return Ok(None);
        };
        if !equal_row_numbers(0, scope_res.row_number, key_res.row_number) {
            // The probed scope does not occur under this key.
            self.done = true;
            return Ok(None);
        }
        let scope_tag = scope_res
            .entry(ENTRY_SCOPE)
            .and_then(ColumnValue::as_i64)
            .context(CorruptIndexSnafu {
                reason: "scope column entry missing",
            })?;
        let scope = ScopeTag::from_i64(scope_tag).context(UnknownScopeTagSnafu { tag: scope_tag })?;

        // Descend one definition level to the matching value.
        let Some(value_res) = self
            .value_iter
            .seek_to(scope_res.row_number, 1)
            .context(ScanIndexSnafu)?
        else {
            self.done = true;
            return Ok(None);
        };
        if !equal_row_numbers(1, value_res.row_number, scope_res.row_number) {
            // The value exists in the file but not under this key and scope.
            self.done = true;
            return Ok(None);
        }
        let pos = value_res.row_number;

        let mut result = self.pool.lease();
        result.key.push_str(&key);
        result.scope = scope;
        result.value.push_str(&entry_string(&value_res, ENTRY_VALUE)?);

        // First coordinate: every level stream seeks to the matched value.
        match self.pull_row(Some(pos))? {
            Some((last_pos, row)) if equal_row_numbers(2, pos, last_pos) => {
                result.row_numbers.push(row);
            }
            _ => return Ok(Some(result)),
        }

        // Remaining coordinates: plain steps until the streams leave the
        // value's contiguous run, or the cap is reached.
        while self.max_row_numbers == 0 || result.row_numbers.len() < self.max_row_numbers {
            match self.pull_row(None)? {
                Some((last_pos, row)) if equal_row_numbers(2, pos, last_pos) => {
                    result.row_numbers.push(row);
                }
                _ => break,
            }
        }

        Ok(Some(result))
    }

    /// Steps all level streams once (seeking on the first pull) and
    /// assembles their entries into one row number. Returns the streams'
    /// position and the assembled row, or `None` at stream end.
    fn pull_row(&mut self, seek: Option<RowNumber>) -> Result<Option<(RowNumber, RowNumber)>> {
        let mut assembled = IteratorResult::default();
        let mut positions: Vec<Option<RowNumber>> = Vec::with_capacity(self.row_number_iters.len());

        for iter in &mut self.row_number_iters {
            let res = match seek {
                Some(pos) => iter.seek_to(pos, 2),
                None => iter.next(),
            }
            .context(ScanIndexSnafu)?;
            match res {
                Some(r) => {
                    positions.push(Some(r.row_number));
                    assembled.entries.extend(r.entries);
                }
                None => positions.push(None),
            }
        }

        if positions.iter().all(Option::is_none) {
            return Ok(None);
        }
        // The level columns are parallel lists; falling out of step means
        // the file is corrupt.
        let first = positions[0].context(CorruptIndexSnafu {
            reason: "row number level columns out of step",
        })?;
        ensure!(
            positions
                .iter()
                .all(|p| p.is_some_and(|p| equal_row_numbers(3, p, first))),
            CorruptIndexSnafu {
                reason: "row number level columns out of step",
            }
        );

        let mut row = RowNumber::empty();
        RowNumberCollector { row: &mut row }.keep_group(&mut assembled);
        Ok(Some((first, row)))
    }

    /// Releases the inner iterators. Also runs on drop.
    pub fn close(&mut self) {
        self.key_iter.close();
        self.scope_iter.close();
        self.value_iter.close();
        for iter in &mut self.row_number_iters {
            iter.close();
        }
        self.done = true;
    }
}

impl<R: ChunkReader + 'static> Drop for IndexIterator<R> {
    fn drop(&mut self) {
        self.close();
    }
}

fn entry_string(result: &IteratorResult, name: &str) -> Result<String> {
    let bytes = result
        .entry(name)
        .and_then(ColumnValue::as_bytes)
        .context(CorruptIndexSnafu {
            reason: format!("missing {name} entry"),
        })?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
