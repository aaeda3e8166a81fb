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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parquet::file::metadata::ColumnChunkMetaData;
use parquet::file::statistics::Statistics;

use crate::value::ColumnValue;

/// Min/max bounds of one data page, taken from the column index. Bounds are
/// absent when the writer skipped page statistics for the column.
#[derive(Clone, Debug, Default)]
pub struct PageBounds {
    pub min: Option<ColumnValue>,
    pub max: Option<ColumnValue>,
}

/// A pushdown predicate evaluated at decreasing granularity: column chunk,
/// then page, then individual value. Chunks and pages without statistics are
/// always kept.
pub trait Predicate: Send + Sync {
    fn keep_column_chunk(&self, chunk: &ColumnChunkMetaData) -> bool;

    fn keep_page(&self, bounds: &PageBounds) -> bool;

    fn keep_value(&self, value: &ColumnValue) -> bool;
}

/// Keeps chunks, pages and values that can contain one exact byte string.
/// Ordering is byte-lexicographic on the raw column bytes, matching the sort
/// order the index writer uses for string values.
#[derive(Clone, Debug)]
pub struct StringEqualPredicate {
    value: Vec<u8>,
}

impl StringEqualPredicate {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Predicate for StringEqualPredicate {
    fn keep_column_chunk(&self, chunk: &ColumnChunkMetaData) -> bool {
        let Some(stats) = chunk.statistics() else {
            return true;
        };
        match (stats.min_bytes_opt(), stats.max_bytes_opt()) {
            (Some(min), Some(max)) => {
                self.value.as_slice() >= min && self.value.as_slice() <= max
            }
            _ => true,
        }
    }

    fn keep_page(&self, bounds: &PageBounds) -> bool {
        let (Some(min), Some(max)) = (&bounds.min, &bounds.max) else {
            return true;
        };
        match (min.as_bytes(), max.as_bytes()) {
            (Some(min), Some(max)) => self.value.as_slice() >= min && self.value.as_slice() <= max,
            _ => true,
        }
    }

    fn keep_value(&self, value: &ColumnValue) -> bool {
        value.as_bytes() == Some(self.value.as_slice())
    }
}

/// Keeps chunks, pages and values that can contain one exact `i64`.
#[derive(Clone, Debug)]
pub struct IntEqualPredicate {
    value: i64,
}

impl IntEqualPredicate {
    pub fn new(value: i64) -> Self {
        Self { value }
    }
}

impl Predicate for IntEqualPredicate {
    fn keep_column_chunk(&self, chunk: &ColumnChunkMetaData) -> bool {
        let Some(Statistics::Int64(stats)) = chunk.statistics() else {
            return true;
        };
        match (stats.min_opt(), stats.max_opt()) {
            (Some(min), Some(max)) => self.value >= *min && self.value <= *max,
            _ => true,
        }
    }

    fn keep_page(&self, bounds: &PageBounds) -> bool {
        let (Some(min), Some(max)) = (&bounds.min, &bounds.max) else {
            return true;
        };
        match (min.as_i64(), max.as_i64()) {
            (Some(min), Some(max)) => self.value >= min && self.value <= max,
            _ => true,
        }
    }

    fn keep_value(&self, value: &ColumnValue) -> bool {
        value.as_i64() == Some(self.value)
    }
}

/// Counters for one [`InstrumentedPredicate`].
#[derive(Debug, Default)]
pub struct PredicateMetrics {
    pub inspected_column_chunks: AtomicUsize,
    pub kept_column_chunks: AtomicUsize,
    pub inspected_pages: AtomicUsize,
    pub kept_pages: AtomicUsize,
    pub inspected_values: AtomicUsize,
    pub kept_values: AtomicUsize,
}

/// Wraps another predicate and counts what it inspects and keeps. Mostly
/// useful in tests and benchmarks to observe pruning behavior.
pub struct InstrumentedPredicate {
    inner: Box<dyn Predicate>,
    metrics: Arc<PredicateMetrics>,
}

impl InstrumentedPredicate {
    pub fn new(inner: Box<dyn Predicate>) -> Self {
        Self {
            inner,
            metrics: Arc::new(PredicateMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<PredicateMetrics> {
        self.metrics.clone()
    }
}

impl Predicate for InstrumentedPredicate {
    fn keep_column_chunk(&self, chunk: &ColumnChunkMetaData) -> bool {
        self.metrics
            .inspected_column_chunks
            .fetch_add(1, Ordering::Relaxed);
        let keep = self.inner.keep_column_chunk(chunk);
        if keep {
            self.metrics.kept_column_chunks.fetch_add(1, Ordering::Relaxed);
        }
        keep
    }

    fn keep_page(&self, bounds: &PageBounds) -> bool {
        self.metrics.inspected_pages.fetch_add(1, Ordering::Relaxed);
        let keep = self.inner.keep_page(bounds);
        if keep {
            self.metrics.kept_pages.fetch_add(1, Ordering::Relaxed);
        }
        keep
    }

    fn keep_value(&self, value: &ColumnValue) -> bool {
        self.metrics.inspected_values.fetch_add(1, Ordering::Relaxed);
        let keep = self.inner.keep_value(value);
        if keep {
            self.metrics.kept_values.fetch_add(1, Ordering::Relaxed);
        }
        keep
    }
}
