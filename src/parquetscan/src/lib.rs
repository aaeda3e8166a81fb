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

//! Predicate-pushdown scanning over nested parquet columns.
//!
//! The building blocks of nested-file queries: [`RowNumber`] identifies a
//! value's position in a tree of repeated columns, [`SyncIterator`] walks one
//! leaf column emitting `(RowNumber, value)` pairs, and [`Predicate`] prunes
//! work at column-chunk, page and value granularity.

pub mod error;
pub mod iterator;
pub mod pool;
pub mod predicate;
pub mod row_number;
pub mod value;

pub use crate::iterator::{GroupPredicate, IteratorResult, ScanFile, SyncIterator};
pub use crate::pool::{PoolItem, Pooled, ResultPool};
pub use crate::predicate::{
    InstrumentedPredicate, IntEqualPredicate, PageBounds, Predicate, StringEqualPredicate,
};
pub use crate::row_number::{
    compare_row_numbers, equal_row_numbers, RowNumber, MAX_DEFINITION_LEVEL,
};
pub use crate::value::ColumnValue;
