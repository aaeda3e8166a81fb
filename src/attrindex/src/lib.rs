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

//! The attribute inverted-index layer of the trace block store.
//!
//! A block's data file holds traces as nested columnar rows; the index file
//! maps every `(scope, key, value)` attribute occurrence to the row
//! coordinates where it appears, so equality probes touch only the matching
//! rows. Building flows `data file -> AttrStatsBuilder -> build_index ->
//! write_index`; querying flows `probe -> IndexIterator -> row numbers`.

pub mod block;
pub mod codec;
pub mod data;
pub mod error;
pub mod iterator;
pub mod model;
pub mod schema;
pub mod shred;
pub mod stats;
pub mod writer;

pub use crate::codec::{row_numbers_decode, row_numbers_encode};
pub use crate::data::{DataWriter, TraceReader, DEFAULT_DATA_ROW_GROUP_SIZE};
pub use crate::iterator::{IndexIterator, IndexResult};
pub use crate::model::{Attribute, AttrValue, ScopeTag, Trace};
pub use crate::stats::{AttrStats, AttrStatsBuilder};
pub use crate::writer::{build_index, estimate_rows_per_row_group, write_index, IndexTypes};
