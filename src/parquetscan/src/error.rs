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

use parquet::errors::ParquetError;
use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to read parquet metadata"))]
    ReadMetadata {
        #[snafu(source)]
        error: ParquetError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Column {column} not found in schema"))]
    ColumnNotFound {
        column: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to open column chunk {column} in row group {row_group}"))]
    OpenColumnChunk {
        column: String,
        row_group: usize,
        #[snafu(source)]
        error: ParquetError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to read column {column}"))]
    ReadColumn {
        column: String,
        #[snafu(source)]
        error: ParquetError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to skip {num_records} records in column {column}"))]
    SkipRecords {
        column: String,
        num_records: i64,
        #[snafu(source)]
        error: ParquetError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Unsupported physical type {physical} in column {column}"))]
    UnsupportedColumnType {
        column: String,
        physical: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Unexpected value shape in column {column}: {values} values for {levels} level entries"
    ))]
    ValueCountMismatch {
        column: String,
        values: usize,
        levels: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
