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

use std::io::Error as IoError;
use std::path::PathBuf;

use parquet::errors::ParquetError;
use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to read {}", path.display()))]
    ReadFile {
        path: PathBuf,
        #[snafu(source)]
        error: IoError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to write {}", path.display()))]
    WriteFile {
        path: PathBuf,
        #[snafu(source)]
        error: IoError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to parse block meta {}", path.display()))]
    ParseMeta {
        path: PathBuf,
        #[snafu(source)]
        error: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid parquet magic footer: {found:?}"))]
    InvalidMagic {
        found: Vec<u8>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("File too small to be a parquet file: {size} bytes"))]
    FileTooSmall {
        size: u64,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to build parquet schema"))]
    BuildSchema {
        #[snafu(source)]
        error: ParquetError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to write parquet data"))]
    WriteParquet {
        #[snafu(source)]
        error: ParquetError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to read parquet data"))]
    ReadParquet {
        #[snafu(source)]
        error: ParquetError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Expected to write {expected} rows, got {actual}"))]
    WriteRowCount {
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Unexpected row shape: {reason}"))]
    UnexpectedRowShape {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Corrupt row numbers encoding: {reason}"))]
    CorruptRowNumbers {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Unknown attribute scope tag {tag}"))]
    UnknownScopeTag {
        tag: i64,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Unknown attribute scope {scope}"))]
    UnknownScope {
        scope: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to scan index column"))]
    ScanIndex {
        source: parquetscan::error::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Corrupt index file: {reason}"))]
    CorruptIndex {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
