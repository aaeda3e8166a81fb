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

//! Block directory layout and `meta.json` handling.
//!
//! A block lives at `<root>/<tenant>/<block-id>/` and holds `data.parquet`,
//! `index.parquet` and `meta.json`. The metadata document round-trips
//! verbatim apart from `Size_` and `FooterSize`, which describe the data
//! file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ensure, ResultExt};

use crate::error::{
    FileTooSmallSnafu, InvalidMagicSnafu, ParseMetaSnafu, ReadFileSnafu, Result, WriteFileSnafu,
};

pub const DATA_FILE_NAME: &str = "data.parquet";
pub const INDEX_FILE_NAME: &str = "index.parquet";
pub const META_FILE_NAME: &str = "meta.json";

/// A dedicated attribute column declared in the block metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedicatedColumn {
    #[serde(rename = "Scope")]
    pub scope: String,
    #[serde(rename = "Name")]
    pub name: String,
}

/// Returns the total file size and the footer length of a parquet file,
/// validating the trailing `PAR1` magic. The footer length lives in the
/// 4 little-endian bytes at `file_size - 8`.
pub fn file_and_footer_size(path: &Path) -> Result<(u64, u32)> {
    let mut file = File::open(path).context(ReadFileSnafu { path })?;
    let size = file
        .metadata()
        .context(ReadFileSnafu { path })?
        .len();
    ensure!(size >= 8, FileTooSmallSnafu { size });

    let mut tail = [0u8; 8];
    file.seek(SeekFrom::End(-8)).context(ReadFileSnafu { path })?;
    file.read_exact(&mut tail).context(ReadFileSnafu { path })?;
    ensure!(
        &tail[4..] == b"PAR1",
        InvalidMagicSnafu {
            found: tail[4..].to_vec(),
        }
    );

    let footer_size = u32::from_le_bytes(tail[..4].try_into().unwrap());
    Ok((size, footer_size))
}

/// Reads `meta.json` of a block directory, keeping unknown fields intact.
pub fn read_meta(block_dir: &Path) -> Result<Value> {
    let path = block_dir.join(META_FILE_NAME);
    let bytes = std::fs::read(&path).context(ReadFileSnafu { path: &path })?;
    serde_json::from_slice(&bytes).context(ParseMetaSnafu { path })
}

pub fn write_meta(block_dir: &Path, meta: &Value) -> Result<()> {
    let path = block_dir.join(META_FILE_NAME);
    let mut bytes = serde_json::to_vec(meta).expect("json value serializes");
    bytes.push(b'\n');
    std::fs::write(&path, bytes).context(WriteFileSnafu { path })
}

/// Rewrites the data-file size fields, leaving everything else untouched.
pub fn update_meta_sizes(meta: &mut Value, size: u64, footer_size: u32) {
    if let Value::Object(fields) = meta {
        fields.insert("Size_".to_string(), Value::from(size));
        fields.insert("FooterSize".to_string(), Value::from(footer_size));
    }
}

/// The dedicated column names declared in the metadata, split by scope and
/// kept in declaration order.
pub fn dedicated_columns(meta: &Value) -> (Vec<String>, Vec<String>) {
    let Some(columns) = meta.get("DedicatedColumns") else {
        return (Vec::new(), Vec::new());
    };
    let Ok(columns) = serde_json::from_value::<Vec<DedicatedColumn>>(columns.clone()) else {
        return (Vec::new(), Vec::new());
    };

    let mut resource = Vec::new();
    let mut span = Vec::new();
    for column in columns {
        match column.scope.as_str() {
            "resource" => resource.push(column.name),
            "span" => span.push(column.name),
            _ => {}
        }
    }
    (resource, span)
}

pub fn meta_str<'a>(meta: &'a Value, key: &str) -> Option<&'a str> {
    meta.get(key).and_then(Value::as_str)
}
