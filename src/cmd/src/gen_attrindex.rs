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

use std::fmt;
use std::fs::File;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use snafu::ResultExt;
use tracing::debug;

use attrindex::block::{self, DATA_FILE_NAME, INDEX_FILE_NAME};
use attrindex::model::AttrValue;
use attrindex::stats::{AttrStats, ScopeInfo};
use attrindex::writer::{build_index, write_index, IndexTypes};
use attrindex::{AttrStatsBuilder, TraceReader};

use crate::error::{BlockSnafu, CreateFileSnafu, Result};

/// Attribute keys shown in the stats report.
const MAX_ATTR_PRINTS: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum IndexTypeArg {
    Rows,
    Codes,
}

impl fmt::Display for IndexTypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexTypeArg::Rows => f.write_str("rows"),
            IndexTypeArg::Codes => f.write_str("codes"),
        }
    }
}

/// Generates an attribute index alongside an existing block data file.
#[derive(Args, Debug)]
pub struct GenAttrindexCommand {
    /// The input block directory to read from.
    #[arg(value_name = "BLOCK_PATH")]
    input: PathBuf,

    /// Also index intrinsics like span name, kind and status.
    #[arg(long)]
    add_intrinsics: bool,

    /// The type of index to generate (rows | codes | rows,codes).
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [IndexTypeArg::Rows, IndexTypeArg::Codes]
    )]
    index_types: Vec<IndexTypeArg>,
}

impl GenAttrindexCommand {
    pub fn run(&self) -> Result<()> {
        println!("Analyzing block in {}", self.input.display());

        let meta = block::read_meta(&self.input).context(BlockSnafu)?;
        let (dedicated_resource, dedicated_span) = block::dedicated_columns(&meta);

        let mut builder =
            AttrStatsBuilder::new(self.add_intrinsics, dedicated_resource, dedicated_span);
        let reader =
            TraceReader::open(&self.input.join(DATA_FILE_NAME)).context(BlockSnafu)?;
        for (i, trace) in reader.enumerate() {
            builder.add_trace(&trace.context(BlockSnafu)?);
            if (i + 1) % 1024 == 0 {
                debug!(traces = i + 1, "scanning data file");
            }
        }
        let stats = builder.finish();
        print_stats(&stats);

        let types = IndexTypes {
            rows: self.index_types.contains(&IndexTypeArg::Rows),
            codes: self.index_types.contains(&IndexTypeArg::Codes),
        };
        let index = build_index(stats);
        println!("Generating index with {} rows", index.len());

        let index_path = self.input.join(INDEX_FILE_NAME);
        let out = File::create(&index_path).context(CreateFileSnafu { path: &index_path })?;
        write_index(out, &index, types).context(BlockSnafu)?;

        println!(
            "\nSuccessfully generated attribute index in {}",
            index_path.display()
        );
        Ok(())
    }
}

fn print_stats(stats: &AttrStats) {
    println!("File stats:");
    println!("  Traces    {}", stats.traces);
    println!("  Resources {}", stats.resources);
    println!("  Spans     {}", stats.spans);
    println!("  Events    {}", stats.events);
    println!("  Links     {}", stats.links);
    println!("  Arrays    {}", stats.arrays);

    // Sort attributes by total occurrence count across scopes.
    let mut attrs: Vec<_> = stats.attributes.values().collect();
    attrs.sort_by_key(|attr| {
        std::cmp::Reverse(attr.scopes.values().map(|s| s.count).sum::<usize>())
    });

    println!("\nAttribute stats ({MAX_ATTR_PRINTS} most frequent):");
    println!(
        "{:<40} {:<16} {:>10} {:>12}  {:<52} {:>10}",
        "Name", "Scope", "Count", "Cardinality", "Most common value", "Occurrence"
    );
    for attr in attrs.iter().take(MAX_ATTR_PRINTS) {
        let mut scopes: Vec<_> = attr.scopes.values().collect();
        scopes.sort_by_key(|s| s.scope);
        for scope in scopes {
            let (value, occurrence) = most_common_value(scope);
            println!(
                "{:<40} {:<16} {:>10} {:>12}  {:<52} {:>10}",
                attr.key,
                scope.scope.as_str(),
                scope.count,
                scope.cardinality(),
                value,
                occurrence
            );
        }
    }
    println!();
}

fn most_common_value(scope: &ScopeInfo) -> (String, usize) {
    let mut best: Option<(&AttrValue, usize)> = None;
    for values in [
        &scope.values_string,
        &scope.values_int,
        &scope.values_float,
        &scope.values_bool,
    ] {
        for info in values.values() {
            let occurrence = info.row_numbers.len();
            if best.is_none_or(|(_, n)| occurrence > n) {
                best = Some((&info.value, occurrence));
            }
        }
    }
    match best {
        Some((value, occurrence)) => (display_value(value), occurrence),
        None => (String::new(), 0),
    }
}

/// First element of the value, newlines stripped, truncated to 50 chars.
fn display_value(value: &AttrValue) -> String {
    let mut out = match value {
        AttrValue::String(v) => v.first().cloned().unwrap_or_default(),
        AttrValue::Int(v) => v.first().map(i64::to_string).unwrap_or_default(),
        AttrValue::Float(v) => v.first().map(f64::to_string).unwrap_or_default(),
        AttrValue::Bool(v) => v.first().map(bool::to_string).unwrap_or_default(),
    };
    out = out.replace('\n', " ");
    if out.len() > 50 {
        let mut cut = 47;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("...");
    }
    out
}
