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

use std::fs::File;
use std::path::{Path, PathBuf};

use clap::Args;
use snafu::ResultExt;

use attrindex::block::{self, DATA_FILE_NAME, META_FILE_NAME};
use attrindex::{DataWriter, TraceReader, DEFAULT_DATA_ROW_GROUP_SIZE};

use crate::error::{
    BlockSnafu, CopyFileSnafu, CreateDirSnafu, CreateFileSnafu, ListDirSnafu, Result,
};

/// Rewrites a block's data file through the trace model, refreshing
/// `meta.json` and copying every other file along.
#[derive(Args, Debug)]
pub struct ConvertCommand {
    /// The conversion to perform; only the identity rewrite "4-to-4" is
    /// supported.
    #[arg(value_name = "MODE", value_parser = ["4-to-4"])]
    mode: String,

    /// The input block directory to read from.
    #[arg(value_name = "IN_BLOCK")]
    input: PathBuf,

    /// The output folder to write the block to.
    #[arg(value_name = "OUT_DIR", default_value = "./out")]
    output: PathBuf,
}

impl ConvertCommand {
    pub fn run(&self) -> Result<()> {
        let mut meta = block::read_meta(&self.input).context(BlockSnafu)?;
        let out_dir = resolve_out_dir(&self.output, &meta);
        std::fs::create_dir_all(&out_dir).context(CreateDirSnafu { path: &out_dir })?;

        println!("Creating block in {}", out_dir.display());
        self.convert_data_file(&out_dir)?;

        let (size, footer_size) =
            block::file_and_footer_size(&out_dir.join(DATA_FILE_NAME)).context(BlockSnafu)?;
        block::update_meta_sizes(&mut meta, size, footer_size);
        block::write_meta(&out_dir, &meta).context(BlockSnafu)?;

        self.copy_remaining_files(&out_dir)?;

        println!("Successfully created block with size={size} and footerSize={footer_size}");
        Ok(())
    }

    fn convert_data_file(&self, out_dir: &Path) -> Result<()> {
        let out_path = out_dir.join(DATA_FILE_NAME);
        let out = File::create(&out_path).context(CreateFileSnafu { path: &out_path })?;
        let mut writer =
            DataWriter::new(out, DEFAULT_DATA_ROW_GROUP_SIZE).context(BlockSnafu)?;

        let reader =
            TraceReader::open(&self.input.join(DATA_FILE_NAME)).context(BlockSnafu)?;
        for trace in reader {
            writer.append(&trace.context(BlockSnafu)?).context(BlockSnafu)?;
        }
        let rows = writer.finish().context(BlockSnafu)?;
        println!("Rewrote {rows} traces");
        Ok(())
    }

    fn copy_remaining_files(&self, out_dir: &Path) -> Result<()> {
        let entries = std::fs::read_dir(&self.input).context(ListDirSnafu { path: &self.input })?;
        for entry in entries {
            let entry = entry.context(ListDirSnafu { path: &self.input })?;
            let name = entry.file_name();
            if entry.path().is_dir()
                || name == DATA_FILE_NAME
                || name == META_FILE_NAME
            {
                continue;
            }
            let to = out_dir.join(&name);
            std::fs::copy(entry.path(), &to).context(CopyFileSnafu {
                from_path: entry.path(),
                to_path: &to,
            })?;
        }
        Ok(())
    }
}

/// Appends `<tenant>/<block-id>` to the output directory unless the caller
/// already pointed inside a tenant or block directory.
fn resolve_out_dir(output: &Path, meta: &serde_json::Value) -> PathBuf {
    let block_id = block::meta_str(meta, "BlockID");
    let tenant_id = block::meta_str(meta, "TenantID");
    let last = output.file_name().and_then(|n| n.to_str());

    match (last, tenant_id, block_id) {
        (Some(last), _, Some(block)) if last == block => output.to_path_buf(),
        (Some(last), Some(tenant), Some(block)) if last == tenant => output.join(block),
        (_, Some(tenant), Some(block)) => output.join(tenant).join(block),
        (_, None, Some(block)) => output.join(block),
        _ => output.to_path_buf(),
    }
}
