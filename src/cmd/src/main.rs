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

//! Command-line tools for trace block data and index files.

mod convert;
mod error;
mod gen_attrindex;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::convert::ConvertCommand;
use crate::error::Result;
use crate::gen_attrindex::GenAttrindexCommand;

#[derive(Parser)]
#[command(name = "traceblock", version, about = "Trace block tooling")]
struct Command {
    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Generate an attribute index alongside an existing data file.
    GenAttrindex(GenAttrindexCommand),
    /// Rewrite a block through the trace model.
    Convert(ConvertCommand),
}

impl Command {
    fn run(&self) -> Result<()> {
        match &self.subcmd {
            SubCommand::GenAttrindex(cmd) => cmd.run(),
            SubCommand::Convert(cmd) => cmd.run(),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = Command::parse();
    if let Err(error) = command.run() {
        eprintln!("{}", snafu::Report::from_error(error));
        std::process::exit(1);
    }
}
