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

use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Block operation failed"))]
    Block {
        source: attrindex::error::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to create {}", path.display()))]
    CreateFile {
        path: PathBuf,
        #[snafu(source)]
        error: IoError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to create directory {}", path.display()))]
    CreateDir {
        path: PathBuf,
        #[snafu(source)]
        error: IoError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to copy {} to {}", from_path.display(), to_path.display()))]
    CopyFile {
        from_path: PathBuf,
        to_path: PathBuf,
        #[snafu(source)]
        error: IoError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to list {}", path.display()))]
    ListDir {
        path: PathBuf,
        #[snafu(source)]
        error: IoError,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
