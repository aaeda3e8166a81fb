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

//! Probes an index of a real block on local disk.
//!
//! Set `BENCH_PATH` to a backend root laid out as
//! `<BENCH_PATH>/<tenant>/<block-id>/{data.parquet,index.parquet,meta.json}`
//! and optionally `BENCH_PROBE` as `scope:key=value` (default
//! `resource:service.name=svc-prod`). Without `BENCH_PATH` the benchmark is
//! skipped.

use std::fs::File;
use std::path::PathBuf;

use criterion::{criterion_group, criterion_main, Criterion};

use attrindex::iterator::IndexIterator;
use attrindex::model::ScopeTag;
use parquetscan::{ResultPool, ScanFile};

fn find_index_file(root: &PathBuf) -> Option<PathBuf> {
    for tenant in std::fs::read_dir(root).ok()? {
        let tenant = tenant.ok()?.path();
        if !tenant.is_dir() {
            continue;
        }
        for block in std::fs::read_dir(&tenant).ok()? {
            let index = block.ok()?.path().join(attrindex::block::INDEX_FILE_NAME);
            if index.is_file() {
                return Some(index);
            }
        }
    }
    None
}

fn bench_index_probe(c: &mut Criterion) {
    let Some(root) = std::env::var_os("BENCH_PATH") else {
        eprintln!("BENCH_PATH is not set, skipping index probe benchmark");
        return;
    };
    let Some(index_path) = find_index_file(&PathBuf::from(root)) else {
        eprintln!("no index.parquet under BENCH_PATH, skipping");
        return;
    };

    let probe = std::env::var("BENCH_PROBE")
        .unwrap_or_else(|_| "resource:service.name=svc-prod".to_string());
    let (scope, rest) = probe.split_once(':').expect("BENCH_PROBE is scope:key=value");
    let (key, value) = rest.split_once('=').expect("BENCH_PROBE is scope:key=value");
    let scope: ScopeTag = scope.parse().expect("valid scope");

    let file = ScanFile::open(File::open(&index_path).unwrap()).unwrap();
    let pool = ResultPool::new(8);

    c.bench_function(&format!("probe/{probe}"), |b| {
        b.iter(|| {
            let mut iter =
                IndexIterator::new(&file, 0, scope, key, value, pool.clone()).unwrap();
            let mut row_numbers = 0;
            while let Some(result) = iter.next().unwrap() {
                row_numbers += result.row_numbers.len();
            }
            iter.close();
            row_numbers
        })
    });
}

criterion_group!(benches, bench_index_probe);
criterion_main!(benches);
