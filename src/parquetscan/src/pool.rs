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

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Implemented by values that can live in a [`ResultPool`]. `reset` must
/// clear all content while keeping allocated capacity.
pub trait PoolItem: Default + Send {
    fn reset(&mut self);
}

/// A pool for reusing result objects across iterators. The pool is an
/// explicit argument of its consumers rather than process-global state, so
/// lifetimes stay visible at call sites. Reusing items of similar sizes in
/// one pool keeps their internal buffers warm and reduces allocations.
///
/// Contention on the internal lock is acceptable: the pool is a tail-latency
/// optimisation, not a correctness requirement.
pub struct ResultPool<T: PoolItem> {
    items: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T: PoolItem> ResultPool<T> {
    pub fn new(max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            max_idle,
        })
    }

    /// Takes an item from the pool, or creates a fresh one when empty.
    pub fn lease(self: &Arc<Self>) -> Pooled<T> {
        let item = self.items.lock().unwrap().pop().unwrap_or_default();
        Pooled {
            item: Some(item),
            pool: self.clone(),
        }
    }

    fn put(&self, mut item: T) {
        item.reset();
        let mut items = self.items.lock().unwrap();
        if items.len() < self.max_idle {
            items.push(item);
        }
    }

    #[cfg(test)]
    fn idle(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

/// An item leased from a [`ResultPool`]. Returns to its pool on drop, which
/// also covers unwinding and consumers that abandon results early.
pub struct Pooled<T: PoolItem> {
    item: Option<T>,
    pool: Arc<ResultPool<T>>,
}

impl<T: PoolItem> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().unwrap()
    }
}

impl<T: PoolItem> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap()
    }
}

impl<T: PoolItem> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put(item);
        }
    }
}
