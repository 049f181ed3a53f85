// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A small object pool for reusable scratch state.
//!
//! [`Pool::get`] hands out a guard with exclusive access to one instance. When
//! the guard drops, on success and error paths alike, the instance is reset
//! and returned to the free list.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Clears an instance back to its empty state before it is reused.
pub trait Reset {
    fn reset(&mut self);
}

impl Reset for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }
}

pub struct Pool<T: Reset> {
    free: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    max_idle: usize,
}

impl<T: Reset> Pool<T> {
    /// `max_idle` bounds how many released instances are kept around.
    pub fn new(max_idle: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Pool {
            free: Mutex::new(Vec::with_capacity(max_idle)),
            factory: Box::new(factory),
            max_idle,
        }
    }

    pub fn get(&self) -> Pooled<'_, T> {
        #[allow(clippy::expect_used)]
        let reused = self.free.lock().expect("lock poisoned").pop();
        let item = reused.unwrap_or_else(|| (self.factory)());
        Pooled {
            pool: self,
            item: Some(item),
        }
    }

    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn idle(&self) -> usize {
        self.free.lock().expect("lock poisoned").len()
    }

    fn put(&self, mut item: T) {
        item.reset();
        #[allow(clippy::expect_used)]
        let mut free = self.free.lock().expect("lock poisoned");
        if free.len() < self.max_idle {
            free.push(item);
        }
    }
}

impl<T: Reset> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle())
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

pub struct Pooled<'a, T: Reset> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T: Reset> Deref for Pooled<'_, T> {
    type Target = T;

    // Only `drop` takes the item out.
    #[allow(clippy::unwrap_used)]
    fn deref(&self) -> &T {
        self.item.as_ref().unwrap()
    }
}

impl<T: Reset> DerefMut for Pooled<'_, T> {
    #[allow(clippy::unwrap_used)]
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap()
    }
}

impl<T: Reset> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_instance_is_reset_and_reused() {
        let pool: Pool<Vec<u8>> = Pool::new(4, || Vec::with_capacity(64));
        {
            let mut buf = pool.get();
            buf.extend_from_slice(b"dirty");
        }
        assert_eq!(pool.idle(), 1);

        let buf = pool.get();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn instance_returns_on_error_path() {
        fn fails(pool: &Pool<Vec<u8>>) -> Result<(), &'static str> {
            let mut buf = pool.get();
            buf.push(1);
            Err("boom")
        }
        let pool: Pool<Vec<u8>> = Pool::new(4, Vec::new);
        assert!(fails(&pool).is_err());
        assert_eq!(pool.idle(), 1);
        assert!(pool.get().is_empty());
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool: Pool<Vec<u8>> = Pool::new(1, Vec::new);
        let a = pool.get();
        let b = pool.get();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
