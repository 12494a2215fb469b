//! Bounded free lists for per-request objects.
//!
//! Requests, responses, payloads and stop signals are taken from an
//! [`ObjectPool`] and handed back when the [`Pooled`] guard drops, so every
//! exit path releases each object exactly once.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use crate::pool::{Payload, StopSignal};

/// Objects that can be reset to a reusable state.
pub trait Recycle: Default {
    /// Clear per-request state while keeping allocations.
    fn recycle(&mut self);

    /// Whether the object may go back to the free list.
    fn reusable(&self) -> bool {
        true
    }
}

pub struct ObjectPool<T> {
    free: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T: Recycle> ObjectPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn acquire(&self) -> Pooled<'_, T> {
        let item = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();

        Pooled {
            item: Some(item),
            pool: self,
        }
    }

    /// Number of idle objects.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, mut item: T) {
        item.recycle();
        if !item.reusable() {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.capacity {
            free.push(item);
        }
    }
}

/// Guard returning its object to the pool on drop.
pub struct Pooled<'a, T: Recycle> {
    item: Option<T>,
    pool: &'a ObjectPool<T>,
}

impl<T: Recycle> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled object is only taken on drop"),
        }
    }
}

impl<T: Recycle> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled object is only taken on drop"),
        }
    }
}

impl<T: Recycle> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl Recycle for Payload {
    fn recycle(&mut self) {
        self.context.clear();
        self.body.clear();
        self.codec = Default::default();
    }
}

impl Recycle for StopSignal {
    fn recycle(&mut self) {
        self.drain();
    }

    // The pool may still hold a clone; a shared slot must not be reused.
    fn reusable(&self) -> bool {
        self.is_unique()
    }
}
