// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Owners of managed coroutines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// The host object a managed coroutine belongs to.
///
/// `is_alive` going false tears the coroutine down on the next latent tick.
/// `pin`/`unpin` bracket every hand-off to another thread; a pinned object
/// must stay resident (not freed) even if it is no longer alive.
pub trait LatentOwner: Send + Sync {
    fn is_alive(&self) -> bool;
    fn pin(&self);
    fn unpin(&self);
}

/// Minimal owner for hosts without their own object lifetime system.
#[derive(Debug, Default)]
pub struct TrackedObject {
    garbage: AtomicBool,
    pins: AtomicUsize,
}

impl TrackedObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// The object is logically dead from now on.
    pub fn mark_garbage(&self) {
        self.garbage.store(true, Ordering::Release);
    }

    pub fn is_garbage(&self) -> bool {
        self.garbage.load(Ordering::Acquire)
    }

    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    /// Alive, or dead but still pinned by an in-flight hand-off.
    pub fn is_resident(&self) -> bool {
        !self.is_garbage() || self.pin_count() > 0
    }
}

impl LatentOwner for TrackedObject {
    fn is_alive(&self) -> bool {
        !self.is_garbage()
    }

    fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        let previous = self.pins.fetch_sub(1, Ordering::AcqRel);
        crate::verify!(previous > 0, "owner unpinned more often than pinned");
    }
}
