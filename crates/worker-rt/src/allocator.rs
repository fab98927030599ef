//! Opaque allocator handle.
//!
//! Memory/array storage is a HAL/device-manager concern. `AllocatorHandle`
//! realizes `allocator` as a cheap, `Clone`-able opaque token that
//! [`crate::worker::WorkerOptions`] threads through to the reactor
//! unchanged -- no allocation behavior is attached to it here.

use std::sync::Arc;

/// An opaque handle to a memory allocator, passed through by [`crate::worker::Worker`]
/// without interpretation. Real device allocator wiring belongs to the HAL
/// layer.
#[derive(Clone)]
pub struct AllocatorHandle(Arc<()>);

impl AllocatorHandle {
    pub fn new() -> Self {
        AllocatorHandle(Arc::new(()))
    }
}

impl Default for AllocatorHandle {
    fn default() -> Self {
        Self::new()
    }
}
