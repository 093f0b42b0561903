//! Minibatch buffer allocation.
//!
//! The packer obtains its per-stream buffers through the `MemoryProvider`
//! seam so callers can substitute pinned or device-registered allocators.
//! The default heap implementation aligns every allocation to
//! `max(element_size, machine word)`.

use anyhow::{anyhow, ensure, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

pub trait MemoryProvider: Send + Sync {
    /// Allocates a zeroed buffer for `count` elements of `element_size`
    /// bytes, aligned to `max(element_size, machine word)`.
    fn alloc(&self, element_size: usize, count: usize) -> Result<NonNull<u8>>;

    /// Frees a buffer previously returned by `alloc`. Unknown pointers are
    /// ignored.
    fn free(&self, ptr: NonNull<u8>);
}

/// Heap-backed provider.
///
/// Rust's deallocation needs the original `Layout`, so the provider keeps a
/// pointer-to-layout registry instead of stashing the base pointer in front
/// of the aligned block.
#[derive(Default)]
pub struct HeapMemoryProvider {
    allocations: Mutex<HashMap<usize, Layout>>,
}

impl HeapMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.allocations.lock().expect("allocation registry poisoned").len()
    }
}

impl MemoryProvider for HeapMemoryProvider {
    fn alloc(&self, element_size: usize, count: usize) -> Result<NonNull<u8>> {
        ensure!(element_size > 0, "Element size must be > 0");
        ensure!(
            element_size.is_power_of_two(),
            "Element size must be a power of two, got {}",
            element_size
        );
        let size = element_size
            .checked_mul(count)
            .ok_or_else(|| anyhow!("Allocation of {} x {} bytes overflows", count, element_size))?;
        ensure!(size > 0, "Cannot allocate an empty buffer");

        let alignment = element_size.max(std::mem::size_of::<*const u8>());
        let layout = Layout::from_size_align(size, alignment)?;

        // Safety: layout has non-zero size, checked above.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| anyhow!("Heap allocation of {} bytes failed", size))?;

        self.allocations
            .lock()
            .expect("allocation registry poisoned")
            .insert(ptr.as_ptr() as usize, layout);
        Ok(ptr)
    }

    fn free(&self, ptr: NonNull<u8>) {
        let layout = self
            .allocations
            .lock()
            .expect("allocation registry poisoned")
            .remove(&(ptr.as_ptr() as usize));
        if let Some(layout) = layout {
            // Safety: the pointer came from `alloc` with this exact layout
            // and is removed from the registry before deallocation.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}

impl Drop for HeapMemoryProvider {
    fn drop(&mut self) {
        let allocations = std::mem::take(
            &mut *self.allocations.lock().expect("allocation registry poisoned"),
        );
        for (address, layout) in allocations {
            // Safety: every registry entry was produced by `alloc` and not
            // yet freed.
            unsafe { dealloc(address as *mut u8, layout) };
        }
    }
}

/// An owned, reusable byte buffer obtained from a `MemoryProvider`.
pub struct StreamBuffer {
    ptr: NonNull<u8>,
    len: usize,
    provider: Arc<dyn MemoryProvider>,
}

// Safety: the buffer is uniquely owned; the raw pointer is only dereferenced
// through `&self`/`&mut self`, and every provider is `Send + Sync`.
unsafe impl Send for StreamBuffer {}

impl StreamBuffer {
    pub fn allocate(
        provider: Arc<dyn MemoryProvider>,
        element_size: usize,
        count: usize,
    ) -> Result<Self> {
        let ptr = provider.alloc(element_size, count)?;
        Ok(Self {
            ptr,
            len: element_size * count,
            provider,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safety: `ptr` covers `len` initialized (zeroed at allocation)
        // bytes and lives until `Drop`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        self.provider.free(self.ptr);
    }
}
