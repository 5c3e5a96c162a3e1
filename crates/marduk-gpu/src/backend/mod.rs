//! Device backends: where buffer bytes actually live.
//!
//! A [`DeviceBackend`] owns raw allocations addressed by [`BufferHandle`].
//! It performs transfers on ranges the caller has already validated; all
//! bounds and lifetime checks happen in [`crate::buffer::Buffer`].

mod host;
mod gpu;

use std::fmt;

use crate::buffer::{BufferError, BufferUsage};

pub use self::host::HostBackend;
pub use self::gpu::WgpuBackend;

/// Opaque reference to one device allocation.
///
/// Handles are never reused within a backend; an orphaned buffer receives a
/// fresh handle, so holders must re-query after [`crate::Buffer::orphan`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BufferHandle(u64);

impl BufferHandle {
    /// Raw handle value. Always non-zero for a handle issued by a backend.
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues monotonically increasing, non-zero handles.
#[derive(Debug)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> BufferHandle {
        let handle = BufferHandle(self.next);
        self.next += 1;
        handle
    }
}

/// The live device a buffer operates against.
///
/// Calls are synchronous: a transfer has completed (or failed) when the method
/// returns. Implementations are single-threaded; the owning context serializes
/// access.
pub trait DeviceBackend {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Largest allocation the device accepts, in bytes.
    fn max_buffer_size(&self) -> u64;

    /// Allocates `data.len()` bytes initialized with `data`.
    fn create_init(
        &mut self,
        label: Option<&str>,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferHandle, BufferError>;

    /// Allocates `size` bytes with unspecified content.
    fn create_uninit(
        &mut self,
        label: Option<&str>,
        size: u64,
        usage: BufferUsage,
    ) -> Result<BufferHandle, BufferError>;

    /// Copies `len` bytes at `offset` back to host memory.
    fn read(&mut self, handle: BufferHandle, offset: u64, len: u64) -> Result<Vec<u8>, BufferError>;

    /// Overwrites `data.len()` bytes at `offset`.
    fn write(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<(), BufferError>;

    /// Copies `len` bytes between two distinct allocations.
    fn copy(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        len: u64,
    ) -> Result<(), BufferError>;

    /// Replaces the allocation behind `handle` with a fresh `size`-byte one.
    ///
    /// The old handle is invalid afterwards and its content unreachable.
    /// On failure the old allocation is left intact. The default allocates
    /// before freeing; backends with in-flight GPU work override this to
    /// avoid stalling on the old allocation.
    fn orphan(
        &mut self,
        handle: BufferHandle,
        label: Option<&str>,
        size: u64,
        usage: BufferUsage,
    ) -> Result<BufferHandle, BufferError> {
        let fresh = self.create_uninit(label, size, usage)?;
        self.free(handle);
        Ok(fresh)
    }

    /// Frees the allocation. Unknown handles are ignored.
    fn free(&mut self, handle: BufferHandle);
}

fn unknown_handle(handle: BufferHandle) -> BufferError {
    BufferError::device(format!("no allocation for handle {handle}"))
}

fn check_max_size(max: u64, size: u64) -> Result<(), BufferError> {
    if size > max {
        return Err(BufferError::invalid(format!(
            "buffer of {size} bytes exceeds the device limit of {max} bytes"
        )));
    }
    Ok(())
}
