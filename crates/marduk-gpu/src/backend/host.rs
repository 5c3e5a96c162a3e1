use std::collections::HashMap;

use super::{check_max_size, unknown_handle, BufferHandle, DeviceBackend, HandleAllocator};
use crate::buffer::{BufferError, BufferUsage};

/// Backend keeping allocations in host memory.
///
/// Behaves like a device with instant transfers. Used where no GPU is
/// available and as the reference backend in tests.
#[derive(Debug)]
pub struct HostBackend {
    handles: HandleAllocator,
    allocations: HashMap<BufferHandle, Vec<u8>>,
    max_buffer_size: u64,
}

impl HostBackend {
    /// Default allocation limit, matching wgpu's default `max_buffer_size`.
    pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 1 << 28;

    pub fn new() -> Self {
        Self::with_max_buffer_size(Self::DEFAULT_MAX_BUFFER_SIZE)
    }

    pub fn with_max_buffer_size(max_buffer_size: u64) -> Self {
        Self {
            handles: HandleAllocator::new(),
            allocations: HashMap::new(),
            max_buffer_size,
        }
    }

    /// Number of allocations currently held.
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Whether `handle` refers to a live allocation.
    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.allocations.contains_key(&handle)
    }

    fn slot(&self, handle: BufferHandle) -> Result<&Vec<u8>, BufferError> {
        self.allocations.get(&handle).ok_or_else(|| unknown_handle(handle))
    }

    fn slot_mut(&mut self, handle: BufferHandle) -> Result<&mut Vec<u8>, BufferError> {
        self.allocations
            .get_mut(&handle)
            .ok_or_else(|| unknown_handle(handle))
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn span(offset: u64, len: u64) -> std::ops::Range<usize> {
    offset as usize..(offset + len) as usize
}

impl DeviceBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn max_buffer_size(&self) -> u64 {
        self.max_buffer_size
    }

    fn create_init(
        &mut self,
        _label: Option<&str>,
        data: &[u8],
        _usage: BufferUsage,
    ) -> Result<BufferHandle, BufferError> {
        check_max_size(self.max_buffer_size, data.len() as u64)?;
        let handle = self.handles.next();
        self.allocations.insert(handle, data.to_vec());
        Ok(handle)
    }

    fn create_uninit(
        &mut self,
        _label: Option<&str>,
        size: u64,
        _usage: BufferUsage,
    ) -> Result<BufferHandle, BufferError> {
        check_max_size(self.max_buffer_size, size)?;
        let handle = self.handles.next();
        self.allocations.insert(handle, vec![0; size as usize]);
        Ok(handle)
    }

    fn read(&mut self, handle: BufferHandle, offset: u64, len: u64) -> Result<Vec<u8>, BufferError> {
        let bytes = self.slot(handle)?;
        Ok(bytes[span(offset, len)].to_vec())
    }

    fn write(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<(), BufferError> {
        let bytes = self.slot_mut(handle)?;
        bytes[span(offset, data.len() as u64)].copy_from_slice(data);
        Ok(())
    }

    fn copy(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        len: u64,
    ) -> Result<(), BufferError> {
        let staged = self.slot(src)?[span(src_offset, len)].to_vec();
        self.slot_mut(dst)?[span(dst_offset, len)].copy_from_slice(&staged);
        Ok(())
    }

    fn free(&mut self, handle: BufferHandle) {
        self.allocations.remove(&handle);
    }
}
