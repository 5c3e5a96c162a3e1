use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use wgpu::util::DeviceExt;

use super::{check_max_size, unknown_handle, BufferHandle, DeviceBackend, HandleAllocator};
use crate::buffer::range::{align_down, align_up};
use crate::buffer::{BufferError, BufferUsage};
use crate::device::{Gpu, GpuInit};

/// Copy offsets and sizes must be multiples of this.
const ALIGN: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Retired allocations kept for reuse by streamed buffers.
const RETIRED_CAPACITY: usize = 8;

/// Every buffer may be bound for any purpose; the render layer decides.
const BUFFER_USAGES: wgpu::BufferUsages = wgpu::BufferUsages::VERTEX
    .union(wgpu::BufferUsages::INDEX)
    .union(wgpu::BufferUsages::UNIFORM)
    .union(wgpu::BufferUsages::STORAGE)
    .union(wgpu::BufferUsages::INDIRECT)
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

struct Slot {
    buffer: wgpu::Buffer,
}

/// An orphaned allocation that may still be read by submitted GPU work.
struct Retired {
    buffer: wgpu::Buffer,
    /// Set once all work submitted before retirement has completed.
    idle: Arc<AtomicBool>,
}

/// Backend allocating `wgpu::Buffer`s on a headless [`Gpu`].
///
/// Allocations are padded to [`wgpu::COPY_BUFFER_ALIGNMENT`]. Unaligned reads
/// and writes are widened to the enclosing aligned span, so callers may use any
/// byte offset.
pub struct WgpuBackend {
    gpu: Gpu,
    handles: HandleAllocator,
    slots: HashMap<BufferHandle, Slot>,
    retired: VecDeque<Retired>,
    max_buffer_size: u64,
}

impl WgpuBackend {
    pub fn new(gpu: Gpu) -> Self {
        let max_buffer_size = gpu.device().limits().max_buffer_size;
        Self {
            gpu,
            handles: HandleAllocator::new(),
            slots: HashMap::new(),
            retired: VecDeque::new(),
            max_buffer_size,
        }
    }

    /// Acquires a headless device and wraps it.
    pub fn headless(init: GpuInit) -> anyhow::Result<Self> {
        Ok(Self::new(Gpu::new_blocking(init)?))
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    /// Returns the wgpu buffer behind `handle`, for binding in draw calls.
    ///
    /// The clone refers to the same allocation; it is not kept alive across an
    /// orphan or release of the owning buffer.
    pub fn raw(&self, handle: BufferHandle) -> Option<wgpu::Buffer> {
        self.slots.get(&handle).map(|slot| slot.buffer.clone())
    }

    /// Number of orphaned allocations waiting for reuse.
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    fn buffer(&self, handle: BufferHandle) -> Result<wgpu::Buffer, BufferError> {
        self.raw(handle).ok_or_else(|| unknown_handle(handle))
    }

    fn allocate(&mut self, label: Option<&str>, size: u64) -> wgpu::Buffer {
        self.gpu.device().create_buffer(&wgpu::BufferDescriptor {
            label,
            size: align_up(size, ALIGN),
            usage: BUFFER_USAGES,
            mapped_at_creation: false,
        })
    }

    fn insert(&mut self, buffer: wgpu::Buffer) -> BufferHandle {
        let handle = self.handles.next();
        self.slots.insert(handle, Slot { buffer });
        handle
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.gpu.queue().submit(std::iter::once(encoder.finish()));
    }

    /// Reads an aligned span through a mappable staging buffer.
    fn read_aligned(&self, buffer: &wgpu::Buffer, start: u64, len: u64) -> Result<Vec<u8>, BufferError> {
        debug_assert!(start % ALIGN == 0 && len % ALIGN == 0);

        let device = self.gpu.device();
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("marduk read staging"),
            size: len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("marduk read encoder"),
        });
        encoder.copy_buffer_to_buffer(buffer, start, &staging, 0, len);
        self.submit(encoder);

        let (tx, rx) = flume::bounded(1);
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });

        self.gpu
            .poll_blocking()
            .map_err(|err| BufferError::device(format!("device poll failed: {err}")))?;

        rx.recv()
            .map_err(|_| BufferError::device("staging map callback never ran"))?
            .map_err(|err| BufferError::device(format!("failed to map staging buffer: {err}")))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn retire(&mut self, buffer: wgpu::Buffer) {
        let idle = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&idle);
        self.gpu
            .queue()
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));

        self.retired.push_back(Retired { buffer, idle });
        while self.retired.len() > RETIRED_CAPACITY {
            self.retired.pop_front();
        }
    }

    /// Takes a retired allocation of exactly `capacity` bytes the GPU is done with.
    fn take_idle(&mut self, capacity: u64) -> Option<wgpu::Buffer> {
        self.gpu.poll();
        let index = self
            .retired
            .iter()
            .position(|r| r.buffer.size() == capacity && r.idle.load(Ordering::Acquire))?;
        self.retired.remove(index).map(|r| r.buffer)
    }
}

impl DeviceBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn max_buffer_size(&self) -> u64 {
        self.max_buffer_size
    }

    fn create_init(
        &mut self,
        label: Option<&str>,
        data: &[u8],
        _usage: BufferUsage,
    ) -> Result<BufferHandle, BufferError> {
        check_max_size(self.max_buffer_size, align_up(data.len() as u64, ALIGN))?;

        // create_buffer_init pads the allocation up to COPY_BUFFER_ALIGNMENT.
        let buffer = self
            .gpu
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label,
                contents: data,
                usage: BUFFER_USAGES,
            });
        Ok(self.insert(buffer))
    }

    fn create_uninit(
        &mut self,
        label: Option<&str>,
        size: u64,
        _usage: BufferUsage,
    ) -> Result<BufferHandle, BufferError> {
        check_max_size(self.max_buffer_size, align_up(size, ALIGN))?;
        let buffer = self.allocate(label, size);
        Ok(self.insert(buffer))
    }

    fn read(&mut self, handle: BufferHandle, offset: u64, len: u64) -> Result<Vec<u8>, BufferError> {
        let buffer = self.buffer(handle)?;
        let start = align_down(offset, ALIGN);
        let end = align_up(offset + len, ALIGN);

        let span = self.read_aligned(&buffer, start, end - start)?;
        let head = (offset - start) as usize;
        Ok(span[head..head + len as usize].to_vec())
    }

    fn write(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<(), BufferError> {
        let buffer = self.buffer(handle)?;
        let len = data.len() as u64;

        if offset % ALIGN == 0 && len % ALIGN == 0 {
            self.gpu.queue().write_buffer(&buffer, offset, data);
            return Ok(());
        }

        // Patch the edges of the enclosing aligned span.
        let start = align_down(offset, ALIGN);
        let end = align_up(offset + len, ALIGN);
        let mut span = self.read_aligned(&buffer, start, end - start)?;
        let head = (offset - start) as usize;
        span[head..head + data.len()].copy_from_slice(data);
        self.gpu.queue().write_buffer(&buffer, start, &span);
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
        let aligned = src_offset % ALIGN == 0 && dst_offset % ALIGN == 0 && len % ALIGN == 0;
        if !aligned {
            log::trace!("unaligned copy of {len} bytes routed through host memory");
            let bytes = self.read(src, src_offset, len)?;
            return self.write(dst, dst_offset, &bytes);
        }

        let source = self.buffer(src)?;
        let destination = self.buffer(dst)?;
        let mut encoder = self
            .gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("marduk copy encoder"),
            });
        encoder.copy_buffer_to_buffer(&source, src_offset, &destination, dst_offset, len);
        self.submit(encoder);
        Ok(())
    }

    fn orphan(
        &mut self,
        handle: BufferHandle,
        label: Option<&str>,
        size: u64,
        usage: BufferUsage,
    ) -> Result<BufferHandle, BufferError> {
        let capacity = align_up(size, ALIGN);
        check_max_size(self.max_buffer_size, capacity)?;
        let old = self.slots.remove(&handle).ok_or_else(|| unknown_handle(handle))?;

        if !usage.recycles_on_orphan() {
            // Dropping defers the free until submitted work no longer uses it.
            drop(old);
            let buffer = self.allocate(label, size);
            return Ok(self.insert(buffer));
        }

        self.retire(old.buffer);
        let buffer = match self.take_idle(capacity) {
            Some(buffer) => {
                log::trace!("reusing retired allocation of {capacity} bytes");
                buffer
            }
            None => self.allocate(label, size),
        };
        Ok(self.insert(buffer))
    }

    fn free(&mut self, handle: BufferHandle) {
        if let Some(slot) = self.slots.remove(&handle) {
            slot.buffer.destroy();
        }
    }
}
