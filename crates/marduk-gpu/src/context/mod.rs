//! Device context: creates buffers and releases them in bulk.
//!
//! A [`Context`] owns the backend and a registry of the buffers it created.
//! Buffers keep a shared reference back to it, so tearing the context down
//! invalidates every buffer it still tracks.

mod registry;

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::backend::{BufferHandle, DeviceBackend, HostBackend, WgpuBackend};
use crate::buffer::init::Contents;
use crate::buffer::{Buffer, BufferError, BufferId, BufferInit, BufferUsage};
use crate::device::GpuInit;

pub use registry::BufferStats;
use registry::Registry;

/// State shared between a context and its buffers.
pub(crate) struct Shared<B> {
    backend: RefCell<B>,
    registry: RefCell<Registry>,
}

impl<B: DeviceBackend> Shared<B> {
    pub fn backend_mut(&self) -> RefMut<'_, B> {
        self.backend.borrow_mut()
    }

    /// Current allocation of a live buffer.
    pub fn handle(&self, id: BufferId) -> Result<BufferHandle, BufferError> {
        self.registry
            .borrow()
            .get(id)
            .map(|entry| entry.handle)
            .ok_or(BufferError::UseAfterRelease { id })
    }

    pub fn is_live(&self, id: BufferId) -> bool {
        self.registry.borrow().contains(id)
    }

    pub fn replace(&self, id: BufferId, handle: BufferHandle, size: u64) {
        self.registry.borrow_mut().replace(id, handle, size);
    }

    pub fn release(&self, id: BufferId) -> Result<(), BufferError> {
        let entry = self
            .registry
            .borrow_mut()
            .remove(id)
            .ok_or(BufferError::UseAfterRelease { id })?;
        self.backend_mut().free(entry.handle);
        log::debug!("released buffer {id} (handle {})", entry.handle);
        Ok(())
    }
}

/// Factory and owner of device buffers.
///
/// Single-threaded: buffers and their context share state through `Rc`, so
/// none of them can cross threads.
pub struct Context<B: DeviceBackend = WgpuBackend> {
    shared: Rc<Shared<B>>,
}

impl Context<WgpuBackend> {
    /// Creates a context on a headless GPU device.
    pub fn headless(init: GpuInit) -> anyhow::Result<Self> {
        Ok(Self::new(WgpuBackend::headless(init)?))
    }
}

impl Context<HostBackend> {
    /// Creates a context whose buffers live in host memory.
    pub fn host() -> Self {
        Self::new(HostBackend::new())
    }
}

impl<B: DeviceBackend> Context<B> {
    pub fn new(backend: B) -> Self {
        log::debug!("creating {} buffer context", backend.name());
        Self {
            shared: Rc::new(Shared {
                backend: RefCell::new(backend),
                registry: RefCell::new(Registry::default()),
            }),
        }
    }

    /// Creates a buffer from initial data or a reserve size.
    ///
    /// Fails with [`BufferError::InvalidArgument`] unless exactly one of the two
    /// yields a positive length.
    pub fn buffer(&self, init: BufferInit<'_>) -> Result<Buffer<B>, BufferError> {
        let contents = init.contents()?;
        let size = contents.len();

        let handle = {
            let mut backend = self.shared.backend_mut();
            match contents {
                Contents::Bytes(bytes) => backend.create_init(init.label, bytes, init.usage)?,
                Contents::Reserve(size) => backend.create_uninit(init.label, size, init.usage)?,
            }
        };

        let id = self.shared.registry.borrow_mut().insert(handle, size);
        log::debug!(
            "created {} buffer {id} of {size} bytes (handle {handle})",
            init.usage
        );

        Ok(Buffer::new(
            Rc::clone(&self.shared),
            id,
            size,
            init.usage,
            init.label.map(str::to_owned),
        ))
    }

    /// Shorthand for `buffer(BufferInit::from_bytes(data))`.
    pub fn buffer_from_bytes(&self, data: &[u8], usage: BufferUsage) -> Result<Buffer<B>, BufferError> {
        self.buffer(BufferInit::from_bytes(data).with_usage(usage))
    }

    /// Shorthand for `buffer(BufferInit::reserved(size))`.
    pub fn buffer_reserved(&self, size: u64, usage: BufferUsage) -> Result<Buffer<B>, BufferError> {
        self.buffer(BufferInit::reserved(size).with_usage(usage))
    }

    /// Frees every buffer still tracked by this context.
    ///
    /// Any later operation on those buffers fails with
    /// [`BufferError::UseAfterRelease`]. Returns how many were released.
    pub fn release_all(&self) -> usize {
        let handles = self.shared.registry.borrow_mut().drain();
        let mut backend = self.shared.backend_mut();
        for &handle in &handles {
            backend.free(handle);
        }
        if !handles.is_empty() {
            log::debug!("released {} buffers at context teardown", handles.len());
        }
        handles.len()
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.registry.borrow().stats()
    }

    /// Borrows the backend, e.g. to fetch raw wgpu buffers for binding.
    ///
    /// Hold the borrow only briefly: buffer operations need it mutably.
    pub fn backend(&self) -> Ref<'_, B> {
        self.shared.backend.borrow()
    }

    /// Largest buffer this context can allocate.
    pub fn max_buffer_size(&self) -> u64 {
        self.backend().max_buffer_size()
    }

    pub(crate) fn shares_state(&self, shared: &Rc<Shared<B>>) -> bool {
        Rc::ptr_eq(&self.shared, shared)
    }
}

impl<B: DeviceBackend> Drop for Context<B> {
    fn drop(&mut self) {
        self.release_all();
    }
}
