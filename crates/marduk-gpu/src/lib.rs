//! Marduk GPU buffer crate.
//!
//! This crate owns device-memory buffers and the context that creates them:
//! bounds-checked reads and writes, orphaning for streamed data, and
//! buffer-to-buffer copies. Drawing, shaders and windowing live in higher layers.

pub mod backend;
pub mod buffer;
pub mod context;
pub mod device;
pub mod logging;

pub use backend::{BufferHandle, DeviceBackend, HostBackend, WgpuBackend};
pub use buffer::{BindRange, Buffer, BufferError, BufferId, BufferInit, BufferUsage, CopyRegion};
pub use context::{BufferStats, Context};
pub use device::{Gpu, GpuInit};
