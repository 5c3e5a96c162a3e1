//! Headless GPU device management.
//!
//! This module is responsible for:
//! - creating the wgpu Instance/Adapter/Device/Queue without a surface
//! - blocking on device polls for transfers that must complete before returning

mod gpu;
mod init;

pub use gpu::Gpu;
pub use init::GpuInit;
