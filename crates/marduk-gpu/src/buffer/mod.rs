//! Device-memory buffers.
//!
//! A [`Buffer`] is one contiguous region of device memory created by a
//! [`crate::Context`]. Every transfer is bounds checked against the buffer's
//! current size before it reaches the backend; nothing is silently truncated.
//!
//! State:
//! - Allocated: the context's registry maps the buffer to a live handle.
//!   `orphan` swaps the handle (and possibly the size) but stays here.
//! - Released: terminal. Reached through `release`, drop, or context
//!   teardown; every operation then fails with `UseAfterRelease`.

mod error;
pub(crate) mod init;
pub(crate) mod range;
mod usage;

use std::fmt;
use std::num::NonZeroU64;
use std::rc::Rc;

use bytemuck::Pod;

use crate::backend::{BufferHandle, DeviceBackend, WgpuBackend};
use crate::context::{Context, Shared};
use range::ByteRange;

pub use error::BufferError;
pub use init::{BindRange, BufferInit, CopyRegion};
pub use usage::BufferUsage;

/// Stable identity of a buffer within its context.
///
/// Unlike [`BufferHandle`], the id survives orphaning.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BufferId(u64);

impl BufferId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A region of device memory with bounds-checked transfers.
pub struct Buffer<B: DeviceBackend = WgpuBackend> {
    shared: Rc<Shared<B>>,
    id: BufferId,
    /// Current logical size; only `orphan` changes it.
    size: u64,
    usage: BufferUsage,
    label: Option<String>,
}

impl<B: DeviceBackend> Buffer<B> {
    pub(crate) fn new(
        shared: Rc<Shared<B>>,
        id: BufferId,
        size: u64,
        usage: BufferUsage,
        label: Option<String>,
    ) -> Self {
        debug_assert!(size > 0);
        Self {
            shared,
            id,
            size,
            usage,
            label,
        }
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Size in bytes. Always positive.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Current device handle.
    ///
    /// Changes on every [`Buffer::orphan`]; re-query it before binding.
    pub fn handle(&self) -> Result<BufferHandle, BufferError> {
        self.shared.handle(self.id)
    }

    pub fn is_released(&self) -> bool {
        !self.shared.is_live(self.id)
    }

    /// Whether this buffer was created by `ctx`.
    pub fn is_owned_by(&self, ctx: &Context<B>) -> bool {
        ctx.shares_state(&self.shared)
    }

    /// Reads `size` bytes starting at `offset`.
    ///
    /// `size: None` reads to the end of the buffer. Fails with
    /// [`BufferError::OutOfRange`] for an empty or out-of-bounds span.
    pub fn read(&self, size: Option<u64>, offset: u64) -> Result<Vec<u8>, BufferError> {
        let handle = self.handle()?;
        let len = size.unwrap_or_else(|| ByteRange::remaining(offset, self.size));
        let range = ByteRange::checked("read", offset, len, self.size)?;

        log::trace!("read {} bytes at {} from buffer {}", range.len, range.offset, self.id);
        self.shared.backend_mut().read(handle, range.offset, range.len)
    }

    /// Overwrites `data.len()` bytes at `offset`.
    ///
    /// Never grows the buffer; orphan to a larger size first.
    pub fn write(&mut self, data: &[u8], offset: u64) -> Result<(), BufferError> {
        let handle = self.handle()?;
        let range = ByteRange::checked("write", offset, data.len() as u64, self.size)?;

        log::trace!("write {} bytes at {} to buffer {}", range.len, range.offset, self.id);
        self.shared.backend_mut().write(handle, range.offset, data)
    }

    /// Writes a plain-old-data slice, e.g. `&[f32]`, at `offset`.
    pub fn write_pod<T: Pod>(&mut self, data: &[T], offset: u64) -> Result<(), BufferError> {
        self.write(bytemuck::cast_slice(data), offset)
    }

    /// Discards the allocation and replaces it with a fresh one.
    ///
    /// The new size is `size` if given, else twice the current size when
    /// `double` is set, else the current size. Old content is not preserved
    /// and [`Buffer::handle`] changes.
    pub fn orphan(&mut self, size: Option<u64>, double: bool) -> Result<(), BufferError> {
        let handle = self.handle()?;
        let new_size = orphan_size(self.size, size, double)?;

        let new_handle = self.shared.backend_mut().orphan(
            handle,
            self.label.as_deref(),
            new_size,
            self.usage,
        )?;
        self.shared.replace(self.id, new_handle, new_size);

        log::debug!(
            "orphaned buffer {} ({} -> {} bytes, handle {handle} -> {new_handle})",
            self.id,
            self.size,
            new_size
        );
        self.size = new_size;
        Ok(())
    }

    /// Copies bytes from `source` into this buffer on the device.
    ///
    /// Both spans are checked independently before anything is copied; a
    /// failure on either side leaves this buffer untouched.
    pub fn copy_from_buffer(&mut self, source: &Buffer<B>, region: CopyRegion) -> Result<(), BufferError> {
        if !Rc::ptr_eq(&self.shared, &source.shared) {
            return Err(BufferError::invalid(
                "cannot copy between buffers of different contexts",
            ));
        }

        let dst = self.handle()?;
        let src = source.handle()?;

        let CopyRegion {
            size,
            offset,
            source_offset,
        } = region;
        let len = size.unwrap_or_else(|| {
            ByteRange::remaining(source_offset, source.size).min(ByteRange::remaining(offset, self.size))
        });
        let src_range = ByteRange::checked("copy source", source_offset, len, source.size)?;
        let dst_range = ByteRange::checked("copy destination", offset, len, self.size)?;

        log::trace!(
            "copy {len} bytes from buffer {}@{} to buffer {}@{}",
            source.id,
            src_range.offset,
            self.id,
            dst_range.offset
        );
        self.shared
            .backend_mut()
            .copy(src, src_range.offset, dst, dst_range.offset, len)
    }

    /// Bounds-checked range for binding as a storage or uniform buffer.
    ///
    /// `size: None` binds to the end of the buffer.
    pub fn bind_range(&self, offset: u64, size: Option<u64>) -> Result<BindRange, BufferError> {
        let handle = self.handle()?;
        let len = size.unwrap_or_else(|| ByteRange::remaining(offset, self.size));
        let range = ByteRange::checked("bind", offset, len, self.size)?;
        let size = NonZeroU64::new(range.len).ok_or(BufferError::OutOfRange {
            op: "bind",
            offset,
            len,
            size: self.size,
        })?;
        Ok(BindRange {
            handle,
            offset: range.offset,
            size,
        })
    }

    /// Frees the device allocation.
    ///
    /// Releasing twice is a [`BufferError::UseAfterRelease`].
    pub fn release(&mut self) -> Result<(), BufferError> {
        self.shared.release(self.id)
    }
}

impl Buffer<WgpuBackend> {
    /// The wgpu buffer currently backing this buffer.
    pub fn raw(&self) -> Result<wgpu::Buffer, BufferError> {
        let handle = self.handle()?;
        self.shared
            .backend_mut()
            .raw(handle)
            .ok_or(BufferError::UseAfterRelease { id: self.id })
    }
}

impl<B: DeviceBackend> fmt::Debug for Buffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .field("label", &self.label)
            .field("released", &self.is_released())
            .finish()
    }
}

impl<B: DeviceBackend> Drop for Buffer<B> {
    fn drop(&mut self) {
        if self.shared.is_live(self.id) {
            let _ = self.shared.release(self.id);
        }
    }
}

/// Resolves the size an orphan reallocates to.
fn orphan_size(current: u64, size: Option<u64>, double: bool) -> Result<u64, BufferError> {
    let doubled = || {
        current
            .checked_mul(2)
            .ok_or_else(|| BufferError::invalid("doubled buffer size overflows"))
    };

    let new_size = match (size, double) {
        (Some(n), true) => {
            let d = doubled()?;
            if n != d {
                return Err(BufferError::invalid(format!(
                    "orphan size {n} conflicts with doubling {current} to {d}"
                )));
            }
            n
        }
        (Some(n), false) => n,
        (None, true) => doubled()?,
        (None, false) => current,
    };

    if new_size == 0 {
        return Err(BufferError::invalid("cannot orphan to an empty buffer"));
    }
    Ok(new_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::logging::{init_logging, LoggingConfig};

    fn ctx() -> Context<HostBackend> {
        init_logging(LoggingConfig::for_tests());
        Context::host()
    }

    fn hello(ctx: &Context<HostBackend>) -> Buffer<HostBackend> {
        ctx.buffer(BufferInit::from_bytes(b"Hello world")).unwrap()
    }

    // ── create ────────────────────────────────────────────────────────────

    #[test]
    fn created_from_data_has_its_length_and_content() {
        let ctx = ctx();
        let buffer = hello(&ctx);
        assert_eq!(buffer.size(), 11);
        assert_eq!(buffer.read(None, 0).unwrap(), b"Hello world");
        assert_eq!(buffer.usage(), BufferUsage::Static);
    }

    #[test]
    fn created_from_pod_reads_back_bytes() {
        let ctx = ctx();
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let buffer = ctx.buffer(BufferInit::from_pod(&data)).unwrap();
        assert_eq!(buffer.size(), 16);
        assert_eq!(buffer.read(None, 0).unwrap(), bytemuck::cast_slice::<f32, u8>(&data));
    }

    #[test]
    fn reserved_buffer_has_requested_size() {
        let ctx = ctx();
        let buffer = ctx
            .buffer(BufferInit::reserved(20).with_label("scratch"))
            .unwrap();
        assert_eq!(buffer.size(), 20);
        assert_eq!(buffer.label(), Some("scratch"));
        assert_eq!(buffer.read(None, 0).unwrap().len(), 20);
    }

    // ── read ──────────────────────────────────────────────────────────────

    #[test]
    fn read_sub_ranges() {
        let ctx = ctx();
        let buffer = hello(&ctx);
        assert_eq!(buffer.read(Some(5), 0).unwrap(), b"Hello");
        assert_eq!(buffer.read(Some(5), 6).unwrap(), b"world");
        assert_eq!(buffer.read(None, 6).unwrap(), b"world");
    }

    #[test]
    fn read_one_byte_past_end_fails() {
        let ctx = ctx();
        let buffer = hello(&ctx);
        assert!(buffer.read(Some(12), 0).unwrap_err().is_out_of_range());
        assert!(buffer.read(Some(6), 6).unwrap_err().is_out_of_range());
    }

    #[test]
    fn read_zero_bytes_fails() {
        let ctx = ctx();
        let buffer = hello(&ctx);
        assert!(buffer.read(Some(0), 0).unwrap_err().is_out_of_range());
        // Defaulted size at the very end is also empty.
        assert!(buffer.read(None, 11).unwrap_err().is_out_of_range());
    }

    // ── write ─────────────────────────────────────────────────────────────

    #[test]
    fn write_round_trips_at_every_offset() {
        let ctx = ctx();
        let mut buffer = ctx.buffer(BufferInit::reserved(16)).unwrap();
        for offset in 0..12 {
            buffer.write(b"abcd", offset).unwrap();
            assert_eq!(buffer.read(Some(4), offset).unwrap(), b"abcd");
        }
    }

    #[test]
    fn write_never_grows_the_buffer() {
        let ctx = ctx();
        let mut buffer = hello(&ctx);
        let err = buffer.write(b"Testing", 5).unwrap_err();
        assert_eq!(
            err,
            BufferError::OutOfRange {
                op: "write",
                offset: 5,
                len: 7,
                size: 11
            }
        );
        assert_eq!(buffer.read(None, 0).unwrap(), b"Hello world");
    }

    #[test]
    fn write_pod_values() {
        let ctx = ctx();
        let mut buffer = ctx.buffer(BufferInit::reserved(8)).unwrap();
        buffer.write_pod(&[7u32], 4).unwrap();
        assert_eq!(buffer.read(Some(4), 4).unwrap(), 7u32.to_ne_bytes());
    }

    // ── orphan ────────────────────────────────────────────────────────────

    #[test]
    fn orphan_resize_then_write() {
        let ctx = ctx();
        let mut buffer = hello(&ctx);
        buffer.orphan(Some(20), false).unwrap();
        assert_eq!(buffer.size(), 20);
        assert_eq!(buffer.read(None, 0).unwrap().len(), 20);

        buffer.write(b"Testing", 0).unwrap();
        assert_eq!(buffer.read(Some(7), 0).unwrap(), b"Testing");
        buffer.write(b"Testing", 10).unwrap();
        assert_eq!(buffer.read(Some(7), 10).unwrap(), b"Testing");

        buffer.orphan(None, true).unwrap();
        assert_eq!(buffer.size(), 40);
    }

    #[test]
    fn orphan_same_size_swaps_handle() {
        let ctx = ctx();
        let mut buffer = hello(&ctx);
        let before = buffer.handle().unwrap();
        buffer.orphan(None, false).unwrap();
        assert_eq!(buffer.size(), 11);
        assert_ne!(buffer.handle().unwrap(), before);
        assert!(!ctx.backend().contains(before));
        assert_eq!(ctx.backend().live_allocations(), 1);
    }

    #[test]
    fn orphan_with_matching_size_and_double() {
        let ctx = ctx();
        let mut buffer = hello(&ctx);
        buffer.orphan(Some(22), true).unwrap();
        assert_eq!(buffer.size(), 22);
    }

    #[test]
    fn orphan_rejects_conflicts_and_zero() {
        let ctx = ctx();
        let mut buffer = hello(&ctx);
        assert!(buffer.orphan(Some(30), true).unwrap_err().is_invalid_argument());
        assert!(buffer.orphan(Some(0), false).unwrap_err().is_invalid_argument());
        // Failed orphans leave the buffer as it was.
        assert_eq!(buffer.size(), 11);
        assert_eq!(buffer.read(None, 0).unwrap(), b"Hello world");
    }

    #[test]
    fn orphan_rejected_by_device_leaves_buffer_intact() {
        init_logging(LoggingConfig::for_tests());
        let ctx = Context::new(HostBackend::with_max_buffer_size(16));
        let mut buffer = hello(&ctx);
        let handle = buffer.handle().unwrap();
        let before = ctx.stats();

        let err = buffer.orphan(Some(32), false).unwrap_err();
        assert!(err.is_invalid_argument());

        assert_eq!(buffer.size(), 11);
        assert!(!buffer.is_released());
        assert_eq!(buffer.handle().unwrap(), handle);
        assert_eq!(buffer.read(None, 0).unwrap(), b"Hello world");
        assert_eq!(ctx.stats(), before);
        assert_eq!(ctx.backend().live_allocations(), 1);

        // The buffer stays fully usable afterwards.
        buffer.write(b"HELLO", 0).unwrap();
        buffer.orphan(Some(16), false).unwrap();
        assert_eq!(buffer.size(), 16);
    }

    #[test]
    fn orphan_size_resolution() {
        assert_eq!(orphan_size(8, None, false), Ok(8));
        assert_eq!(orphan_size(8, None, true), Ok(16));
        assert_eq!(orphan_size(8, Some(3), false), Ok(3));
        assert!(orphan_size(u64::MAX, None, true).unwrap_err().is_invalid_argument());
    }

    // ── copy ──────────────────────────────────────────────────────────────

    #[test]
    fn copy_checks_both_sides() {
        let ctx = ctx();
        let mut buffer = hello(&ctx);
        let source = ctx.buffer(BufferInit::reserved(20)).unwrap();

        buffer
            .copy_from_buffer(&source, CopyRegion { size: Some(10), ..CopyRegion::default() })
            .unwrap();

        let err = buffer
            .copy_from_buffer(
                &source,
                CopyRegion { size: Some(10), source_offset: 15, ..CopyRegion::default() },
            )
            .unwrap_err();
        assert!(matches!(err, BufferError::OutOfRange { op: "copy source", .. }));

        let err = buffer
            .copy_from_buffer(
                &source,
                CopyRegion { size: Some(10), offset: 15, ..CopyRegion::default() },
            )
            .unwrap_err();
        assert!(matches!(err, BufferError::OutOfRange { op: "copy destination", .. }));
    }

    #[test]
    fn failed_copy_leaves_destination_untouched() {
        let ctx = ctx();
        let mut buffer = hello(&ctx);
        let source = ctx.buffer(BufferInit::from_bytes(b"XXXXXXXXXXXX")).unwrap();
        let region = CopyRegion { size: Some(6), offset: 6, source_offset: 0 };
        assert!(buffer.copy_from_buffer(&source, region).is_err());
        assert_eq!(buffer.read(None, 0).unwrap(), b"Hello world");
    }

    #[test]
    fn copy_moves_bytes() {
        let ctx = ctx();
        let mut buffer = hello(&ctx);
        let source = ctx.buffer(BufferInit::from_bytes(b"WORLD")).unwrap();
        let region = CopyRegion { offset: 6, ..CopyRegion::default() };
        buffer.copy_from_buffer(&source, region).unwrap();
        assert_eq!(buffer.read(None, 0).unwrap(), b"Hello WORLD");
    }

    #[test]
    fn copy_default_size_is_the_smaller_remainder() {
        let ctx = ctx();
        let mut small = ctx.buffer(BufferInit::from_bytes(b"abcd")).unwrap();
        let large = ctx.buffer(BufferInit::from_bytes(b"0123456789")).unwrap();

        let region = CopyRegion { source_offset: 3, ..CopyRegion::default() };
        small.copy_from_buffer(&large, region).unwrap();
        assert_eq!(small.read(None, 0).unwrap(), b"3456");
    }

    #[test]
    fn copy_across_contexts_is_rejected() {
        let a = ctx();
        let b = Context::host();
        let mut dst = hello(&a);
        let src = hello(&b);
        let err = dst.copy_from_buffer(&src, CopyRegion::default()).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn copy_from_released_source_fails() {
        let ctx = ctx();
        let mut dst = hello(&ctx);
        let mut src = hello(&ctx);
        src.release().unwrap();
        let err = dst.copy_from_buffer(&src, CopyRegion::default()).unwrap_err();
        assert_eq!(err, BufferError::UseAfterRelease { id: src.id() });
    }

    // ── bind ──────────────────────────────────────────────────────────────

    #[test]
    fn bind_range_is_bounds_checked() {
        let ctx = ctx();
        let buffer = ctx.buffer(BufferInit::reserved(64)).unwrap();
        let range = buffer.bind_range(16, None).unwrap();
        assert_eq!(range.offset, 16);
        assert_eq!(range.size.get(), 48);
        assert_eq!(range.handle, buffer.handle().unwrap());
        assert!(buffer.bind_range(32, Some(64)).unwrap_err().is_out_of_range());
    }

    // ── release ───────────────────────────────────────────────────────────

    #[test]
    fn release_is_terminal() {
        let ctx = ctx();
        let mut buffer = hello(&ctx);
        buffer.release().unwrap();
        assert!(buffer.is_released());
        assert_eq!(ctx.backend().live_allocations(), 0);
        assert!(buffer.read(None, 0).unwrap_err().is_use_after_release());
        assert!(buffer.bind_range(0, None).unwrap_err().is_use_after_release());
        assert!(buffer.release().unwrap_err().is_use_after_release());
        // Size is still reported after release.
        assert_eq!(buffer.size(), 11);
    }
}
