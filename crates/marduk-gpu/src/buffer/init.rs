use std::num::NonZeroU64;

use bytemuck::Pod;

use super::{BufferError, BufferUsage};
use crate::backend::BufferHandle;

/// Parameters for [`crate::Context::buffer`].
///
/// Exactly one of `data` (non-empty) or `reserve` (positive) must be given.
#[derive(Debug, Clone, Default)]
pub struct BufferInit<'a> {
    /// Initial content; the buffer takes its length.
    pub data: Option<&'a [u8]>,
    /// Size of an uninitialized allocation.
    pub reserve: Option<u64>,
    pub usage: BufferUsage,
    /// Debug label forwarded to the device.
    pub label: Option<&'a str>,
}

/// What a [`BufferInit`] resolves to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Contents<'a> {
    Bytes(&'a [u8]),
    Reserve(u64),
}

impl Contents<'_> {
    pub fn len(self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Reserve(size) => size,
        }
    }
}

impl<'a> BufferInit<'a> {
    pub fn from_bytes(data: &'a [u8]) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Initial content from any plain-old-data slice, e.g. `&[f32]` vertices.
    pub fn from_pod<T: Pod>(data: &'a [T]) -> Self {
        Self::from_bytes(bytemuck::cast_slice(data))
    }

    pub fn reserved(size: u64) -> Self {
        Self {
            reserve: Some(size),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    pub(crate) fn contents(&self) -> Result<Contents<'a>, BufferError> {
        let data = self.data.filter(|d| !d.is_empty());
        let reserve = self.reserve.filter(|&n| n > 0);

        match (data, reserve) {
            (Some(bytes), None) => Ok(Contents::Bytes(bytes)),
            (None, Some(size)) => Ok(Contents::Reserve(size)),
            (Some(_), Some(_)) => Err(BufferError::invalid(
                "give either initial data or a reserve size, not both",
            )),
            (None, None) => Err(BufferError::invalid("cannot create an empty buffer")),
        }
    }
}

/// Arguments to [`crate::Buffer::copy_from_buffer`].
///
/// `size: None` copies as much as fits in both buffers from the given offsets.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct CopyRegion {
    pub size: Option<u64>,
    /// Destination offset.
    pub offset: u64,
    pub source_offset: u64,
}

/// A bounds-checked sub-range of a buffer, ready to bind.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BindRange {
    /// Allocation the range was taken from. Stale after an orphan.
    pub handle: BufferHandle,
    pub offset: u64,
    pub size: NonZeroU64,
}

impl BindRange {
    /// Builds the wgpu binding resource for storage or uniform bind groups.
    pub fn as_binding<'a>(&self, buffer: &'a wgpu::Buffer) -> wgpu::BindingResource<'a> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer,
            offset: self.offset,
            size: Some(self.size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_given_is_rejected() {
        let err = BufferInit::default().contents().unwrap_err();
        assert_eq!(
            err,
            BufferError::InvalidArgument("cannot create an empty buffer".to_owned())
        );
    }

    #[test]
    fn empty_data_and_zero_reserve_count_as_missing() {
        let init = BufferInit {
            data: Some(&[][..]),
            reserve: Some(0),
            ..BufferInit::default()
        };
        assert!(init.contents().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn empty_data_falls_back_to_reserve() {
        let init = BufferInit {
            data: Some(&[][..]),
            reserve: Some(8),
            ..BufferInit::default()
        };
        assert_eq!(init.contents(), Ok(Contents::Reserve(8)));
    }

    #[test]
    fn data_and_reserve_together_are_rejected() {
        let init = BufferInit {
            data: Some(&b"abc"[..]),
            reserve: Some(8),
            ..BufferInit::default()
        };
        assert!(init.contents().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn pod_data_is_viewed_as_bytes() {
        let floats = [1.0f32, 2.0, 3.0, 4.0];
        let contents = BufferInit::from_pod(&floats).contents().unwrap();
        assert_eq!(contents.len(), 16);
        assert_eq!(contents, Contents::Bytes(bytemuck::cast_slice(&floats)));
    }

    #[test]
    fn builder_sets_usage_and_label() {
        let init = BufferInit::reserved(4)
            .with_usage(BufferUsage::Stream)
            .with_label("particles");
        assert_eq!(init.usage, BufferUsage::Stream);
        assert_eq!(init.label, Some("particles"));
    }
}
