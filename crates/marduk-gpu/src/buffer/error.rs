use std::fmt;

use super::BufferId;

/// Contract violation or device failure reported by a buffer operation.
///
/// Every variant except [`BufferError::Device`] is a caller bug: retrying the
/// same call cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Malformed creation or orphan parameters.
    InvalidArgument(String),
    /// An offset/length pair exceeds a buffer's bounds.
    OutOfRange {
        /// Which access failed (`"read"`, `"copy source"`, ...).
        op: &'static str,
        offset: u64,
        len: u64,
        /// Size of the buffer the access was checked against.
        size: u64,
    },
    /// The buffer was released explicitly or by its context's teardown.
    UseAfterRelease { id: BufferId },
    /// The backend failed to complete an otherwise valid request.
    Device(String),
}

impl BufferError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub fn is_use_after_release(&self) -> bool {
        matches!(self, Self::UseAfterRelease { .. })
    }
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid buffer argument: {msg}"),
            Self::OutOfRange {
                op,
                offset,
                len,
                size,
            } => write!(
                f,
                "{op} out of range: offset {offset} + length {len} exceeds buffer size {size}"
            ),
            Self::UseAfterRelease { id } => write!(f, "buffer {id} used after release"),
            Self::Device(msg) => write!(f, "device error: {msg}"),
        }
    }
}

impl std::error::Error for BufferError {}
