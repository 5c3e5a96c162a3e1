use std::fmt;
use std::str::FromStr;

use super::BufferError;

/// How often a buffer's content is expected to change.
///
/// The hint is fixed at creation. Backends consult it when a buffer is
/// orphaned to decide whether the old allocation is worth recycling.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BufferUsage {
    /// Written once, drawn many times.
    #[default]
    Static,
    /// Rewritten occasionally.
    Dynamic,
    /// Rewritten every frame, typically after an orphan.
    Stream,
}

impl BufferUsage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Stream => "stream",
        }
    }

    /// Whether orphaned allocations of this kind are recycled.
    #[inline]
    pub fn recycles_on_orphan(self) -> bool {
        !matches!(self, Self::Static)
    }
}

impl fmt::Display for BufferUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BufferUsage {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Self::Static),
            "dynamic" => Ok(Self::Dynamic),
            "stream" => Ok(Self::Stream),
            other => Err(BufferError::invalid(format!(
                "unknown usage hint {other:?} (expected static, dynamic or stream)"
            ))),
        }
    }
}
