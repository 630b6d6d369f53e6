//! Handles, uniform values, and error types shared by every backend.
use std::fmt;
use std::num::NonZeroU32;

use thiserror::Error;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub const fn from_raw(raw: NonZeroU32) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u32 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle!(
    /// A compiled shader stage.
    StageHandle
);
handle!(
    /// A linked vertex + fragment program.
    ProgramHandle
);
handle!(TextureHandle);
handle!(FramebufferHandle);
handle!(BufferHandle);
handle!(
    /// A uniform slot within one program; only meaningful for that program.
    UniformLocation
);

/// Hands out monotonically increasing non-zero ids; an id is never reused
/// within one allocator's lifetime.
#[derive(Debug, Clone)]
pub struct HandleAllocator {
    next: u32,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> NonZeroU32 {
        let raw = NonZeroU32::new(self.next).unwrap_or(NonZeroU32::MIN);
        self.next = self.next.saturating_add(1);
        raw
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Vertex,
    Fragment,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("requested {width}x{height} exceeds the maximum texture dimension {max_dimension}")]
    TooLarge {
        width: u32,
        height: u32,
        max_dimension: u32,
    },
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    PixelSize { expected: usize, actual: usize },
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },
    #[error("allocation failed: {0}")]
    Allocation(String),
}

/// Presentation failures. `ContextLost` is reported to the host and never
/// retried by the renderer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("graphics context lost")]
    ContextLost,
    #[error("surface is outdated")]
    Outdated,
    #[error("timed out acquiring the next surface texture")]
    Timeout,
    #[error("out of memory while presenting")]
    OutOfMemory,
    #[error("presentation failed: {0}")]
    Other(String),
}

impl FrameError {
    /// Failures the render loop may absorb by skipping or reconfiguring.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Outdated | Self::Timeout)
    }
}
