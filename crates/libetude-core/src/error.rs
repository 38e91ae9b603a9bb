//! The closed error taxonomy shared by every layer of the runtime.
//!
//! Every fallible operation in this crate (and in `libetude-world`,
//! `libetude-graph-world`, `libetude-config` above it) returns a
//! [`LibetudeError`] drawn from the fixed [`ErrorKind`] set below. Each kind
//! maps to a stable integer code via [`ErrorKind::code`] so that C-style
//! bindings can surface it without depending on Rust's `Display` machinery.

#[cfg(not(feature = "std"))]
use alloc::string::String;

use core::fmt;

/// The closed set of error kinds producers may return.
///
/// New variants must not be added silently: the Engine API in
/// `libetude-graph-world` exposes these as stable numeric codes via
/// [`ErrorKind::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Null pointer, negative/zero sizes, shape mismatch, range violation.
    InvalidArgument,
    /// Pool growth refused, allocation exceeds cap.
    OutOfMemory,
    /// Engine/component method called before init.
    NotInitialized,
    /// Second init on a live component.
    AlreadyInitialized,
    /// Wrong lifecycle order (e.g. add node after build).
    InvalidState,
    /// Missing node/operator/cache entry/profile span.
    NotFound,
    /// Duplicate connect, duplicate registration.
    AlreadyExists,
    /// Profiler/queue capacity exceeded.
    BufferFull,
    /// Topological sort failed.
    Cycle,
    /// Execution cancelled or timed out.
    Cancelled,
    /// File read/write failed.
    Io,
    /// Corrupt file header or payload.
    InvalidFormat,
    /// Feature unavailable on this build/hardware.
    Unsupported,
    /// Catch-all for unexpected failures.
    Runtime,
}

impl ErrorKind {
    /// The stable integer code for this kind, for FFI/ABI stability.
    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => 1,
            ErrorKind::OutOfMemory => 2,
            ErrorKind::NotInitialized => 3,
            ErrorKind::AlreadyInitialized => 4,
            ErrorKind::InvalidState => 5,
            ErrorKind::NotFound => 6,
            ErrorKind::AlreadyExists => 7,
            ErrorKind::BufferFull => 8,
            ErrorKind::Cycle => 9,
            ErrorKind::Cancelled => 10,
            ErrorKind::Io => 11,
            ErrorKind::InvalidFormat => 12,
            ErrorKind::Unsupported => 13,
            ErrorKind::Runtime => 14,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::NotInitialized => "not initialized",
            ErrorKind::AlreadyInitialized => "already initialized",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::BufferFull => "buffer full",
            ErrorKind::Cycle => "cycle detected",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io error",
            ErrorKind::InvalidFormat => "invalid format",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Runtime => "runtime error",
        };
        f.write_str(s)
    }
}

/// An error carrying one of the closed [`ErrorKind`]s plus a human-readable
/// message. This is also written to the per-thread last-error slot (see
/// [`set_last_error`] / [`take_last_error`]) whenever it is constructed via
/// [`LibetudeError::new`], mirroring the `get_last_error()` contract of the
/// Engine API.
#[derive(Debug, Clone)]
pub struct LibetudeError {
    kind: ErrorKind,
    message: String,
}

impl LibetudeError {
    /// Builds a new error and records it as the thread's last error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let err = Self {
            kind,
            message: message.into(),
        };
        set_last_error(err.clone());
        err
    }

    /// The closed-taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Shorthand constructors, one per [`ErrorKind`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }
    /// See [`ErrorKind::OutOfMemory`].
    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfMemory, msg)
    }
    /// See [`ErrorKind::NotInitialized`].
    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotInitialized, msg)
    }
    /// See [`ErrorKind::AlreadyInitialized`].
    pub fn already_initialized(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyInitialized, msg)
    }
    /// See [`ErrorKind::InvalidState`].
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, msg)
    }
    /// See [`ErrorKind::NotFound`].
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    /// See [`ErrorKind::AlreadyExists`].
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, msg)
    }
    /// See [`ErrorKind::BufferFull`].
    pub fn buffer_full(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BufferFull, msg)
    }
    /// See [`ErrorKind::Cycle`].
    pub fn cycle(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cycle, msg)
    }
    /// See [`ErrorKind::Cancelled`].
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, msg)
    }
    /// See [`ErrorKind::Io`].
    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }
    /// See [`ErrorKind::InvalidFormat`].
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidFormat, msg)
    }
    /// See [`ErrorKind::Unsupported`].
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, msg)
    }
    /// See [`ErrorKind::Runtime`].
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, msg)
    }
}

impl fmt::Display for LibetudeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LibetudeError {}

#[cfg(feature = "std")]
impl From<std::io::Error> for LibetudeError {
    fn from(e: std::io::Error) -> Self {
        LibetudeError::io(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, LibetudeError>;

#[cfg(feature = "std")]
thread_local! {
    static LAST_ERROR: core::cell::RefCell<Option<LibetudeError>> = const { core::cell::RefCell::new(None) };
}

/// Records `err` in the calling thread's last-error slot.
///
/// No-op under `no_std` — there is no per-thread storage without `std`, so
/// embedded callers rely solely on the returned `Result`.
#[cfg(feature = "std")]
pub fn set_last_error(err: LibetudeError) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(err));
}

#[cfg(not(feature = "std"))]
pub fn set_last_error(_err: LibetudeError) {}

/// Returns (and clears) the calling thread's last recorded error, mirroring
/// the Engine API's `get_last_error()` contract.
#[cfg(feature = "std")]
pub fn take_last_error() -> Option<LibetudeError> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

#[cfg(not(feature = "std"))]
pub fn take_last_error() -> Option<LibetudeError> {
    None
}
