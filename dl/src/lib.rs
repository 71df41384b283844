// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A thin safe layer over a dynamically loaded libgpiod.
//!
//! Two ABI-incompatible major generations of libgpiod exist in the wild,
//! shipped as `libgpiod.so.0`/`.1`/`.2` (the v1 API) and `libgpiod.so.3`
//! (the v2 API). This crate does not link either at build time; the
//! [`v1::V1Lib`] and [`v2::V2Lib`] types `dlopen` whichever soname is
//! installed and resolve its entry points on demand.
//!
//! The [`V1Api`] and [`V2Api`] traits describe the surface the higher
//! layer consumes, shaped so a call either succeeds with a live
//! [`RawHandle`] (or data) or fails with an [`Error`]; null returns are
//! unrepresentable as handles.

pub use errno::Errno;
use std::num::NonZeroUsize;
use std::os::raw::c_void;
use std::time::Duration;

/// This module binds the libgpiod v1 API, shipped as `libgpiod.so.0`,
/// `libgpiod.so.1` and `libgpiod.so.2`.
pub mod v1;

/// This module binds the libgpiod v2 API, shipped as `libgpiod.so.3`.
pub mod v2;

/// An opaque token for a live native object.
///
/// Tokens are produced by successful native constructor calls and consumed
/// by the matching free function. A null native pointer cannot be
/// represented, so "failed to allocate" is always an [`Error`], never a
/// handle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RawHandle(NonZeroUsize);

impl RawHandle {
    /// Wrap a pointer returned by a native constructor.
    ///
    /// Returns `None` for null, the native sentinel for failure.
    pub fn from_ptr(p: *mut c_void) -> Option<RawHandle> {
        NonZeroUsize::new(p as usize).map(RawHandle)
    }

    /// Fabricate a handle from a non-zero token value.
    ///
    /// Intended for test doubles standing in for a native library.
    pub fn from_token(t: usize) -> Option<RawHandle> {
        NonZeroUsize::new(t).map(RawHandle)
    }

    /// The native pointer this token stands for.
    pub fn as_ptr(&self) -> *mut c_void {
        self.0.get() as *mut c_void
    }
}

/// Errors returned by the native layer.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The shared library could not be loaded.
    #[error("failed to load {library}: {detail}")]
    Load { library: String, detail: String },

    /// The loaded library does not provide a required entry point.
    #[error("{library} does not provide {symbol}: {detail}")]
    Symbol {
        library: String,
        symbol: &'static str,
        detail: String,
    },

    /// A native call reported failure via its return value.
    #[error("{call} failed: {errno}")]
    Os { call: &'static str, errno: Errno },

    /// A native call returned a value outside its documented range.
    #[error("{call} returned unexpected {field}: {value}")]
    BadResponse {
        call: &'static str,
        field: &'static str,
        value: i64,
    },
}

impl Error {
    /// Capture the current `errno` for a failed call.
    ///
    /// Must be constructed immediately after the failing native call.
    pub(crate) fn os(call: &'static str) -> Error {
        Error::Os {
            call,
            errno: errno::errno(),
        }
    }
}

/// The result of native layer calls.
pub type Result<T> = std::result::Result<T, Error>;

/// The direction of a line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Direction {
    #[default]
    Input,
    Output,
}

/// The edges a watched line reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

/// The transition that triggered an edge event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    Rising,
    Falling,
}

/// An edge event as read from the native layer.
///
/// The v1 API does not provide the offset or sequence numbers; the
/// offset is `None`, the counters zero, and the caller fills in the
/// offset it waited on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawEdgeEvent {
    pub kind: EventKind,
    pub timestamp_ns: u64,
    /// The line the event occurred on, when the API reports it.
    pub offset: Option<u32>,
    /// Counter over all lines in the originating request, from 0.
    pub seqno: u64,
    /// Counter for the originating line, from 0.
    pub line_seqno: u64,
}

/// The publicly available information for a chip.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChipInfo {
    pub name: String,
    pub label: String,
    pub num_lines: u32,
}

/// The publicly available information for a line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineInfo {
    pub offset: u32,
    pub name: String,
    pub consumer: String,
    pub used: bool,
    pub direction: Direction,
}

/// The trigger for an info change event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InfoChangeKind {
    Requested,
    Released,
    Reconfigured,
}

/// A change to the information for a watched line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawInfoChangeEvent {
    pub kind: InfoChangeKind,
    pub timestamp_ns: u64,
    pub info: LineInfo,
}

/// The configuration applied when requesting or reconfiguring lines.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineConfig {
    pub direction: Direction,
    /// Arm edge detection; implies an input line.
    pub edge: Option<Edge>,
    /// The value driven on request, for outputs.
    pub initial_value: Option<bool>,
}

/// The libgpiod v1 entry points consumed by the line drivers.
///
/// v1 line objects are owned by their chip; releasing a line undoes the
/// request, while the object itself lives until the chip is closed, so
/// lines must be released before their chip.
pub trait V1Api: Send + Sync {
    /// Open the chip with the given number.
    fn chip_open(&self, index: u32) -> Result<RawHandle>;

    /// Close a chip, invalidating its lines.
    fn chip_close(&self, chip: RawHandle);

    /// The name, label and line count of a chip.
    fn chip_info(&self, chip: RawHandle) -> Result<ChipInfo>;

    /// The (chip-owned) line object at an offset.
    fn line_get(&self, chip: RawHandle, offset: u32) -> Result<RawHandle>;

    /// Request a line as an input.
    fn line_request_input(&self, line: RawHandle) -> Result<()>;

    /// Request a line as an output driving `initial`.
    fn line_request_output(&self, line: RawHandle, initial: bool) -> Result<()>;

    /// Request a line for edge events.
    fn line_request_edges(&self, line: RawHandle, edge: Edge) -> Result<()>;

    /// Undo a line request.
    fn line_release(&self, line: RawHandle);

    fn line_value(&self, line: RawHandle) -> Result<bool>;

    fn line_set_value(&self, line: RawHandle, value: bool) -> Result<()>;

    /// Block until an edge event is ready or the timeout elapses.
    ///
    /// Returns false on timeout.
    fn event_wait(&self, line: RawHandle, timeout: Duration) -> Result<bool>;

    /// Read one ready edge event.
    ///
    /// The returned record has zero offset and sequence numbers; v1 does
    /// not provide them.
    fn event_read(&self, line: RawHandle) -> Result<RawEdgeEvent>;
}

/// The libgpiod v2 entry points consumed by the line drivers.
pub trait V2Api: Send + Sync {
    /// Open the chip character device at the given path.
    fn chip_open(&self, path: &str) -> Result<RawHandle>;

    fn chip_close(&self, chip: RawHandle);

    /// The name, label and line count of a chip.
    ///
    /// The transient native chip-info object is freed before returning.
    fn chip_info(&self, chip: RawHandle) -> Result<ChipInfo>;

    /// The information for a line.
    ///
    /// The transient native line-info object is freed before returning.
    fn line_info(&self, chip: RawHandle, offset: u32) -> Result<LineInfo>;

    /// Start watching a line for info changes, returning its current info.
    fn watch_line_info(&self, chip: RawHandle, offset: u32) -> Result<LineInfo>;

    /// Stop watching a line for info changes.
    fn unwatch_line_info(&self, chip: RawHandle, offset: u32) -> Result<()>;

    /// Block until an info change event is ready or the timeout elapses.
    ///
    /// Returns false on timeout.
    fn wait_info_event(&self, chip: RawHandle, timeout: Duration) -> Result<bool>;

    /// Read one ready info change event.
    ///
    /// The transient native info-event object is freed before returning.
    fn read_info_event(&self, chip: RawHandle) -> Result<RawInfoChangeEvent>;

    /// Request a set of lines with a common configuration.
    fn request_lines(
        &self,
        chip: RawHandle,
        offsets: &[u32],
        config: &LineConfig,
    ) -> Result<RawHandle>;

    /// Release a line request.
    fn release_request(&self, request: RawHandle);

    /// Apply a new configuration to the lines of a request.
    fn reconfigure(&self, request: RawHandle, offsets: &[u32], config: &LineConfig) -> Result<()>;

    fn value(&self, request: RawHandle, offset: u32) -> Result<bool>;

    fn set_value(&self, request: RawHandle, offset: u32, value: bool) -> Result<()>;

    /// Allocate an edge event buffer holding up to `capacity` events.
    fn event_buffer_new(&self, capacity: usize) -> Result<RawHandle>;

    /// Free an edge event buffer.
    fn event_buffer_free(&self, buffer: RawHandle);

    /// Block until edge events are ready or the timeout elapses.
    ///
    /// Returns false on timeout.
    fn wait_edge_events(&self, request: RawHandle, timeout: Duration) -> Result<bool>;

    /// Read ready edge events through `buffer`, appending them to `out`
    /// in native sequence order. Returns the number read.
    fn read_edge_events(
        &self,
        request: RawHandle,
        buffer: RawHandle,
        out: &mut Vec<RawEdgeEvent>,
    ) -> Result<usize>;
}

pub(crate) fn duration_to_ns(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX)
}
