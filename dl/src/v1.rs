// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::{ChipInfo, Edge, Error, EventKind, RawEdgeEvent, RawHandle, Result, V1Api};
use libloading::{Library, Symbol};
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::time::Duration;

/// The consumer label reported against requested lines.
const CONSUMER: &CStr = c"gpiod-dyn";

// struct gpiod_line_event from the v1 header.
#[repr(C)]
#[derive(Clone, Copy)]
struct LineEvent {
    ts: libc::timespec,
    event_type: c_int,
}

// GPIOD_LINE_EVENT_* from the v1 header.
const EVENT_RISING_EDGE: c_int = 1;
const EVENT_FALLING_EDGE: c_int = 2;

pub(crate) fn event_kind(raw: c_int, call: &'static str) -> Result<EventKind> {
    match raw {
        EVENT_RISING_EDGE => Ok(EventKind::Rising),
        EVENT_FALLING_EDGE => Ok(EventKind::Falling),
        _ => Err(Error::BadResponse {
            call,
            field: "event type",
            value: raw as i64,
        }),
    }
}

pub(crate) fn duration_to_timespec(timeout: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: timeout.as_secs().try_into().unwrap_or(libc::time_t::MAX),
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    }
}

/// libgpiod v1 loaded from a versioned soname.
#[derive(Debug)]
pub struct V1Lib {
    lib: Library,
    soname: String,
}

impl V1Lib {
    /// Load the given v1-generation soname via the system loader.
    pub fn load(soname: &str) -> Result<V1Lib> {
        // SAFETY: loading libgpiod only runs its trivial ELF constructors.
        let lib = unsafe { Library::new(soname) }.map_err(|e| Error::Load {
            library: soname.into(),
            detail: e.to_string(),
        })?;
        Ok(V1Lib {
            lib,
            soname: soname.into(),
        })
    }

    /// The soname the library was loaded from.
    pub fn soname(&self) -> &str {
        &self.soname
    }

    // `name` must be NUL terminated.
    fn sym<T>(&self, name: &'static str) -> Result<Symbol<'_, T>> {
        // SAFETY: the caller provides the signature matching the v1 header.
        unsafe { self.lib.get(name.as_bytes()) }.map_err(|e| Error::Symbol {
            library: self.soname.clone(),
            symbol: name.trim_end_matches('\0'),
            detail: e.to_string(),
        })
    }

    fn copied(&self, s: *const c_char) -> String {
        if s.is_null() {
            return String::new();
        }
        // SAFETY: libgpiod returns NUL terminated strings owned by the chip.
        unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
    }
}

impl V1Api for V1Lib {
    fn chip_open(&self, index: u32) -> Result<RawHandle> {
        let f = self.sym::<unsafe extern "C" fn(c_uint) -> *mut c_void>(
            "gpiod_chip_open_by_number\0",
        )?;
        // SAFETY: takes a chip number, returns an owned chip pointer or NULL.
        let p = unsafe { f(index) };
        RawHandle::from_ptr(p).ok_or_else(|| Error::os("gpiod_chip_open_by_number"))
    }

    fn chip_close(&self, chip: RawHandle) {
        if let Ok(f) = self.sym::<unsafe extern "C" fn(*mut c_void)>("gpiod_chip_close\0") {
            // SAFETY: chip is a live chip pointer owned by the caller.
            unsafe { f(chip.as_ptr()) };
        }
    }

    fn chip_info(&self, chip: RawHandle) -> Result<ChipInfo> {
        let name =
            self.sym::<unsafe extern "C" fn(*mut c_void) -> *const c_char>("gpiod_chip_name\0")?;
        let label =
            self.sym::<unsafe extern "C" fn(*mut c_void) -> *const c_char>("gpiod_chip_label\0")?;
        let num_lines =
            self.sym::<unsafe extern "C" fn(*mut c_void) -> c_uint>("gpiod_chip_num_lines\0")?;
        // SAFETY: chip is live; the returned strings are owned by the chip
        // and copied before any other call.
        unsafe {
            Ok(ChipInfo {
                name: self.copied(name(chip.as_ptr())),
                label: self.copied(label(chip.as_ptr())),
                num_lines: num_lines(chip.as_ptr()),
            })
        }
    }

    fn line_get(&self, chip: RawHandle, offset: u32) -> Result<RawHandle> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, c_uint) -> *mut c_void>(
            "gpiod_chip_get_line\0",
        )?;
        // SAFETY: chip is live; the returned line is owned by the chip.
        let p = unsafe { f(chip.as_ptr(), offset) };
        RawHandle::from_ptr(p).ok_or_else(|| Error::os("gpiod_chip_get_line"))
    }

    fn line_request_input(&self, line: RawHandle) -> Result<()> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int>(
            "gpiod_line_request_input\0",
        )?;
        // SAFETY: line is live and the consumer string outlives the call.
        match unsafe { f(line.as_ptr(), CONSUMER.as_ptr()) } {
            0 => Ok(()),
            _ => Err(Error::os("gpiod_line_request_input")),
        }
    }

    fn line_request_output(&self, line: RawHandle, initial: bool) -> Result<()> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, *const c_char, c_int) -> c_int>(
            "gpiod_line_request_output\0",
        )?;
        // SAFETY: line is live and the consumer string outlives the call.
        match unsafe { f(line.as_ptr(), CONSUMER.as_ptr(), initial as c_int) } {
            0 => Ok(()),
            _ => Err(Error::os("gpiod_line_request_output")),
        }
    }

    fn line_request_edges(&self, line: RawHandle, edge: Edge) -> Result<()> {
        let (name, call): (&'static str, &'static str) = match edge {
            Edge::Rising => (
                "gpiod_line_request_rising_edge_events\0",
                "gpiod_line_request_rising_edge_events",
            ),
            Edge::Falling => (
                "gpiod_line_request_falling_edge_events\0",
                "gpiod_line_request_falling_edge_events",
            ),
            Edge::Both => (
                "gpiod_line_request_both_edges_events\0",
                "gpiod_line_request_both_edges_events",
            ),
        };
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int>(name)?;
        // SAFETY: line is live and the consumer string outlives the call.
        match unsafe { f(line.as_ptr(), CONSUMER.as_ptr()) } {
            0 => Ok(()),
            _ => Err(Error::os(call)),
        }
    }

    fn line_release(&self, line: RawHandle) {
        if let Ok(f) = self.sym::<unsafe extern "C" fn(*mut c_void)>("gpiod_line_release\0") {
            // SAFETY: line is a live, requested line.
            unsafe { f(line.as_ptr()) };
        }
    }

    fn line_value(&self, line: RawHandle) -> Result<bool> {
        let f =
            self.sym::<unsafe extern "C" fn(*mut c_void) -> c_int>("gpiod_line_get_value\0")?;
        // SAFETY: line is a live, requested line.
        match unsafe { f(line.as_ptr()) } {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::os("gpiod_line_get_value")),
        }
    }

    fn line_set_value(&self, line: RawHandle, value: bool) -> Result<()> {
        let f = self
            .sym::<unsafe extern "C" fn(*mut c_void, c_int) -> c_int>("gpiod_line_set_value\0")?;
        // SAFETY: line is a live, requested line.
        match unsafe { f(line.as_ptr(), value as c_int) } {
            0 => Ok(()),
            _ => Err(Error::os("gpiod_line_set_value")),
        }
    }

    fn event_wait(&self, line: RawHandle, timeout: Duration) -> Result<bool> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, *const libc::timespec) -> c_int>(
            "gpiod_line_event_wait\0",
        )?;
        let ts = duration_to_timespec(timeout);
        // SAFETY: line is a live line requested for events; ts outlives the call.
        match unsafe { f(line.as_ptr(), &ts) } {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::os("gpiod_line_event_wait")),
        }
    }

    fn event_read(&self, line: RawHandle) -> Result<RawEdgeEvent> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, *mut LineEvent) -> c_int>(
            "gpiod_line_event_read\0",
        )?;
        let mut event = LineEvent {
            ts: duration_to_timespec(Duration::ZERO),
            event_type: 0,
        };
        // SAFETY: line is a live line requested for events; event is a
        // properly sized out parameter.
        if unsafe { f(line.as_ptr(), &mut event) } != 0 {
            return Err(Error::os("gpiod_line_event_read"));
        }
        Ok(RawEdgeEvent {
            kind: event_kind(event.event_type, "gpiod_line_event_read")?,
            timestamp_ns: event.ts.tv_sec as u64 * 1_000_000_000 + event.ts.tv_nsec as u64,
            // v1 events carry neither; the caller knows the line it waited on.
            offset: None,
            seqno: 0,
            line_seqno: 0,
        })
    }
}
