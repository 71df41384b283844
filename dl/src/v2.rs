// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::{
    duration_to_ns, ChipInfo, Direction, Edge, Error, EventKind, InfoChangeKind, LineConfig,
    LineInfo, RawEdgeEvent, RawHandle, RawInfoChangeEvent, Result, V2Api,
};
use libloading::{Library, Symbol};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_ulong, c_void};
use std::time::Duration;

/// The consumer label reported against requested lines.
const CONSUMER: &CStr = c"gpiod-dyn";

// enum gpiod_line_direction from the v2 header.
const DIRECTION_INPUT: c_int = 2;
const DIRECTION_OUTPUT: c_int = 3;

// enum gpiod_line_edge.
const EDGE_RISING: c_int = 2;
const EDGE_FALLING: c_int = 3;
const EDGE_BOTH: c_int = 4;

// enum gpiod_line_value.
const VALUE_INACTIVE: c_int = 0;
const VALUE_ACTIVE: c_int = 1;

// enum gpiod_edge_event_type.
const EVENT_RISING_EDGE: c_int = 1;
const EVENT_FALLING_EDGE: c_int = 2;

// enum gpiod_info_event_type.
const INFO_EVENT_REQUESTED: c_int = 1;
const INFO_EVENT_RELEASED: c_int = 2;
const INFO_EVENT_CONFIG_CHANGED: c_int = 3;

fn direction_raw(direction: Direction) -> c_int {
    match direction {
        Direction::Input => DIRECTION_INPUT,
        Direction::Output => DIRECTION_OUTPUT,
    }
}

fn edge_raw(edge: Edge) -> c_int {
    match edge {
        Edge::Rising => EDGE_RISING,
        Edge::Falling => EDGE_FALLING,
        Edge::Both => EDGE_BOTH,
    }
}

pub(crate) fn direction_from_raw(raw: c_int, call: &'static str) -> Result<Direction> {
    match raw {
        DIRECTION_INPUT => Ok(Direction::Input),
        DIRECTION_OUTPUT => Ok(Direction::Output),
        _ => Err(Error::BadResponse {
            call,
            field: "direction",
            value: raw as i64,
        }),
    }
}

pub(crate) fn event_kind_from_raw(raw: c_int, call: &'static str) -> Result<EventKind> {
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

pub(crate) fn info_kind_from_raw(raw: c_int, call: &'static str) -> Result<InfoChangeKind> {
    match raw {
        INFO_EVENT_REQUESTED => Ok(InfoChangeKind::Requested),
        INFO_EVENT_RELEASED => Ok(InfoChangeKind::Released),
        INFO_EVENT_CONFIG_CHANGED => Ok(InfoChangeKind::Reconfigured),
        _ => Err(Error::BadResponse {
            call,
            field: "event type",
            value: raw as i64,
        }),
    }
}

// A transient native object freed when the scope unwinds.
struct Scoped<'l> {
    handle: RawHandle,
    free: Symbol<'l, unsafe extern "C" fn(*mut c_void)>,
}

impl Scoped<'_> {
    fn as_ptr(&self) -> *mut c_void {
        self.handle.as_ptr()
    }
}

impl Drop for Scoped<'_> {
    fn drop(&mut self) {
        // SAFETY: handle came from the matching native constructor and is
        // not referenced after the guard drops.
        unsafe { (self.free)(self.handle.as_ptr()) };
    }
}

/// libgpiod v2 loaded from a versioned soname.
#[derive(Debug)]
pub struct V2Lib {
    lib: Library,
    soname: String,
}

impl V2Lib {
    /// Load the given v2-generation soname via the system loader.
    pub fn load(soname: &str) -> Result<V2Lib> {
        // SAFETY: loading libgpiod only runs its trivial ELF constructors.
        let lib = unsafe { Library::new(soname) }.map_err(|e| Error::Load {
            library: soname.into(),
            detail: e.to_string(),
        })?;
        Ok(V2Lib {
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
        // SAFETY: the caller provides the signature matching the v2 header.
        unsafe { self.lib.get(name.as_bytes()) }.map_err(|e| Error::Symbol {
            library: self.soname.clone(),
            symbol: name.trim_end_matches('\0'),
            detail: e.to_string(),
        })
    }

    // Wrap a freshly constructed native object so it is freed on all paths.
    fn scoped(&self, handle: RawHandle, free_name: &'static str) -> Result<Scoped<'_>> {
        let free = self.sym::<unsafe extern "C" fn(*mut c_void)>(free_name)?;
        Ok(Scoped { handle, free })
    }

    fn copied(&self, s: *const c_char) -> String {
        if s.is_null() {
            return String::new();
        }
        // SAFETY: libgpiod returns NUL terminated strings owned by the
        // object they were read from.
        unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
    }

    // Copy the fields out of a (borrowed) native line-info object.
    fn line_info_from(&self, info: *mut c_void) -> Result<LineInfo> {
        let offset = self
            .sym::<unsafe extern "C" fn(*mut c_void) -> c_uint>("gpiod_line_info_get_offset\0")?;
        let name = self
            .sym::<unsafe extern "C" fn(*mut c_void) -> *const c_char>("gpiod_line_info_get_name\0")?;
        let consumer = self.sym::<unsafe extern "C" fn(*mut c_void) -> *const c_char>(
            "gpiod_line_info_get_consumer\0",
        )?;
        let used =
            self.sym::<unsafe extern "C" fn(*mut c_void) -> bool>("gpiod_line_info_is_used\0")?;
        let direction = self.sym::<unsafe extern "C" fn(*mut c_void) -> c_int>(
            "gpiod_line_info_get_direction\0",
        )?;
        // SAFETY: info is a live line-info object; the returned strings are
        // owned by it and copied before it is freed.
        unsafe {
            Ok(LineInfo {
                offset: offset(info),
                name: self.copied(name(info)),
                consumer: self.copied(consumer(info)),
                used: used(info),
                direction: direction_from_raw(direction(info), "gpiod_line_info_get_direction")?,
            })
        }
    }

    // Build the line-config object for `offsets` with `config` applied.
    fn build_line_config(&self, offsets: &[u32], config: &LineConfig) -> Result<Scoped<'_>> {
        let settings_new =
            self.sym::<unsafe extern "C" fn() -> *mut c_void>("gpiod_line_settings_new\0")?;
        // SAFETY: returns an owned settings object or NULL.
        let settings = RawHandle::from_ptr(unsafe { settings_new() })
            .ok_or_else(|| Error::os("gpiod_line_settings_new"))?;
        let settings = self.scoped(settings, "gpiod_line_settings_free\0")?;

        let set_direction = self.sym::<unsafe extern "C" fn(*mut c_void, c_int) -> c_int>(
            "gpiod_line_settings_set_direction\0",
        )?;
        // SAFETY: settings is live; the direction value is a header constant.
        if unsafe { set_direction(settings.as_ptr(), direction_raw(config.direction)) } != 0 {
            return Err(Error::os("gpiod_line_settings_set_direction"));
        }

        if let Some(edge) = config.edge {
            let set_edge = self.sym::<unsafe extern "C" fn(*mut c_void, c_int) -> c_int>(
                "gpiod_line_settings_set_edge_detection\0",
            )?;
            // SAFETY: settings is live; the edge value is a header constant.
            if unsafe { set_edge(settings.as_ptr(), edge_raw(edge)) } != 0 {
                return Err(Error::os("gpiod_line_settings_set_edge_detection"));
            }
        }

        if let Some(value) = config.initial_value {
            let set_value = self.sym::<unsafe extern "C" fn(*mut c_void, c_int) -> c_int>(
                "gpiod_line_settings_set_output_value\0",
            )?;
            let raw = if value { VALUE_ACTIVE } else { VALUE_INACTIVE };
            // SAFETY: settings is live; the value is a header constant.
            if unsafe { set_value(settings.as_ptr(), raw) } != 0 {
                return Err(Error::os("gpiod_line_settings_set_output_value"));
            }
        }

        let config_new =
            self.sym::<unsafe extern "C" fn() -> *mut c_void>("gpiod_line_config_new\0")?;
        // SAFETY: returns an owned config object or NULL.
        let line_config = RawHandle::from_ptr(unsafe { config_new() })
            .ok_or_else(|| Error::os("gpiod_line_config_new"))?;
        let line_config = self.scoped(line_config, "gpiod_line_config_free\0")?;

        let add = self.sym::<unsafe extern "C" fn(
            *mut c_void,
            *const c_uint,
            usize,
            *mut c_void,
        ) -> c_int>("gpiod_line_config_add_line_settings\0")?;
        // SAFETY: config and settings are live; offsets outlives the call
        // and its length is passed alongside. The settings are copied into
        // the config, so the settings guard may drop afterwards.
        if unsafe {
            add(
                line_config.as_ptr(),
                offsets.as_ptr(),
                offsets.len(),
                settings.as_ptr(),
            )
        } != 0
        {
            return Err(Error::os("gpiod_line_config_add_line_settings"));
        }
        Ok(line_config)
    }
}

impl V2Api for V2Lib {
    fn chip_open(&self, path: &str) -> Result<RawHandle> {
        let f = self
            .sym::<unsafe extern "C" fn(*const c_char) -> *mut c_void>("gpiod_chip_open\0")?;
        let cpath = CString::new(path).map_err(|_| Error::BadResponse {
            call: "gpiod_chip_open",
            field: "path",
            value: 0,
        })?;
        // SAFETY: cpath is a valid NUL terminated string for the call.
        let p = unsafe { f(cpath.as_ptr()) };
        RawHandle::from_ptr(p).ok_or_else(|| Error::os("gpiod_chip_open"))
    }

    fn chip_close(&self, chip: RawHandle) {
        if let Ok(f) = self.sym::<unsafe extern "C" fn(*mut c_void)>("gpiod_chip_close\0") {
            // SAFETY: chip is a live chip owned by the caller.
            unsafe { f(chip.as_ptr()) };
        }
    }

    fn chip_info(&self, chip: RawHandle) -> Result<ChipInfo> {
        let get_info = self
            .sym::<unsafe extern "C" fn(*mut c_void) -> *mut c_void>("gpiod_chip_get_info\0")?;
        // SAFETY: chip is live; returns an owned chip-info object or NULL.
        let info = RawHandle::from_ptr(unsafe { get_info(chip.as_ptr()) })
            .ok_or_else(|| Error::os("gpiod_chip_get_info"))?;
        let info = self.scoped(info, "gpiod_chip_info_free\0")?;

        let name = self.sym::<unsafe extern "C" fn(*mut c_void) -> *const c_char>(
            "gpiod_chip_info_get_name\0",
        )?;
        let label = self.sym::<unsafe extern "C" fn(*mut c_void) -> *const c_char>(
            "gpiod_chip_info_get_label\0",
        )?;
        let num_lines = self.sym::<unsafe extern "C" fn(*mut c_void) -> usize>(
            "gpiod_chip_info_get_num_lines\0",
        )?;
        // SAFETY: info is live until the guard drops; strings are copied
        // before that.
        unsafe {
            Ok(ChipInfo {
                name: self.copied(name(info.as_ptr())),
                label: self.copied(label(info.as_ptr())),
                num_lines: num_lines(info.as_ptr()) as u32,
            })
        }
    }

    fn line_info(&self, chip: RawHandle, offset: u32) -> Result<LineInfo> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, c_uint) -> *mut c_void>(
            "gpiod_chip_get_line_info\0",
        )?;
        // SAFETY: chip is live; returns an owned line-info object or NULL.
        let info = RawHandle::from_ptr(unsafe { f(chip.as_ptr(), offset) })
            .ok_or_else(|| Error::os("gpiod_chip_get_line_info"))?;
        let info = self.scoped(info, "gpiod_line_info_free\0")?;
        self.line_info_from(info.as_ptr())
    }

    fn watch_line_info(&self, chip: RawHandle, offset: u32) -> Result<LineInfo> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, c_uint) -> *mut c_void>(
            "gpiod_chip_watch_line_info\0",
        )?;
        // SAFETY: chip is live; returns an owned line-info object or NULL.
        let info = RawHandle::from_ptr(unsafe { f(chip.as_ptr(), offset) })
            .ok_or_else(|| Error::os("gpiod_chip_watch_line_info"))?;
        let info = self.scoped(info, "gpiod_line_info_free\0")?;
        self.line_info_from(info.as_ptr())
    }

    fn unwatch_line_info(&self, chip: RawHandle, offset: u32) -> Result<()> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, c_uint) -> c_int>(
            "gpiod_chip_unwatch_line_info\0",
        )?;
        // SAFETY: chip is live.
        match unsafe { f(chip.as_ptr(), offset) } {
            0 => Ok(()),
            _ => Err(Error::os("gpiod_chip_unwatch_line_info")),
        }
    }

    fn wait_info_event(&self, chip: RawHandle, timeout: Duration) -> Result<bool> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, i64) -> c_int>(
            "gpiod_chip_wait_info_event\0",
        )?;
        // SAFETY: chip is live; a non-negative timeout bounds the wait.
        match unsafe { f(chip.as_ptr(), duration_to_ns(timeout)) } {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::os("gpiod_chip_wait_info_event")),
        }
    }

    fn read_info_event(&self, chip: RawHandle) -> Result<RawInfoChangeEvent> {
        let read = self.sym::<unsafe extern "C" fn(*mut c_void) -> *mut c_void>(
            "gpiod_chip_read_info_event\0",
        )?;
        // SAFETY: chip is live; returns an owned info-event object or NULL.
        let event = RawHandle::from_ptr(unsafe { read(chip.as_ptr()) })
            .ok_or_else(|| Error::os("gpiod_chip_read_info_event"))?;
        let event = self.scoped(event, "gpiod_info_event_free\0")?;

        let event_type = self.sym::<unsafe extern "C" fn(*mut c_void) -> c_int>(
            "gpiod_info_event_get_event_type\0",
        )?;
        let timestamp = self.sym::<unsafe extern "C" fn(*mut c_void) -> u64>(
            "gpiod_info_event_get_timestamp_ns\0",
        )?;
        let line_info = self.sym::<unsafe extern "C" fn(*mut c_void) -> *mut c_void>(
            "gpiod_info_event_get_line_info\0",
        )?;
        // SAFETY: event is live until the guard drops; the line-info it
        // returns is owned by the event and copied before that.
        unsafe {
            Ok(RawInfoChangeEvent {
                kind: info_kind_from_raw(
                    event_type(event.as_ptr()),
                    "gpiod_info_event_get_event_type",
                )?,
                timestamp_ns: timestamp(event.as_ptr()),
                info: self.line_info_from(line_info(event.as_ptr()))?,
            })
        }
    }

    fn request_lines(
        &self,
        chip: RawHandle,
        offsets: &[u32],
        config: &LineConfig,
    ) -> Result<RawHandle> {
        let line_config = self.build_line_config(offsets, config)?;

        let req_cfg_new =
            self.sym::<unsafe extern "C" fn() -> *mut c_void>("gpiod_request_config_new\0")?;
        // SAFETY: returns an owned request-config object or NULL.
        let req_cfg = RawHandle::from_ptr(unsafe { req_cfg_new() })
            .ok_or_else(|| Error::os("gpiod_request_config_new"))?;
        let req_cfg = self.scoped(req_cfg, "gpiod_request_config_free\0")?;

        let set_consumer = self.sym::<unsafe extern "C" fn(*mut c_void, *const c_char)>(
            "gpiod_request_config_set_consumer\0",
        )?;
        // SAFETY: req_cfg is live; the consumer string is copied by the call.
        unsafe { set_consumer(req_cfg.as_ptr(), CONSUMER.as_ptr()) };

        let request = self.sym::<unsafe extern "C" fn(
            *mut c_void,
            *mut c_void,
            *mut c_void,
        ) -> *mut c_void>("gpiod_chip_request_lines\0")?;
        // SAFETY: chip and both config objects are live; the configs are
        // copied into the request and freed when the guards drop.
        let p = unsafe { request(chip.as_ptr(), req_cfg.as_ptr(), line_config.as_ptr()) };
        RawHandle::from_ptr(p).ok_or_else(|| Error::os("gpiod_chip_request_lines"))
    }

    fn release_request(&self, request: RawHandle) {
        if let Ok(f) =
            self.sym::<unsafe extern "C" fn(*mut c_void)>("gpiod_line_request_release\0")
        {
            // SAFETY: request is a live request owned by the caller.
            unsafe { f(request.as_ptr()) };
        }
    }

    fn reconfigure(&self, request: RawHandle, offsets: &[u32], config: &LineConfig) -> Result<()> {
        let line_config = self.build_line_config(offsets, config)?;
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int>(
            "gpiod_line_request_reconfigure_lines\0",
        )?;
        // SAFETY: request and config are live; the config is copied in.
        match unsafe { f(request.as_ptr(), line_config.as_ptr()) } {
            0 => Ok(()),
            _ => Err(Error::os("gpiod_line_request_reconfigure_lines")),
        }
    }

    fn value(&self, request: RawHandle, offset: u32) -> Result<bool> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, c_uint) -> c_int>(
            "gpiod_line_request_get_value\0",
        )?;
        // SAFETY: request is live and owns the offset.
        match unsafe { f(request.as_ptr(), offset) } {
            VALUE_INACTIVE => Ok(false),
            VALUE_ACTIVE => Ok(true),
            _ => Err(Error::os("gpiod_line_request_get_value")),
        }
    }

    fn set_value(&self, request: RawHandle, offset: u32, value: bool) -> Result<()> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, c_uint, c_int) -> c_int>(
            "gpiod_line_request_set_value\0",
        )?;
        let raw = if value { VALUE_ACTIVE } else { VALUE_INACTIVE };
        // SAFETY: request is live and owns the offset.
        match unsafe { f(request.as_ptr(), offset, raw) } {
            0 => Ok(()),
            _ => Err(Error::os("gpiod_line_request_set_value")),
        }
    }

    fn event_buffer_new(&self, capacity: usize) -> Result<RawHandle> {
        let f = self.sym::<unsafe extern "C" fn(usize) -> *mut c_void>(
            "gpiod_edge_event_buffer_new\0",
        )?;
        // SAFETY: returns an owned buffer or NULL.
        let p = unsafe { f(capacity) };
        RawHandle::from_ptr(p).ok_or_else(|| Error::os("gpiod_edge_event_buffer_new"))
    }

    fn event_buffer_free(&self, buffer: RawHandle) {
        if let Ok(f) =
            self.sym::<unsafe extern "C" fn(*mut c_void)>("gpiod_edge_event_buffer_free\0")
        {
            // SAFETY: buffer is a live buffer owned by the caller.
            unsafe { f(buffer.as_ptr()) };
        }
    }

    fn wait_edge_events(&self, request: RawHandle, timeout: Duration) -> Result<bool> {
        let f = self.sym::<unsafe extern "C" fn(*mut c_void, i64) -> c_int>(
            "gpiod_line_request_wait_edge_events\0",
        )?;
        // SAFETY: request is live; a non-negative timeout bounds the wait.
        match unsafe { f(request.as_ptr(), duration_to_ns(timeout)) } {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::os("gpiod_line_request_wait_edge_events")),
        }
    }

    fn read_edge_events(
        &self,
        request: RawHandle,
        buffer: RawHandle,
        out: &mut Vec<RawEdgeEvent>,
    ) -> Result<usize> {
        let read = self.sym::<unsafe extern "C" fn(*mut c_void, *mut c_void, usize) -> c_int>(
            "gpiod_line_request_read_edge_events\0",
        )?;
        let capacity = self.sym::<unsafe extern "C" fn(*mut c_void) -> usize>(
            "gpiod_edge_event_buffer_get_capacity\0",
        )?;
        let get_event = self.sym::<unsafe extern "C" fn(*mut c_void, c_ulong) -> *mut c_void>(
            "gpiod_edge_event_buffer_get_event\0",
        )?;
        let event_type = self.sym::<unsafe extern "C" fn(*mut c_void) -> c_int>(
            "gpiod_edge_event_get_event_type\0",
        )?;
        let timestamp = self.sym::<unsafe extern "C" fn(*mut c_void) -> u64>(
            "gpiod_edge_event_get_timestamp_ns\0",
        )?;
        let line_offset = self.sym::<unsafe extern "C" fn(*mut c_void) -> c_uint>(
            "gpiod_edge_event_get_line_offset\0",
        )?;
        let global_seqno = self.sym::<unsafe extern "C" fn(*mut c_void) -> c_ulong>(
            "gpiod_edge_event_get_global_seqno\0",
        )?;
        let line_seqno = self.sym::<unsafe extern "C" fn(*mut c_void) -> c_ulong>(
            "gpiod_edge_event_get_line_seqno\0",
        )?;

        // SAFETY: request and buffer are live; reading overwrites the
        // buffer contents up to its capacity.
        let max = unsafe { capacity(buffer.as_ptr()) };
        let n = unsafe { read(request.as_ptr(), buffer.as_ptr(), max) };
        if n < 0 {
            return Err(Error::os("gpiod_line_request_read_edge_events"));
        }
        let n = n as usize;
        out.reserve(n);
        for i in 0..n {
            // SAFETY: i is within the count just read; the event is owned
            // by the buffer and copied before the next read overwrites it.
            let event = unsafe { get_event(buffer.as_ptr(), i as c_ulong) };
            if event.is_null() {
                return Err(Error::BadResponse {
                    call: "gpiod_edge_event_buffer_get_event",
                    field: "event",
                    value: i as i64,
                });
            }
            // SAFETY: event is a live borrowed event object.
            unsafe {
                out.push(RawEdgeEvent {
                    kind: event_kind_from_raw(
                        event_type(event),
                        "gpiod_edge_event_get_event_type",
                    )?,
                    timestamp_ns: timestamp(event),
                    offset: Some(line_offset(event)),
                    seqno: global_seqno(event) as u64,
                    line_seqno: line_seqno(event) as u64,
                });
            }
        }
        Ok(n)
    }
}
