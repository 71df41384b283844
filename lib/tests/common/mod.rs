// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-process stand-ins for the dynamically loaded libgpiod, shared by
//! the integration tests.

#![allow(dead_code)]

use gpiod_dyn::dl::{
    self, ChipInfo, Edge, LineConfig, LineInfo, RawEdgeEvent, RawHandle, RawInfoChangeEvent,
    V1Api, V2Api,
};
use gpiod_dyn::factory::ApiLoader;
use gpiod_dyn::resolver::InstalledLibrary;
use gpiod_dyn::Result;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Create an empty file standing in for an installed library.
pub fn touch(dir: &Path, name: &str) {
    File::create(dir.join(name)).unwrap();
}

/// A directory populated with fake library files.
pub fn lib_root(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        touch(dir.path(), name);
    }
    dir
}

fn poll_queue<T>(queue: &Mutex<VecDeque<T>>, timeout: Duration) -> dl::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if !queue.lock().unwrap().is_empty() {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum V1Request {
    Input,
    Output,
    Edges(Edge),
}

/// A fake of the v1 API: one chip, eight lines, scripted events.
#[derive(Default)]
pub struct FakeV1 {
    next: AtomicUsize,
    pub opened_chips: Mutex<Vec<u32>>,
    pub closed_chips: AtomicUsize,
    /// line token -> offset
    pub lines: Mutex<HashMap<usize, u32>>,
    /// line token -> active request
    pub requests: Mutex<HashMap<usize, V1Request>>,
    pub releases: AtomicUsize,
    pub values: Mutex<HashMap<u32, bool>>,
    pub events: Mutex<VecDeque<RawEdgeEvent>>,
    pub wait_fault: Mutex<Option<dl::Error>>,
}

impl FakeV1 {
    pub fn new() -> Arc<FakeV1> {
        Arc::new(FakeV1::default())
    }

    fn token(&self) -> RawHandle {
        RawHandle::from_token(self.next.fetch_add(1, Ordering::SeqCst) + 1).unwrap()
    }

    pub fn set_line(&self, offset: u32, active: bool) {
        self.values.lock().unwrap().insert(offset, active);
    }

    pub fn push_event(&self, event: RawEdgeEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    pub fn fail_next_wait(&self, e: dl::Error) {
        *self.wait_fault.lock().unwrap() = Some(e);
    }

    pub fn request_for(&self, line: RawHandle) -> Option<V1Request> {
        self.requests
            .lock()
            .unwrap()
            .get(&(line.as_ptr() as usize))
            .cloned()
    }
}

impl V1Api for FakeV1 {
    fn chip_open(&self, index: u32) -> dl::Result<RawHandle> {
        self.opened_chips.lock().unwrap().push(index);
        Ok(self.token())
    }

    fn chip_close(&self, _chip: RawHandle) {
        self.closed_chips.fetch_add(1, Ordering::SeqCst);
    }

    fn chip_info(&self, _chip: RawHandle) -> dl::Result<ChipInfo> {
        Ok(ChipInfo {
            name: "gpiochip0".into(),
            label: "fake-v1".into(),
            num_lines: 8,
        })
    }

    fn line_get(&self, _chip: RawHandle, offset: u32) -> dl::Result<RawHandle> {
        let line = self.token();
        self.lines
            .lock()
            .unwrap()
            .insert(line.as_ptr() as usize, offset);
        Ok(line)
    }

    fn line_request_input(&self, line: RawHandle) -> dl::Result<()> {
        self.requests
            .lock()
            .unwrap()
            .insert(line.as_ptr() as usize, V1Request::Input);
        Ok(())
    }

    fn line_request_output(&self, line: RawHandle, initial: bool) -> dl::Result<()> {
        let offset = self.lines.lock().unwrap()[&(line.as_ptr() as usize)];
        self.values.lock().unwrap().insert(offset, initial);
        self.requests
            .lock()
            .unwrap()
            .insert(line.as_ptr() as usize, V1Request::Output);
        Ok(())
    }

    fn line_request_edges(&self, line: RawHandle, edge: Edge) -> dl::Result<()> {
        self.requests
            .lock()
            .unwrap()
            .insert(line.as_ptr() as usize, V1Request::Edges(edge));
        Ok(())
    }

    fn line_release(&self, line: RawHandle) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .remove(&(line.as_ptr() as usize));
    }

    fn line_value(&self, line: RawHandle) -> dl::Result<bool> {
        if !self
            .requests
            .lock()
            .unwrap()
            .contains_key(&(line.as_ptr() as usize))
        {
            // reading an unrequested line fails in the real library
            return Err(dl::Error::BadResponse {
                call: "gpiod_line_get_value",
                field: "line",
                value: line.as_ptr() as i64,
            });
        }
        let offset = self.lines.lock().unwrap()[&(line.as_ptr() as usize)];
        Ok(*self.values.lock().unwrap().get(&offset).unwrap_or(&false))
    }

    fn line_set_value(&self, line: RawHandle, value: bool) -> dl::Result<()> {
        let offset = self.lines.lock().unwrap()[&(line.as_ptr() as usize)];
        self.values.lock().unwrap().insert(offset, value);
        Ok(())
    }

    fn event_wait(&self, _line: RawHandle, timeout: Duration) -> dl::Result<bool> {
        if let Some(e) = self.wait_fault.lock().unwrap().take() {
            return Err(e);
        }
        poll_queue(&self.events, timeout)
    }

    fn event_read(&self, _line: RawHandle) -> dl::Result<RawEdgeEvent> {
        self.events
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(dl::Error::BadResponse {
                call: "event_read",
                field: "event",
                value: 0,
            })
    }
}

/// What a fake v2 request was configured with.
#[derive(Clone, Debug)]
pub struct V2Request {
    pub offsets: Vec<u32>,
    pub config: LineConfig,
}

/// A fake of the v2 API: one chip, eight lines, scripted events.
#[derive(Default)]
pub struct FakeV2 {
    next: AtomicUsize,
    pub opened_chips: Mutex<Vec<String>>,
    pub closed_chips: AtomicUsize,
    /// request token -> live request
    pub requests: Mutex<HashMap<usize, V2Request>>,
    pub released_requests: AtomicUsize,
    pub reconfigures: Mutex<Vec<(Vec<u32>, LineConfig)>>,
    pub freed_buffers: AtomicUsize,
    pub values: Mutex<HashMap<u32, bool>>,
    /// batches delivered one per wait/read cycle, drained by whichever
    /// observer polls first
    pub edge_batches: Mutex<VecDeque<Vec<RawEdgeEvent>>>,
    /// request token -> fault its next wait reports
    pub wait_faults: Mutex<HashMap<usize, dl::Error>>,
    /// when set, edge waits report timeout immediately
    pub unblocked: AtomicBool,
    pub watched: Mutex<HashSet<u32>>,
    pub info_events: Mutex<VecDeque<RawInfoChangeEvent>>,
}

impl FakeV2 {
    pub fn new() -> Arc<FakeV2> {
        Arc::new(FakeV2::default())
    }

    fn token(&self) -> RawHandle {
        RawHandle::from_token(self.next.fetch_add(1, Ordering::SeqCst) + 1).unwrap()
    }

    pub fn set_line(&self, offset: u32, active: bool) {
        self.values.lock().unwrap().insert(offset, active);
    }

    pub fn push_edge_batch(&self, batch: Vec<RawEdgeEvent>) {
        self.edge_batches.lock().unwrap().push_back(batch);
    }

    pub fn push_info_event(&self, event: RawInfoChangeEvent) {
        self.info_events.lock().unwrap().push_back(event);
    }

    /// Make the next edge wait on the request holding `offset` fail.
    pub fn fail_wait_for_offset(&self, offset: u32, e: dl::Error) {
        let requests = self.requests.lock().unwrap();
        let token = requests
            .iter()
            .find(|(_, r)| r.offsets.contains(&offset))
            .map(|(t, _)| *t)
            .expect("no request holds the offset");
        drop(requests);
        self.wait_faults.lock().unwrap().insert(token, e);
    }

    pub fn live_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request_for_offset(&self, offset: u32) -> Option<V2Request> {
        self.requests
            .lock()
            .unwrap()
            .values()
            .find(|r| r.offsets.contains(&offset))
            .cloned()
    }
}

impl V2Api for FakeV2 {
    fn chip_open(&self, path: &str) -> dl::Result<RawHandle> {
        self.opened_chips.lock().unwrap().push(path.to_string());
        Ok(self.token())
    }

    fn chip_close(&self, _chip: RawHandle) {
        self.closed_chips.fetch_add(1, Ordering::SeqCst);
    }

    fn chip_info(&self, _chip: RawHandle) -> dl::Result<ChipInfo> {
        Ok(ChipInfo {
            name: "gpiochip0".into(),
            label: "fake-v2".into(),
            num_lines: 8,
        })
    }

    fn line_info(&self, _chip: RawHandle, offset: u32) -> dl::Result<LineInfo> {
        Ok(LineInfo {
            offset,
            name: format!("LINE{}", offset),
            consumer: String::new(),
            used: self.request_for_offset(offset).is_some(),
            direction: dl::Direction::Input,
        })
    }

    fn watch_line_info(&self, chip: RawHandle, offset: u32) -> dl::Result<LineInfo> {
        self.watched.lock().unwrap().insert(offset);
        self.line_info(chip, offset)
    }

    fn unwatch_line_info(&self, _chip: RawHandle, offset: u32) -> dl::Result<()> {
        self.watched.lock().unwrap().remove(&offset);
        Ok(())
    }

    fn wait_info_event(&self, _chip: RawHandle, timeout: Duration) -> dl::Result<bool> {
        poll_queue(&self.info_events, timeout)
    }

    fn read_info_event(&self, _chip: RawHandle) -> dl::Result<RawInfoChangeEvent> {
        self.info_events
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(dl::Error::BadResponse {
                call: "read_info_event",
                field: "event",
                value: 0,
            })
    }

    fn request_lines(
        &self,
        _chip: RawHandle,
        offsets: &[u32],
        config: &LineConfig,
    ) -> dl::Result<RawHandle> {
        if let Some(value) = config.initial_value {
            for offset in offsets {
                self.values.lock().unwrap().insert(*offset, value);
            }
        }
        let request = self.token();
        self.requests.lock().unwrap().insert(
            request.as_ptr() as usize,
            V2Request {
                offsets: offsets.to_vec(),
                config: config.clone(),
            },
        );
        Ok(request)
    }

    fn release_request(&self, request: RawHandle) {
        self.released_requests.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .remove(&(request.as_ptr() as usize));
    }

    fn reconfigure(
        &self,
        request: RawHandle,
        offsets: &[u32],
        config: &LineConfig,
    ) -> dl::Result<()> {
        if let Some(value) = config.initial_value {
            for offset in offsets {
                self.values.lock().unwrap().insert(*offset, value);
            }
        }
        self.reconfigures
            .lock()
            .unwrap()
            .push((offsets.to_vec(), config.clone()));
        if let Some(r) = self
            .requests
            .lock()
            .unwrap()
            .get_mut(&(request.as_ptr() as usize))
        {
            r.config = config.clone();
        }
        Ok(())
    }

    fn value(&self, request: RawHandle, offset: u32) -> dl::Result<bool> {
        if !self
            .requests
            .lock()
            .unwrap()
            .contains_key(&(request.as_ptr() as usize))
        {
            // reading through a released request is a use-after-free in
            // the real library
            return Err(dl::Error::BadResponse {
                call: "gpiod_line_request_get_value",
                field: "request",
                value: request.as_ptr() as i64,
            });
        }
        Ok(*self.values.lock().unwrap().get(&offset).unwrap_or(&false))
    }

    fn set_value(&self, _request: RawHandle, offset: u32, value: bool) -> dl::Result<()> {
        self.values.lock().unwrap().insert(offset, value);
        Ok(())
    }

    fn event_buffer_new(&self, _capacity: usize) -> dl::Result<RawHandle> {
        Ok(self.token())
    }

    fn event_buffer_free(&self, _buffer: RawHandle) {
        self.freed_buffers.fetch_add(1, Ordering::SeqCst);
    }

    fn wait_edge_events(&self, request: RawHandle, timeout: Duration) -> dl::Result<bool> {
        if let Some(e) = self
            .wait_faults
            .lock()
            .unwrap()
            .remove(&(request.as_ptr() as usize))
        {
            return Err(e);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if !self.edge_batches.lock().unwrap().is_empty() {
                return Ok(true);
            }
            if self.unblocked.load(Ordering::SeqCst) || Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn read_edge_events(
        &self,
        _request: RawHandle,
        _buffer: RawHandle,
        out: &mut Vec<RawEdgeEvent>,
    ) -> dl::Result<usize> {
        match self.edge_batches.lock().unwrap().pop_front() {
            Some(batch) => {
                let n = batch.len();
                out.extend(batch);
                Ok(n)
            }
            None => Ok(0),
        }
    }
}

/// An [`ApiLoader`] handing out the fakes instead of opening libraries.
pub struct FakeLoader {
    pub v1: Arc<FakeV1>,
    pub v2: Arc<FakeV2>,
}

impl FakeLoader {
    pub fn new() -> FakeLoader {
        FakeLoader {
            v1: FakeV1::new(),
            v2: FakeV2::new(),
        }
    }
}

impl ApiLoader for FakeLoader {
    fn load_v1(&self, _library: &InstalledLibrary) -> Result<Arc<dyn V1Api>> {
        Ok(self.v1.clone())
    }

    fn load_v2(&self, _library: &InstalledLibrary) -> Result<Arc<dyn V2Api>> {
        Ok(self.v2.clone())
    }
}

/// An edge event as the v2 fake would report it.
pub fn raw_edge(offset: u32, kind: dl::EventKind, seqno: u64) -> RawEdgeEvent {
    RawEdgeEvent {
        kind,
        timestamp_ns: seqno * 1_000,
        offset: Some(offset),
        seqno,
        line_seqno: seqno,
    }
}

/// An edge event as the v1 fake would report it: no offset, no counters.
pub fn raw_edge_v1(kind: dl::EventKind, timestamp_ns: u64) -> RawEdgeEvent {
    RawEdgeEvent {
        kind,
        timestamp_ns,
        offset: None,
        seqno: 0,
        line_seqno: 0,
    }
}
