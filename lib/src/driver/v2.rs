// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The driver for the libgpiod v2 generation.

use super::LineDriver;
use crate::dl::{self, RawHandle, V2Api};
use crate::events::{
    EdgeHandler, EdgeObserver, EdgeSource, EdgeSubscribers, ObserverConfig, ObserverFactory,
    SubscriberId,
};
use crate::handle::NativeHandle;
use crate::line::{
    ChipInfo, Direction, EdgeDetection, EdgeEvent, InfoChangeEvent, LineInfo, Offset, Value,
};
use crate::{DriverVersion, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

// A line requested for foreground value access.
struct Claim {
    request: NativeHandle,
    raw: RawHandle,
    direction: Direction,
}

// The request handle of an edge-armed line, shared between the watch
// (value reads) and the observer's source (waits, release on exit).
// Readers hold the mutex across their native call, so the release cannot
// run under them; after release the handle refuses further use.
type SharedRequest = Arc<Mutex<NativeHandle>>;

// A line armed for edge events.
struct Watch {
    subscribers: Arc<EdgeSubscribers>,
    edge: EdgeDetection,
    request: SharedRequest,
    observer: EdgeObserver,
}

// Owns the per-line drain buffer and shares the request for one
// observer. `request_raw` is only touched from the observer thread,
// which keeps the request live until its own exit.
struct V2EdgeSource {
    api: Arc<dyn V2Api>,
    offset: Offset,
    request: SharedRequest,
    request_raw: RawHandle,
    buffer: NativeHandle,
    buffer_raw: RawHandle,
}

impl EdgeSource for V2EdgeSource {
    fn wait(&self, timeout: Duration) -> dl::Result<bool> {
        self.api.wait_edge_events(self.request_raw, timeout)
    }

    fn drain(&self, out: &mut Vec<EdgeEvent>) -> dl::Result<usize> {
        let mut raw = Vec::new();
        let n = self
            .api
            .read_edge_events(self.request_raw, self.buffer_raw, &mut raw)?;
        out.extend(
            raw.into_iter()
                .map(|event| EdgeEvent::from_raw(event, self.offset)),
        );
        Ok(n)
    }
}

impl Drop for V2EdgeSource {
    fn drop(&mut self) {
        // buffer before request, matching construction in reverse
        self.buffer.release();
        self.request
            .lock()
            .expect("failed to acquire lock on request")
            .release();
    }
}

/// A driver speaking the v2 API of a dynamically loaded libgpiod.
///
/// Each claimed or edge-armed line has its own native request, so
/// foreground operations and event waits touch disjoint native state.
pub struct V2Driver {
    api: Arc<dyn V2Api>,
    observer_config: ObserverConfig,
    observer_factory: ObserverFactory,
    // watches before claims before chip, so teardown stops observers and
    // releases requests before the chip closes
    watches: Mutex<HashMap<Offset, Watch>>,
    claims: RwLock<HashMap<Offset, Claim>>,
    chip_raw: RawHandle,
    chip: NativeHandle,
}

impl V2Driver {
    /// Open the chip at the given index through `api`.
    pub fn new(
        api: Arc<dyn V2Api>,
        chip_index: u32,
        observer_config: ObserverConfig,
        observer_factory: Option<ObserverFactory>,
    ) -> Result<V2Driver> {
        let path = super::chip_path(chip_index);
        let chip_raw = api.chip_open(&path)?;
        let closer = api.clone();
        let chip = NativeHandle::new(chip_raw, move |h| closer.chip_close(h));
        Ok(V2Driver {
            api,
            observer_config,
            observer_factory: observer_factory
                .unwrap_or_else(|| Arc::new(EdgeObserver::spawn)),
            watches: Mutex::new(HashMap::new()),
            claims: RwLock::new(HashMap::new()),
            chip_raw,
            chip,
        })
    }

    fn request_handle(&self, raw: RawHandle) -> NativeHandle {
        let api = self.api.clone();
        NativeHandle::new(raw, move |h| api.release_request(h))
    }

    // Request or reconfigure a line for foreground access.
    //
    // Lock order throughout the driver is watches before claims.
    fn claim(&self, offset: Offset, config: dl::LineConfig) -> Result<()> {
        let watches = self
            .watches
            .lock()
            .expect("failed to acquire lock on watches");
        if watches.contains_key(&offset) {
            return Err(Error::InvalidArgument(format!(
                "line {} is armed for edge events",
                offset
            )));
        }
        let mut claims = self
            .claims
            .write()
            .expect("failed to acquire write lock on claims");
        if let Some(claim) = claims.get_mut(&offset) {
            self.api.reconfigure(claim.raw, &[offset], &config)?;
            claim.direction = config.direction.into();
            return Ok(());
        }
        let raw = self.api.request_lines(self.chip_raw, &[offset], &config)?;
        claims.insert(
            offset,
            Claim {
                request: self.request_handle(raw),
                raw,
                direction: config.direction.into(),
            },
        );
        Ok(())
    }

    // Build the native request and drain buffer for one armed line,
    // reusing `existing` (a folded-in foreground request) when given.
    fn edge_source(
        &self,
        offset: Offset,
        edge: EdgeDetection,
        existing: Option<(NativeHandle, RawHandle)>,
    ) -> Result<V2EdgeSource> {
        let config = dl::LineConfig {
            direction: dl::Direction::Input,
            edge: Some(edge.into()),
            initial_value: None,
        };
        let (request, request_raw) = match existing {
            Some((request, raw)) => {
                self.api.reconfigure(raw, &[offset], &config)?;
                (Arc::new(Mutex::new(request)), raw)
            }
            None => {
                let raw = self.api.request_lines(self.chip_raw, &[offset], &config)?;
                (Arc::new(Mutex::new(self.request_handle(raw))), raw)
            }
        };
        let buffer_raw = self
            .api
            .event_buffer_new(self.observer_config.event_capacity)?;
        let freer = self.api.clone();
        let buffer = NativeHandle::new(buffer_raw, move |h| freer.event_buffer_free(h));
        Ok(V2EdgeSource {
            api: self.api.clone(),
            offset,
            request,
            request_raw,
            buffer,
            buffer_raw,
        })
    }
}

impl LineDriver for V2Driver {
    fn version(&self) -> DriverVersion {
        DriverVersion::V2
    }

    fn chip_info(&self) -> Result<ChipInfo> {
        Ok(self.api.chip_info(self.chip_raw)?.into())
    }

    fn claim_input(&self, offset: Offset) -> Result<()> {
        self.claim(
            offset,
            dl::LineConfig {
                direction: dl::Direction::Input,
                edge: None,
                initial_value: None,
            },
        )
    }

    fn claim_output(&self, offset: Offset, initial: Value) -> Result<()> {
        self.claim(
            offset,
            dl::LineConfig {
                direction: dl::Direction::Output,
                edge: None,
                initial_value: Some(initial.into()),
            },
        )
    }

    fn release_line(&self, offset: Offset) -> Result<()> {
        self.claims
            .write()
            .expect("failed to acquire write lock on claims")
            .remove(&offset);
        Ok(())
    }

    fn value(&self, offset: Offset) -> Result<Value> {
        {
            let claims = self
                .claims
                .read()
                .expect("failed to acquire read lock on claims");
            if let Some(claim) = claims.get(&offset) {
                return Ok(self.api.value(claim.raw, offset)?.into());
            }
        }
        let watches = self
            .watches
            .lock()
            .expect("failed to acquire lock on watches");
        match watches.get(&offset) {
            Some(watch) => {
                // holding the request lock keeps the observer's exit from
                // releasing the request mid-read
                let request = watch
                    .request
                    .lock()
                    .expect("failed to acquire lock on request");
                match request.get() {
                    Ok(raw) => Ok(self.api.value(raw, offset)?.into()),
                    // released on the observer's fault path
                    Err(_) => Err(Error::InvalidArgument(format!(
                        "line {} is not claimed",
                        offset
                    ))),
                }
            }
            None => Err(Error::InvalidArgument(format!(
                "line {} is not claimed",
                offset
            ))),
        }
    }

    fn set_value(&self, offset: Offset, value: Value) -> Result<()> {
        let claims = self
            .claims
            .read()
            .expect("failed to acquire read lock on claims");
        match claims.get(&offset) {
            Some(claim) if claim.direction == Direction::Output => {
                Ok(self.api.set_value(claim.raw, offset, value.into())?)
            }
            Some(_) => Err(Error::InvalidArgument(format!(
                "line {} is not claimed as an output",
                offset
            ))),
            None => Err(Error::InvalidArgument(format!(
                "line {} is not claimed",
                offset
            ))),
        }
    }

    fn subscribe_edges(
        &self,
        offset: Offset,
        edge: EdgeDetection,
        handler: EdgeHandler,
    ) -> Result<SubscriberId> {
        let mut watches = self
            .watches
            .lock()
            .expect("failed to acquire lock on watches");
        if let Some(watch) = watches.get_mut(&offset) {
            if watch.edge != edge {
                return Err(Error::InvalidArgument(format!(
                    "line {} is already watched with {:?}",
                    offset, watch.edge
                )));
            }
            let released = watch
                .request
                .lock()
                .expect("failed to acquire lock on request")
                .is_released();
            if released {
                // the previous observer ended on a fault; arm a fresh one
                let source = self.edge_source(offset, edge, None)?;
                watch.request = source.request.clone();
                watch.observer = (self.observer_factory)(
                    Box::new(source),
                    watch.subscribers.clone(),
                    self.observer_config,
                )?;
            }
            return Ok(watch.subscribers.add(handler));
        }

        // fold an existing input claim into the watch
        let mut claims = self
            .claims
            .write()
            .expect("failed to acquire write lock on claims");
        let existing = match claims.get(&offset) {
            Some(claim) if claim.direction == Direction::Output => {
                return Err(Error::InvalidArgument(format!(
                    "line {} is claimed as an output",
                    offset
                )));
            }
            Some(_) => claims.remove(&offset).map(|c| (c.request, c.raw)),
            None => None,
        };
        drop(claims);

        let source = self.edge_source(offset, edge, existing)?;
        let request = source.request.clone();
        let subscribers = EdgeSubscribers::new();
        let id = subscribers.add(handler);
        let observer = (self.observer_factory)(
            Box::new(source),
            subscribers.clone(),
            self.observer_config,
        )?;
        watches.insert(
            offset,
            Watch {
                subscribers,
                edge,
                request,
                observer,
            },
        );
        Ok(id)
    }

    fn unsubscribe(&self, offset: Offset, id: SubscriberId) -> Result<()> {
        let mut watches = self
            .watches
            .lock()
            .expect("failed to acquire lock on watches");
        let watch = watches.get_mut(&offset).ok_or_else(|| {
            Error::InvalidArgument(format!("line {} has no subscriptions", offset))
        })?;
        if !watch.subscribers.remove(id) {
            return Err(Error::InvalidArgument(format!(
                "line {} has no such subscriber",
                offset
            )));
        }
        let retired = if watch.subscribers.is_empty() {
            watches.remove(&offset)
        } else {
            None
        };
        drop(watches);
        // stopping the observer waits out its current slice; joining it
        // outside the lock keeps other lines' operations from stalling
        drop(retired);
        Ok(())
    }

    fn line_info(&self, offset: Offset) -> Result<LineInfo> {
        Ok(self.api.line_info(self.chip_raw, offset)?.into())
    }

    fn watch_line_info(&self, offset: Offset) -> Result<LineInfo> {
        Ok(self.api.watch_line_info(self.chip_raw, offset)?.into())
    }

    fn unwatch_line_info(&self, offset: Offset) -> Result<()> {
        Ok(self.api.unwatch_line_info(self.chip_raw, offset)?)
    }

    fn read_info_event(&self, timeout: Duration) -> Result<Option<InfoChangeEvent>> {
        if !self.api.wait_info_event(self.chip_raw, timeout)? {
            return Ok(None);
        }
        Ok(Some(self.api.read_info_event(self.chip_raw)?.into()))
    }
}

impl fmt::Debug for V2Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("V2Driver")
            .field("chip", &self.chip)
            .finish_non_exhaustive()
    }
}

impl Drop for V2Driver {
    fn drop(&mut self) {
        // stop observers before the chip handle drops
        self.watches
            .lock()
            .expect("failed to acquire lock on watches")
            .clear();
        self.claims
            .write()
            .expect("failed to acquire write lock on claims")
            .clear();
        self.chip.release();
    }
}
