// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The driver for the libgpiod v1 generation.

use super::LineDriver;
use crate::dl::{self, RawHandle, V1Api};
use crate::events::{
    EdgeHandler, EdgeObserver, EdgeSource, EdgeSubscribers, ObserverConfig, SubscriberId,
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
//
// The line object itself is owned by the chip; the handle undoes the
// request, not the object.
struct Claim {
    line: NativeHandle,
    raw: RawHandle,
    direction: Direction,
}

// The event request of an edge-armed line, shared between the watch
// (value reads) and the observer's source (waits, release on exit).
// Readers hold the mutex across their native call, so the release cannot
// run under them; after release the handle refuses further use.
type SharedLine = Arc<Mutex<NativeHandle>>;

// A line armed for edge events.
struct Watch {
    subscribers: Arc<EdgeSubscribers>,
    edge: EdgeDetection,
    line: SharedLine,
    observer: EdgeObserver,
}

// Shares the per-line event request for one observer. `line_raw` is only
// touched from the observer thread, which keeps the request live until
// its own exit.
struct V1EdgeSource {
    api: Arc<dyn V1Api>,
    offset: Offset,
    line: SharedLine,
    line_raw: RawHandle,
}

impl EdgeSource for V1EdgeSource {
    fn wait(&self, timeout: Duration) -> dl::Result<bool> {
        self.api.event_wait(self.line_raw, timeout)
    }

    // v1 reads one event at a time; keep reading while more are ready.
    fn drain(&self, out: &mut Vec<EdgeEvent>) -> dl::Result<usize> {
        let mut n = 0;
        loop {
            let raw = self.api.event_read(self.line_raw)?;
            out.push(EdgeEvent::from_raw(raw, self.offset));
            n += 1;
            if !self.api.event_wait(self.line_raw, Duration::ZERO)? {
                return Ok(n);
            }
        }
    }
}

impl Drop for V1EdgeSource {
    fn drop(&mut self) {
        self.line
            .lock()
            .expect("failed to acquire lock on line")
            .release();
    }
}

/// A driver speaking the v1 API of a dynamically loaded libgpiod.
///
/// Each claimed or edge-armed line has its own native request, so
/// foreground operations and event waits touch disjoint native state.
/// v1 has no reconfiguration, so re-claiming a line releases and
/// re-requests it, and no line info watching, so the info operations
/// report [`Error::Unsupported`].
pub struct V1Driver {
    api: Arc<dyn V1Api>,
    observer_config: ObserverConfig,
    // watches before claims before chip, so teardown releases requests
    // before the chip closes
    watches: Mutex<HashMap<Offset, Watch>>,
    claims: RwLock<HashMap<Offset, Claim>>,
    chip_raw: RawHandle,
    chip: NativeHandle,
}

impl V1Driver {
    /// Open the chip at the given index through `api`.
    pub fn new(
        api: Arc<dyn V1Api>,
        chip_index: u32,
        observer_config: ObserverConfig,
    ) -> Result<V1Driver> {
        let chip_raw = api.chip_open(chip_index)?;
        let closer = api.clone();
        let chip = NativeHandle::new(chip_raw, move |h| closer.chip_close(h));
        Ok(V1Driver {
            api,
            observer_config,
            watches: Mutex::new(HashMap::new()),
            claims: RwLock::new(HashMap::new()),
            chip_raw,
            chip,
        })
    }

    fn line_handle(&self, raw: RawHandle) -> NativeHandle {
        let api = self.api.clone();
        NativeHandle::new(raw, move |h| api.line_release(h))
    }

    // Request a line for foreground access, releasing any previous
    // request first since v1 cannot reconfigure in place.
    //
    // Lock order throughout the driver is watches before claims.
    fn claim(&self, offset: Offset, direction: Direction, initial: Value) -> Result<()> {
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
        let raw = match claims.remove(&offset) {
            Some(mut claim) => {
                claim.line.release();
                claim.raw
            }
            None => self.api.line_get(self.chip_raw, offset)?,
        };
        match direction {
            Direction::Input => self.api.line_request_input(raw)?,
            Direction::Output => self.api.line_request_output(raw, initial.into())?,
        }
        claims.insert(
            offset,
            Claim {
                line: self.line_handle(raw),
                raw,
                direction,
            },
        );
        Ok(())
    }

    // Request a line for edge events, reusing `existing` (a folded-in
    // input request's line) when given.
    fn edge_source(
        &self,
        offset: Offset,
        edge: EdgeDetection,
        existing: Option<RawHandle>,
    ) -> Result<V1EdgeSource> {
        let line_raw = match existing {
            Some(raw) => raw,
            None => self.api.line_get(self.chip_raw, offset)?,
        };
        self.api.line_request_edges(line_raw, edge.into())?;
        Ok(V1EdgeSource {
            api: self.api.clone(),
            offset,
            line: Arc::new(Mutex::new(self.line_handle(line_raw))),
            line_raw,
        })
    }
}

impl LineDriver for V1Driver {
    fn version(&self) -> DriverVersion {
        DriverVersion::V1
    }

    fn chip_info(&self) -> Result<ChipInfo> {
        Ok(self.api.chip_info(self.chip_raw)?.into())
    }

    fn claim_input(&self, offset: Offset) -> Result<()> {
        self.claim(offset, Direction::Input, Value::Inactive)
    }

    fn claim_output(&self, offset: Offset, initial: Value) -> Result<()> {
        self.claim(offset, Direction::Output, initial)
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
                return Ok(self.api.line_value(claim.raw)?.into());
            }
        }
        let watches = self
            .watches
            .lock()
            .expect("failed to acquire lock on watches");
        match watches.get(&offset) {
            Some(watch) => {
                // holding the line lock keeps the observer's exit from
                // releasing the request mid-read
                let line = watch
                    .line
                    .lock()
                    .expect("failed to acquire lock on line");
                match line.get() {
                    Ok(raw) => Ok(self.api.line_value(raw)?.into()),
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
                Ok(self.api.line_set_value(claim.raw, value.into())?)
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
                .line
                .lock()
                .expect("failed to acquire lock on line")
                .is_released();
            if released {
                // the previous observer ended on a fault; arm a fresh one
                let source = self.edge_source(offset, edge, None)?;
                watch.line = source.line.clone();
                watch.observer = EdgeObserver::spawn(
                    Box::new(source),
                    watch.subscribers.clone(),
                    self.observer_config,
                )?;
            }
            return Ok(watch.subscribers.add(handler));
        }

        // fold an existing input request into the watch
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
            Some(_) => claims.remove(&offset).map(|mut claim| {
                claim.line.release();
                claim.raw
            }),
            None => None,
        };
        drop(claims);

        let source = self.edge_source(offset, edge, existing)?;
        let line = source.line.clone();
        let subscribers = EdgeSubscribers::new();
        let id = subscribers.add(handler);
        let observer = EdgeObserver::spawn(
            Box::new(source),
            subscribers.clone(),
            self.observer_config,
        )?;
        watches.insert(
            offset,
            Watch {
                subscribers,
                edge,
                line,
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

    fn line_info(&self, _offset: Offset) -> Result<LineInfo> {
        Err(Error::Unsupported {
            version: DriverVersion::V1,
            operation: "line info",
        })
    }

    fn watch_line_info(&self, _offset: Offset) -> Result<LineInfo> {
        Err(Error::Unsupported {
            version: DriverVersion::V1,
            operation: "line info watching",
        })
    }

    fn unwatch_line_info(&self, _offset: Offset) -> Result<()> {
        Err(Error::Unsupported {
            version: DriverVersion::V1,
            operation: "line info watching",
        })
    }

    fn read_info_event(&self, _timeout: Duration) -> Result<Option<InfoChangeEvent>> {
        Err(Error::Unsupported {
            version: DriverVersion::V1,
            operation: "line info watching",
        })
    }
}

impl fmt::Debug for V1Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("V1Driver")
            .field("chip", &self.chip)
            .finish_non_exhaustive()
    }
}

impl Drop for V1Driver {
    fn drop(&mut self) {
        // stop observers and release requests before the chip closes
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
