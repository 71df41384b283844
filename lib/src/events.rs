// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Background observation of edge events.
//!
//! Each edge-armed line gets its own observer: a thread that owns a
//! native event source outright and loops waiting on it in bounded
//! slices. Between slices the thread checks its stop flag, so tearing an
//! observer down never waits longer than one slice, and no lock is held
//! across a native wait.

use super::line::EdgeEvent;
use super::{dl, Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

/// A source of edge events an observer can wait on and drain.
///
/// Implementations own the native request backing the source and release
/// it when dropped, which happens on the observer thread after the loop
/// exits.
pub trait EdgeSource: Send {
    /// Block until events are ready or the timeout elapses.
    ///
    /// Returns false on timeout.
    fn wait(&self, timeout: Duration) -> dl::Result<bool>;

    /// Read the ready events, appending them to `out` in occurrence
    /// order.
    fn drain(&self, out: &mut Vec<EdgeEvent>) -> dl::Result<usize>;
}

/// An edge event, or the fault that ended observation.
pub type EdgeResult = std::result::Result<EdgeEvent, Error>;

/// A callback receiving edge events for a subscribed line.
pub type EdgeHandler = Arc<dyn Fn(EdgeResult) + Send + Sync>;

/// Identifies one subscription so it can be removed independently.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriberId(u64);

/// The handlers subscribed to one line's events.
///
/// Shared between the driver, which adds and removes handlers, and the
/// observer thread, which reads them to dispatch. Handlers are cloned out
/// under the lock and invoked outside it.
#[derive(Default)]
pub struct EdgeSubscribers {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriberId, EdgeHandler)>>,
}

impl EdgeSubscribers {
    pub fn new() -> Arc<EdgeSubscribers> {
        Arc::new(EdgeSubscribers::default())
    }

    pub fn add(&self, handler: EdgeHandler) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .expect("failed to acquire write lock on subscribers")
            .push((id, handler));
        id
    }

    /// Remove a subscription. Returns false for an unknown id.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .expect("failed to acquire write lock on subscribers");
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.handlers
            .read()
            .expect("failed to acquire read lock on subscribers")
            .is_empty()
    }

    /// Deliver one result to every current subscriber.
    pub fn dispatch(&self, result: &EdgeResult) {
        let handlers: Vec<EdgeHandler> = self
            .handlers
            .read()
            .expect("failed to acquire read lock on subscribers")
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(result.clone());
        }
    }
}

/// What an observer is doing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObserverState {
    /// Not observing. The initial and final state.
    Idle,
    /// Blocked in a bounded native wait.
    Waiting,
    /// Reading and dispatching ready events.
    Draining,
}

const STATE_IDLE: u8 = 0;
const STATE_WAITING: u8 = 1;
const STATE_DRAINING: u8 = 2;

/// Tuning for an observer loop.
#[derive(Clone, Copy, Debug)]
pub struct ObserverConfig {
    /// The upper bound on one native wait.
    ///
    /// Also bounds how long teardown can take.
    pub wait_timeout: Duration,
    /// The number of events drained per slice.
    pub event_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> ObserverConfig {
        ObserverConfig {
            wait_timeout: Duration::from_secs(1),
            event_capacity: 16,
        }
    }
}

/// Constructs observers, so tests can substitute their own.
pub type ObserverFactory = Arc<
    dyn Fn(Box<dyn EdgeSource>, Arc<EdgeSubscribers>, ObserverConfig) -> Result<EdgeObserver>
        + Send
        + Sync,
>;

/// A background thread observing one line's edge events.
///
/// The thread loops waiting on its source with a bounded timeout and
/// dispatching drained events to the subscribers. It exits when stopped,
/// or after dispatching the fault when a native call fails. The source is
/// dropped, releasing its native request, as the thread exits.
pub struct EdgeObserver {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EdgeObserver {
    /// Start observing `source`, dispatching to `subscribers`.
    pub fn spawn(
        source: Box<dyn EdgeSource>,
        subscribers: Arc<EdgeSubscribers>,
        config: ObserverConfig,
    ) -> Result<EdgeObserver> {
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(STATE_IDLE));
        let thread = {
            let stop = stop.clone();
            let state = state.clone();
            thread::Builder::new()
                .name("gpiod-dyn-edge".into())
                .spawn(move || run(source, subscribers, config, stop, state))
                .map_err(|e| Error::Observer(e.to_string()))?
        };
        Ok(EdgeObserver {
            stop,
            state,
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> ObserverState {
        match self.state.load(Ordering::Acquire) {
            STATE_WAITING => ObserverState::Waiting,
            STATE_DRAINING => ObserverState::Draining,
            _ => ObserverState::Idle,
        }
    }

    /// The observer loop has exited, by stop or by fault.
    pub fn is_terminated(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop the loop and wait for the thread to exit.
    ///
    /// Returns within roughly one wait timeout. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("edge observer thread panicked");
            }
        }
    }
}

impl Drop for EdgeObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    source: Box<dyn EdgeSource>,
    subscribers: Arc<EdgeSubscribers>,
    config: ObserverConfig,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
) {
    let mut events = Vec::with_capacity(config.event_capacity);
    while !stop.load(Ordering::Acquire) {
        state.store(STATE_WAITING, Ordering::Release);
        match source.wait(config.wait_timeout) {
            Ok(false) => continue,
            Ok(true) => {
                state.store(STATE_DRAINING, Ordering::Release);
                events.clear();
                match source.drain(&mut events) {
                    Ok(_) => {
                        for event in events.drain(..) {
                            subscribers.dispatch(&Ok(event));
                        }
                    }
                    Err(e) => {
                        log::error!("edge drain failed: {}", e);
                        subscribers.dispatch(&Err(e.into()));
                        break;
                    }
                }
            }
            Err(e) => {
                log::error!("edge wait failed: {}", e);
                subscribers.dispatch(&Err(e.into()));
                break;
            }
        }
    }
    state.store(STATE_IDLE, Ordering::Release);
}
