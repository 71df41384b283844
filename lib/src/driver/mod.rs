// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Drivers for the lines of one chip, one per libgpiod generation.

use super::events::{EdgeHandler, SubscriberId};
use super::line::{ChipInfo, EdgeDetection, InfoChangeEvent, LineInfo, Offset, Value};
use super::{DriverVersion, Result};
use std::fmt;
use std::time::Duration;

mod v1;
mod v2;

pub use v1::V1Driver;
pub use v2::V2Driver;

/// Operations on the lines of one chip.
///
/// All operations take `&self`; a driver may be shared across threads and
/// keeps its own bookkeeping behind internal locks. No internal lock is
/// held across a native wait, so operations on one line do not stall
/// behind event observation on another.
///
/// Claimed lines and edge-armed lines are disjoint: a line claimed as an
/// input is folded into the watch when its first subscription arrives,
/// and becomes unclaimed again when the last subscription is removed.
pub trait LineDriver: Send + Sync + fmt::Debug {
    /// The libgpiod generation this driver speaks.
    fn version(&self) -> DriverVersion;

    /// The name, label and line count of the chip.
    fn chip_info(&self) -> Result<ChipInfo>;

    /// Claim a line as an input.
    ///
    /// Reconfigures the line if already claimed.
    fn claim_input(&self, offset: Offset) -> Result<()>;

    /// Claim a line as an output driving `initial`.
    ///
    /// Reconfigures the line if already claimed.
    fn claim_output(&self, offset: Offset, initial: Value) -> Result<()>;

    /// Release a claimed line.
    ///
    /// Releasing an unclaimed line does nothing.
    fn release_line(&self, offset: Offset) -> Result<()>;

    /// The level of a claimed or edge-armed line.
    fn value(&self, offset: Offset) -> Result<Value>;

    /// Drive the level of a line claimed as an output.
    fn set_value(&self, offset: Offset, value: Value) -> Result<()>;

    /// Subscribe a handler to a line's edge events, arming the line's
    /// observer if it is not already armed.
    ///
    /// The first subscription fixes the edges watched; a later
    /// subscription asking for different edges is rejected. If a previous
    /// observer terminated on a fault, subscribing arms a fresh one.
    fn subscribe_edges(
        &self,
        offset: Offset,
        edge: EdgeDetection,
        handler: EdgeHandler,
    ) -> Result<SubscriberId>;

    /// Remove one subscription.
    ///
    /// Removing the last subscription for a line stops its observer and
    /// releases the underlying request.
    fn unsubscribe(&self, offset: Offset, id: SubscriberId) -> Result<()>;

    /// The information for a line.
    fn line_info(&self, offset: Offset) -> Result<LineInfo>;

    /// Start watching a line for info changes, returning its current
    /// info.
    fn watch_line_info(&self, offset: Offset) -> Result<LineInfo>;

    /// Stop watching a line for info changes.
    fn unwatch_line_info(&self, offset: Offset) -> Result<()>;

    /// Read the next info change for any watched line, waiting up to
    /// `timeout`.
    ///
    /// Returns `None` on timeout.
    fn read_info_event(&self, timeout: Duration) -> Result<Option<InfoChangeEvent>>;
}

// The character device path for a chip index.
pub(crate) fn chip_path(index: u32) -> String {
    format!("/dev/gpiochip{}", index)
}
