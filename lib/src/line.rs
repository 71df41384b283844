// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Types for the lines of a chip as the drivers expose them.

use super::dl;
use std::fmt;

/// An identifier for a line on a chip.
///
/// Lines are identified by their offset from the base of the chip.
pub type Offset = u32;

/// The logical level of a line.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Value {
    /// The line is inactive.
    #[default]
    Inactive,
    /// The line is active.
    Active,
}

impl Value {
    pub fn is_active(&self) -> bool {
        *self == Value::Active
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Active => write!(f, "active"),
            Value::Inactive => write!(f, "inactive"),
        }
    }
}

impl From<bool> for Value {
    fn from(active: bool) -> Value {
        if active {
            Value::Active
        } else {
            Value::Inactive
        }
    }
}

impl From<Value> for bool {
    fn from(value: Value) -> bool {
        value.is_active()
    }
}

/// The direction of a line.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Direction {
    /// The line is an input.
    #[default]
    Input,
    /// The line is an output.
    Output,
}

impl From<dl::Direction> for Direction {
    fn from(d: dl::Direction) -> Direction {
        match d {
            dl::Direction::Input => Direction::Input,
            dl::Direction::Output => Direction::Output,
        }
    }
}

impl From<Direction> for dl::Direction {
    fn from(d: Direction) -> dl::Direction {
        match d {
            Direction::Input => dl::Direction::Input,
            Direction::Output => dl::Direction::Output,
        }
    }
}

/// The edges a subscription watches for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EdgeDetection {
    RisingEdge,
    FallingEdge,
    BothEdges,
}

impl From<EdgeDetection> for dl::Edge {
    fn from(e: EdgeDetection) -> dl::Edge {
        match e {
            EdgeDetection::RisingEdge => dl::Edge::Rising,
            EdgeDetection::FallingEdge => dl::Edge::Falling,
            EdgeDetection::BothEdges => dl::Edge::Both,
        }
    }
}

/// The kind of edge that triggered an event.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EdgeKind {
    Rising,
    Falling,
}

impl From<dl::EventKind> for EdgeKind {
    fn from(k: dl::EventKind) -> EdgeKind {
        match k {
            dl::EventKind::Rising => EdgeKind::Rising,
            dl::EventKind::Falling => EdgeKind::Falling,
        }
    }
}

/// An edge detected on a monitored line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EdgeEvent {
    /// The line that changed.
    pub offset: Offset,
    /// The edge that triggered the event.
    pub kind: EdgeKind,
    /// Best effort timestamp of the edge, in nanoseconds.
    pub timestamp_ns: u64,
    /// Sequence number over all lines of the originating request.
    ///
    /// Zero when the native layer provides no counter.
    pub seqno: u64,
    /// Sequence number for the originating line.
    ///
    /// Zero when the native layer provides no counter.
    pub line_seqno: u64,
}

impl EdgeEvent {
    pub(crate) fn from_raw(raw: dl::RawEdgeEvent, fallback_offset: Offset) -> EdgeEvent {
        EdgeEvent {
            // the v1 API does not report the offset; the caller knows
            // the line its request watches
            offset: raw.offset.unwrap_or(fallback_offset),
            kind: raw.kind.into(),
            timestamp_ns: raw.timestamp_ns,
            seqno: raw.seqno,
            line_seqno: raw.line_seqno,
        }
    }
}

/// The publicly available information for a chip.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChipInfo {
    /// The system name of the chip, such as `gpiochip0`.
    pub name: String,
    /// A functional name for the chip.
    pub label: String,
    /// The number of lines the chip manages.
    pub num_lines: u32,
}

impl From<dl::ChipInfo> for ChipInfo {
    fn from(info: dl::ChipInfo) -> ChipInfo {
        ChipInfo {
            name: info.name,
            label: info.label,
            num_lines: info.num_lines,
        }
    }
}

/// The publicly available information for a line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineInfo {
    /// The line offset on the chip.
    pub offset: Offset,
    /// The name assigned to the line, if any.
    pub name: String,
    /// The consumer that has the line claimed, if any.
    pub consumer: String,
    /// The line is in use.
    pub used: bool,
    /// The direction of the line.
    pub direction: Direction,
}

impl From<dl::LineInfo> for LineInfo {
    fn from(info: dl::LineInfo) -> LineInfo {
        LineInfo {
            offset: info.offset,
            name: info.name,
            consumer: info.consumer,
            used: info.used,
            direction: info.direction.into(),
        }
    }
}

/// The trigger for an info change event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InfoChangeKind {
    /// The line was requested.
    Requested,
    /// The line was released.
    Released,
    /// The line was reconfigured.
    Reconfigured,
}

impl From<dl::InfoChangeKind> for InfoChangeKind {
    fn from(k: dl::InfoChangeKind) -> InfoChangeKind {
        match k {
            dl::InfoChangeKind::Requested => InfoChangeKind::Requested,
            dl::InfoChangeKind::Released => InfoChangeKind::Released,
            dl::InfoChangeKind::Reconfigured => InfoChangeKind::Reconfigured,
        }
    }
}

/// A change to the information for a watched line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InfoChangeEvent {
    /// The trigger for the change.
    pub kind: InfoChangeKind,
    /// Best effort timestamp of the change, in nanoseconds.
    pub timestamp_ns: u64,
    /// The line info after the change.
    pub info: LineInfo,
}

impl From<dl::RawInfoChangeEvent> for InfoChangeEvent {
    fn from(event: dl::RawInfoChangeEvent) -> InfoChangeEvent {
        InfoChangeEvent {
            kind: event.kind.into(),
            timestamp_ns: event.timestamp_ns,
            info: event.info.into(),
        }
    }
}
