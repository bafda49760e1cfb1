//! Shared value types: addressing, priorities, radio options, key classes.

use std::fmt;

use super::constants::{
    BROADCAST_NODE_ID, MAX_CLASSIC_NODE_ID, MAX_LR_NODE_ID, MIN_CLASSIC_NODE_ID, MIN_LR_NODE_ID,
};
use super::error::TxError;

/// Node identifier on the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Broadcast destination.
    pub const BROADCAST: Self = Self(BROADCAST_NODE_ID);

    /// Get the raw id.
    pub fn get(self) -> u16 {
        self.0
    }

    /// Classic (non Long Range) node id.
    pub fn is_classic(self) -> bool {
        (MIN_CLASSIC_NODE_ID..=MAX_CLASSIC_NODE_ID).contains(&self.0)
    }

    /// Long Range node id.
    pub fn is_long_range(self) -> bool {
        (MIN_LR_NODE_ID..=MAX_LR_NODE_ID).contains(&self.0)
    }

    /// Broadcast address.
    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    /// Valid unicast destination.
    pub fn is_unicast(self) -> bool {
        self.is_classic() || self.is_long_range()
    }

    /// The 8-bit form used inside classic frames and the S0 MAC.
    pub fn as_classic_byte(self) -> Option<u8> {
        if self.is_classic() || self.is_broadcast() {
            u8::try_from(self.0).ok()
        } else {
            None
        }
    }
}

impl From<u8> for NodeId {
    fn from(id: u8) -> Self {
        Self(u16::from(id))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority class of an outbound frame.
///
/// Lower discriminant = transmitted first. `Control` is reserved for frames
/// the security layer synthesizes (nonce get/report) so a peer never waits on
/// application traffic to hand out or receive a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    /// Security control frames.
    Control = 0,

    /// Must go out before anything the application queued earlier.
    Critical = 1,

    /// User-initiated commands.
    High = 2,

    /// Regular traffic.
    #[default]
    Normal = 3,

    /// Polling and refreshes.
    Low = 4,

    /// Deliver when nothing else is pending.
    Background = 5,
}

impl Priority {
    /// Convert from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Priority::Control),
            1 => Some(Priority::Critical),
            2 => Some(Priority::High),
            3 => Some(Priority::Normal),
            4 => Some(Priority::Low),
            5 => Some(Priority::Background),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Correlates an enqueued frame with its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(pub u64);

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion status reported for every enqueued frame.
pub type TxOutcome = Result<(), TxError>;

/// Options handed to the radio with each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    /// Request a link-layer acknowledgment.
    pub ack_requested: bool,
    /// Frames the destination is expected to send back.
    pub expected_responses: u8,
}

impl TxOptions {
    /// Options for a frame towards `destination`.
    pub fn for_destination(destination: NodeId, expected_responses: u8) -> Self {
        Self {
            ack_requested: !destination.is_broadcast(),
            expected_responses,
        }
    }
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            ack_requested: true,
            expected_responses: 0,
        }
    }
}

/// Reception metadata from the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxOptions {
    /// Frame travelled over repeaters.
    pub routed: bool,
    /// Frame was sent to a broadcast or multicast address.
    pub multicast: bool,
    /// Received signal strength, if the radio reports it.
    pub rssi: Option<i8>,
}

/// Bitmap of key classes granted to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct KeyClasses(pub u8);

impl KeyClasses {
    /// No keys granted.
    pub const NONE: Self = Self(0);
    /// S2 Unauthenticated.
    pub const S2_UNAUTHENTICATED: Self = Self(0x01);
    /// S2 Authenticated.
    pub const S2_AUTHENTICATED: Self = Self(0x02);
    /// S2 Access Control.
    pub const S2_ACCESS: Self = Self(0x04);
    /// Security 0.
    pub const S0: Self = Self(0x80);

    /// Check whether every class in `other` is granted.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any S2 class granted.
    pub fn has_s2(self) -> bool {
        self.0 & 0x07 != 0
    }

    /// Union of both sets.
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Protocol a node was included with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InclusionProtocol {
    /// Classic mesh.
    ZWave,
    /// Star-topology Long Range.
    LongRange,
    /// Not recorded.
    #[default]
    Unknown,
}
