//! Discovery events
//!
//! [`DiscoveryEvent`] is the only way into the state machines: caller requests,
//! radio completions and timer expiries all arrive as one of its variants and are
//! handed, one at a time, to [`crate::DiscoveryManager::dispatch`].

use crate::{
    DiscoveryStatus, PeerAddress,
    constants::{MAX_DEVICE_NAME_LENGTH, MAX_UUIDS_PER_RESULT},
    discovery::{DiscoveryRequest, Transport},
    radio::{AttributeSession, LookupHandle, RadioError},
    search::SearchRequest,
    service::{ServiceMask, Uuid},
    timer::TimerToken,
};
use heapless::{String, Vec};

/// UUIDs carried by one protocol result
pub type UuidList = Vec<Uuid, MAX_UUIDS_PER_RESULT>;

/// Inbound event for the discovery state machines
#[derive(Debug)]
pub enum DiscoveryEvent {
    /// Start a device search
    StartSearch(SearchRequest),
    /// Cancel the running device search
    CancelSearch,
    /// Start (or queue) service discovery on a peer
    StartDiscovery(DiscoveryRequest),
    /// A device answered the running inquiry
    InquiryResult(InquiryResult),
    /// The inquiry finished or was cancelled
    InquiryComplete(InquiryComplete),
    /// A remote name request finished
    RemoteNameResult(RemoteNameResult),
    /// A directory lookup query finished
    DirectoryLookupResult(DirectoryLookupResult),
    /// Attribute discovery progress or completion
    AttributeDiscoveryResult(AttributeDiscoveryResult),
    /// Final service result produced by the collaborator for the active peer
    ServiceResult(ServiceResult),
    /// The discovery timer expired
    DiscoveryTimeout(TimerToken),
    /// The deferred-close timer expired
    CloseTimeout(TimerToken),
}

/// Event tags with stable numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum EventKind {
    /// [`DiscoveryEvent::StartSearch`]
    StartSearch = 0x0000,
    /// [`DiscoveryEvent::CancelSearch`]
    CancelSearch = 0x0001,
    /// [`DiscoveryEvent::InquiryResult`]
    InquiryResult = 0x0002,
    /// [`DiscoveryEvent::InquiryComplete`]
    InquiryComplete = 0x0003,
    /// [`DiscoveryEvent::RemoteNameResult`]
    RemoteNameResult = 0x0004,
    /// [`DiscoveryEvent::StartDiscovery`]
    StartDiscovery = 0x0100,
    /// [`DiscoveryEvent::DirectoryLookupResult`]
    DirectoryLookupResult = 0x0101,
    /// [`DiscoveryEvent::AttributeDiscoveryResult`]
    AttributeDiscoveryResult = 0x0102,
    /// [`DiscoveryEvent::ServiceResult`]
    ServiceResult = 0x0103,
    /// [`DiscoveryEvent::DiscoveryTimeout`]
    DiscoveryTimeout = 0x0104,
    /// [`DiscoveryEvent::CloseTimeout`]
    CloseTimeout = 0x0105,
}

impl EventKind {
    /// Name used in log output
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartSearch => "START_SEARCH",
            Self::CancelSearch => "CANCEL_SEARCH",
            Self::InquiryResult => "INQUIRY_RESULT",
            Self::InquiryComplete => "INQUIRY_COMPLETE",
            Self::RemoteNameResult => "REMOTE_NAME_RESULT",
            Self::StartDiscovery => "START_DISCOVERY",
            Self::DirectoryLookupResult => "DIRECTORY_LOOKUP_RESULT",
            Self::AttributeDiscoveryResult => "ATTRIBUTE_DISCOVERY_RESULT",
            Self::ServiceResult => "SERVICE_RESULT",
            Self::DiscoveryTimeout => "DISCOVERY_TIMEOUT",
            Self::CloseTimeout => "CLOSE_TIMEOUT",
        }
    }
}

impl TryFrom<u16> for EventKind {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            0x0000 => Self::StartSearch,
            0x0001 => Self::CancelSearch,
            0x0002 => Self::InquiryResult,
            0x0003 => Self::InquiryComplete,
            0x0004 => Self::RemoteNameResult,
            0x0100 => Self::StartDiscovery,
            0x0101 => Self::DirectoryLookupResult,
            0x0102 => Self::AttributeDiscoveryResult,
            0x0103 => Self::ServiceResult,
            0x0104 => Self::DiscoveryTimeout,
            0x0105 => Self::CloseTimeout,
            other => return Err(other),
        })
    }
}

impl DiscoveryEvent {
    /// Tag of this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StartSearch(_) => EventKind::StartSearch,
            Self::CancelSearch => EventKind::CancelSearch,
            Self::StartDiscovery(_) => EventKind::StartDiscovery,
            Self::InquiryResult(_) => EventKind::InquiryResult,
            Self::InquiryComplete(_) => EventKind::InquiryComplete,
            Self::RemoteNameResult(_) => EventKind::RemoteNameResult,
            Self::DirectoryLookupResult(_) => EventKind::DirectoryLookupResult,
            Self::AttributeDiscoveryResult(_) => EventKind::AttributeDiscoveryResult,
            Self::ServiceResult(_) => EventKind::ServiceResult,
            Self::DiscoveryTimeout(_) => EventKind::DiscoveryTimeout,
            Self::CloseTimeout(_) => EventKind::CloseTimeout,
        }
    }
}

/// A device answered the inquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InquiryResult {
    /// Device address
    pub addr: PeerAddress,
    /// RSSI in dBm, when the controller reports it
    pub rssi: Option<i8>,
    /// Raw 24-bit class of device, when reported
    pub class_of_device: Option<u32>,
}

/// The inquiry ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InquiryComplete {
    /// Number of responses the controller saw
    pub num_responses: u8,
    /// `Ok` when the inquiry ran to its end or was cancelled cleanly
    pub status: Result<(), RadioError>,
}

/// A remote name request finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNameResult {
    /// Peer the name belongs to
    pub addr: PeerAddress,
    /// Resolved name (empty on failure)
    pub name: String<MAX_DEVICE_NAME_LENGTH>,
    /// HCI-level outcome of the request
    pub status: Result<(), RadioError>,
}

impl RemoteNameResult {
    /// Build a result from a raw, NUL-padded `BD_NAME` buffer
    #[must_use]
    pub fn from_bytes(addr: PeerAddress, bytes: &[u8], status: Result<(), RadioError>) -> Self {
        Self {
            addr,
            name: crate::DiscoveredDevice::name_from_bytes(bytes).unwrap_or_default(),
            status,
        }
    }
}

/// Result of one directory lookup query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLookupResult {
    /// Peer being queried
    pub peer: PeerAddress,
    /// Session the query was sent on
    pub handle: LookupHandle,
    /// Service class UUIDs of the matching records
    pub uuids: UuidList,
    /// RFCOMM server channel advertised by the matching record, if any
    pub channel: Option<u8>,
    /// Protocol outcome
    pub status: Result<(), RadioError>,
}

/// Attribute discovery progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeOutcome {
    /// More primary services were found
    Services(UuidList),
    /// End of discovery
    Complete,
    /// Discovery aborted by a protocol error
    Failed(RadioError),
}

/// Attribute discovery result for a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDiscoveryResult {
    /// Peer being discovered
    pub peer: PeerAddress,
    /// Session discovery runs on
    pub session: AttributeSession,
    /// What happened
    pub outcome: AttributeOutcome,
}

/// Final service result produced outside the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResult {
    /// Peer the result belongs to
    pub peer: PeerAddress,
    /// Transport the services were found over
    pub transport: Transport,
    /// Services found
    pub services: ServiceMask,
    /// Service UUIDs found
    pub uuids: UuidList,
    /// Outcome to report
    pub status: DiscoveryStatus,
}
