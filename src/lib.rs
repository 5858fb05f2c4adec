#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

#[cfg(test)]
extern crate std;

mod fmt;

mod address;
pub mod api;
pub mod constants;
pub mod discovery;
mod dispatcher;
pub mod event;
pub mod processor;
pub mod queue;
pub mod radio;
pub mod search;
pub mod service;
pub mod timer;

#[cfg(test)]
mod testing;

use crate::constants::{
    DEFAULT_CLOSE_DELAY, DEFAULT_DISCOVERY_TIMEOUT, DEFAULT_INQUIRY_DURATION,
    DEFAULT_PENDING_DISCOVERIES, GIAC, MAX_DEVICE_NAME_LENGTH, UNLIMITED_RESPONSES,
};
use core::time::Duration;
use heapless::String;

pub use address::PeerAddress;
pub use discovery::{
    DiscoveryRequest, ServiceDiscoveryCallback, ServiceDiscoveryResult, Transport,
};
pub use dispatcher::{DiscoveryManager, DispatchError};
pub use event::DiscoveryEvent;
pub use radio::{InquiryParams, Radio, RadioError};
pub use search::{SearchCallback, SearchEvent, SearchRequest};
pub use service::{ServiceId, ServiceMask, Uuid};
pub use timer::{TimerId, TimerToken, Timers};

/// Outcome reported to every search and service discovery callback
///
/// Results delivered alongside a non-`Completed` status are still authoritative:
/// they hold everything found before the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryStatus {
    /// The session ran to its natural end
    Completed,
    /// The session was cancelled by a caller
    Cancelled,
    /// The discovery timer expired before the session ended
    TimedOut,
    /// A protocol or radio failure ended the session
    Failed,
    /// The request was displaced or rejected by a conflicting session
    Busy,
}

/// Caller-side errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryError {
    /// Malformed peer address
    InvalidAddress,
    /// The event queue is full; the request was not submitted
    QueueFull,
}

/// Options for configuring a [`DiscoveryManager`]
///
/// # Examples
///
/// ```rust
/// use birdwatch::{DiscoveryOptions, InquiryParams, constants};
/// use core::time::Duration;
///
/// let options = DiscoveryOptions {
///     inquiry: InquiryParams {
///         lap: constants::GIAC,
///         inquiry_length: 5,  // 5 * 1.28s = 6.4 seconds
///         num_responses: 10,  // stop after 10 devices
///     },
///     resolve_names: true,
///     discovery_timeout: Duration::from_secs(20),
///     close_delay: Duration::from_secs(2),
///     max_pending_discoveries: 4,
/// };
/// assert_eq!(options.inquiry.num_responses, 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Parameters of every inquiry started by a device search
    pub inquiry: InquiryParams,
    /// Resolve the names of devices that were found without one
    pub resolve_names: bool,
    /// Upper bound on one service discovery session
    pub discovery_timeout: Duration,
    /// How long an idle discovery connection is kept for reuse
    pub close_delay: Duration,
    /// Service discovery requests allowed to wait behind the active one, at most
    /// [`constants::MAX_PENDING_DISCOVERIES`]; requests beyond it are answered `Busy`
    pub max_pending_discoveries: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            inquiry: InquiryParams {
                lap: GIAC,
                inquiry_length: DEFAULT_INQUIRY_DURATION,
                num_responses: UNLIMITED_RESPONSES,
            },
            resolve_names: true,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            close_delay: DEFAULT_CLOSE_DELAY,
            max_pending_discoveries: DEFAULT_PENDING_DISCOVERIES,
        }
    }
}

/// A device found by a device search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Device address
    pub addr: PeerAddress,
    /// Received Signal Strength Indicator (RSSI) in dBm, if available
    pub rssi: Option<i8>,
    /// Raw 24-bit Class of Device, if reported
    pub class_of_device: Option<u32>,
    /// Remote name, once resolved
    pub name: Option<String<MAX_DEVICE_NAME_LENGTH>>,
}

impl DiscoveredDevice {
    /// Create a device record with nothing but an address
    #[must_use]
    pub const fn new(addr: PeerAddress) -> Self {
        Self {
            addr,
            rssi: None,
            class_of_device: None,
            name: None,
        }
    }

    /// Set the RSSI
    #[must_use]
    pub fn with_rssi(mut self, rssi: i8) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set the class of device
    #[must_use]
    pub fn with_class_of_device(mut self, class_of_device: u32) -> Self {
        self.class_of_device = Some(class_of_device);
        self
    }

    /// Set the name
    #[must_use]
    pub fn with_name(mut self, name: String<MAX_DEVICE_NAME_LENGTH>) -> Self {
        self.name = Some(name);
        self
    }

    /// Decode a NUL-terminated remote name buffer
    ///
    /// Returns `None` if the bytes before the terminator are not valid UTF-8.
    #[must_use]
    pub fn name_from_bytes(bytes: &[u8]) -> Option<String<MAX_DEVICE_NAME_LENGTH>> {
        let len = bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(bytes.len())
            .min(MAX_DEVICE_NAME_LENGTH);
        let text = core::str::from_utf8(&bytes[..len]).ok()?;
        String::try_from(text).ok()
    }

    /// Merge fresh inquiry data into the record, keeping known values the
    /// controller did not report this time
    pub fn refresh(&mut self, rssi: Option<i8>, class_of_device: Option<u32>) {
        if rssi.is_some() {
            self.rssi = rssi;
        }
        if class_of_device.is_some() {
            self.class_of_device = class_of_device;
        }
    }
}
