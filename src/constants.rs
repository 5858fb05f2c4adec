//! `Birdwatch` Constants
//!
//! Capacity limits and default timing used by the discovery state machines.
//! Every collection in the crate is a fixed-capacity `heapless` container sized
//! by one of these values.

use core::time::Duration;

/// General Inquiry Access Code (GIAC) - standard inquiry LAP
pub const GIAC: [u8; 3] = [0x9E, 0x8B, 0x33];

/// Default inquiry duration in 1.28s units (0x0A = ~12.8 seconds)
pub const DEFAULT_INQUIRY_DURATION: u8 = 0x0A;

/// Unlimited number of inquiry responses
pub const UNLIMITED_RESPONSES: u8 = 0;

/// `BD_ADDR` length in bytes
pub const BD_ADDR_LENGTH: usize = 6;

/// Maximum remote device name length in bytes (`BD_NAME`)
pub const MAX_DEVICE_NAME_LENGTH: usize = 248;

/// Maximum number of devices remembered during one device search
pub const MAX_DISCOVERED_DEVICES: usize = 16;

/// Storage capacity of the service discovery request queue
pub const MAX_PENDING_DISCOVERIES: usize = 16;

/// Default number of service discovery requests allowed to wait behind the active one
pub const DEFAULT_PENDING_DISCOVERIES: usize = 8;

/// Maximum number of distinct service UUIDs reported for one peer
pub const MAX_DISCOVERED_UUIDS: usize = 32;

/// Maximum number of UUIDs carried by a single protocol result event
pub const MAX_UUIDS_PER_RESULT: usize = 16;

/// Default bound on a whole service discovery session
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay before an idle discovery connection is torn down
pub const DEFAULT_CLOSE_DELAY: Duration = Duration::from_millis(5000);

/// Default depth of the serialized event channel
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Maximum number of discovery events produced from a single HCI event
pub const MAX_EVENTS_PER_HCI_EVENT: usize = 8;
