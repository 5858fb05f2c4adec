//! Processor - serialized event loop and HCI bridge
//!
//! All discovery work happens on one logical thread: [`run`] takes events off an
//! `embassy-sync` channel one at a time and hands each to
//! [`DiscoveryManager::dispatch`]. Callers and platform glue only ever push
//! [`DiscoveryEvent`]s into that channel.
//!
//! # Usage
//!
//! ```rust,ignore
//! use birdwatch::{DiscoveryManager, DiscoveryOptions, api::DiscoveryClient, processor};
//! use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
//!
//! static EVENTS: Channel<CriticalSectionRawMutex, birdwatch::DiscoveryEvent, 8> = Channel::new();
//!
//! #[embassy_executor::task]
//! async fn discovery_task(radio: MyRadio, timers: MyTimers) -> ! {
//!     let mut manager = DiscoveryManager::new(radio, timers, DiscoveryOptions::default());
//!     processor::run(&mut manager, EVENTS.receiver()).await
//! }
//! ```
//!
//! Radio glue built on `bt-hci` can feed controller events through
//! [`hci_events`], which turns inquiry and remote name events into
//! [`DiscoveryEvent`]s.

use crate::{
    DiscoveryEvent, DiscoveryManager, PeerAddress, RadioError,
    constants::{BD_ADDR_LENGTH, MAX_EVENTS_PER_HCI_EVENT},
    event::{InquiryComplete, InquiryResult, RemoteNameResult},
    radio::Radio,
    timer::Timers,
};
use bt_hci::{event::Event, param::Status};
use embassy_sync::{blocking_mutex::raw::RawMutex, channel::Receiver};
use heapless::Vec;

/// Run the discovery event loop forever
pub async fn run<M: RawMutex, R: Radio, T: Timers, const N: usize>(
    manager: &mut DiscoveryManager<R, T>,
    events: Receiver<'_, M, DiscoveryEvent, N>,
) -> ! {
    loop {
        debug!("[PROCESSOR] Waiting for event...");
        let event = events.receive().await;
        debug!("[PROCESSOR] Event: {}", event.kind().as_str());
        // Rejected events are logged by the dispatcher
        manager.dispatch(event).ok();
        embassy_futures::yield_now().await;
    }
}

/// Dispatch every event already waiting in the channel, returning how many
pub fn drain<M: RawMutex, R: Radio, T: Timers, const N: usize>(
    manager: &mut DiscoveryManager<R, T>,
    events: &Receiver<'_, M, DiscoveryEvent, N>,
) -> usize {
    let mut handled = 0;
    while let Ok(event) = events.try_receive() {
        manager.dispatch(event).ok();
        handled += 1;
    }
    handled
}

/// Translate a controller event into discovery events
///
/// Events that have nothing to do with device search produce nothing.
pub fn hci_events(event: &Event<'_>) -> Vec<DiscoveryEvent, MAX_EVENTS_PER_HCI_EVENT> {
    let mut events = Vec::new();
    match *event {
        Event::InquiryResult(ref result) => {
            // Responses are packed field by field: all addresses, then all classes
            let addrs = &*result.bd_addr;
            let classes = &*result.class_of_device;
            for i in 0..usize::from(result.num_responses) {
                let Some(addr) = peer_at(addrs, i) else {
                    break;
                };
                let found = InquiryResult {
                    addr,
                    rssi: None,
                    class_of_device: class_of_device_at(classes, i),
                };
                if !push_response(&mut events, found) {
                    break;
                }
            }
        }
        Event::InquiryResultWithRssi(ref result) => {
            let addrs = &*result.bd_addr;
            let rssi = &*result.rssi;
            let classes = &*result.class_of_device;
            for i in 0..usize::from(result.num_responses) {
                let Some(addr) = peer_at(addrs, i) else {
                    break;
                };
                #[allow(clippy::cast_possible_wrap)]
                let found = InquiryResult {
                    addr,
                    rssi: rssi.get(i).map(|&raw| raw as i8),
                    class_of_device: class_of_device_at(classes, i),
                };
                if !push_response(&mut events, found) {
                    break;
                }
            }
        }
        Event::ExtendedInquiryResult(ref result) => {
            let found = InquiryResult {
                addr: PeerAddress::new(result.bd_addr),
                rssi: Some(result.rssi),
                class_of_device: class_of_device_at(&result.class_of_device, 0),
            };
            events.push(DiscoveryEvent::InquiryResult(found)).ok();
        }
        Event::InquiryComplete(ref complete) => {
            let complete = InquiryComplete {
                num_responses: 0,
                status: status_to_result(complete.status),
            };
            events.push(DiscoveryEvent::InquiryComplete(complete)).ok();
        }
        Event::RemoteNameRequestComplete(ref complete) => {
            if let Some(addr) = peer_at(complete.bd_addr.raw(), 0) {
                let result = RemoteNameResult::from_bytes(
                    addr,
                    &complete.remote_name,
                    status_to_result(complete.status),
                );
                events.push(DiscoveryEvent::RemoteNameResult(result)).ok();
            }
        }
        _ => trace!("[PROCESSOR] Ignoring HCI event"),
    }
    events
}

/// Store one inquiry response; warns and returns `false` once `events` is full
fn push_response(
    events: &mut Vec<DiscoveryEvent, MAX_EVENTS_PER_HCI_EVENT>,
    found: InquiryResult,
) -> bool {
    if events.push(DiscoveryEvent::InquiryResult(found)).is_err() {
        warn!(
            "[PROCESSOR] More than {} responses in one HCI event, dropping {} and the rest",
            MAX_EVENTS_PER_HCI_EVENT, found.addr
        );
        return false;
    }
    true
}

fn status_to_result(status: Status) -> Result<(), RadioError> {
    status
        .to_result()
        .map_err(|e| RadioError::Hci(e.to_status().into_inner()))
}

/// Address of the `i`th response in a packed address field
fn peer_at(bytes: &[u8], i: usize) -> Option<PeerAddress> {
    let start = i * BD_ADDR_LENGTH;
    bytes
        .get(start..start + BD_ADDR_LENGTH)
        .and_then(|raw| PeerAddress::try_from(raw).ok())
}

/// Little-endian 3-byte Class of Device of the `i`th response; all zeroes means unknown
fn class_of_device_at(bytes: &[u8], i: usize) -> Option<u32> {
    let raw = bytes.get(i * 3..i * 3 + 3)?;
    if raw.iter().all(|&b| b == 0) {
        None
    } else {
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], 0]))
    }
}
