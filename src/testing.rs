//! Test doubles shared by the unit tests

use crate::{
    DiscoveryStatus, PeerAddress, SearchCallback, SearchEvent, ServiceDiscoveryCallback,
    ServiceDiscoveryResult, Uuid,
    radio::{AttributeSession, InquiryParams, LookupHandle, Radio, RadioError},
    timer::{TimerId, TimerToken, Timers},
};
use core::time::Duration;
use std::{boxed::Box, sync::Mutex, vec::Vec};

/// Peer address whose last byte is `id`
pub fn peer(id: u8) -> PeerAddress {
    PeerAddress::new([0x00, 0x1B, 0xDC, 0x00, 0x00, id])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioCall {
    StartScan(InquiryParams),
    CancelScan,
    ResolveName(PeerAddress),
    CancelNameRequest(PeerAddress),
    OpenDirectoryLookup(PeerAddress),
    Query(LookupHandle, Uuid),
    CloseDirectoryLookup(LookupHandle),
    OpenAttributeSession(PeerAddress),
    Discover(AttributeSession),
    CloseAttributeSession(AttributeSession),
}

/// Radio that records every call and acknowledges unless told to refuse
#[derive(Debug, Default)]
pub struct MockRadio {
    pub calls: Vec<RadioCall>,
    pub refuse_scan: bool,
    pub refuse_cancel: bool,
    pub refuse_open: bool,
    pub refuse_names: Vec<PeerAddress>,
    pub next_handle: u16,
    pub attribute_session: Option<AttributeSession>,
}

impl MockRadio {
    pub fn last_attribute_session(&self) -> Option<AttributeSession> {
        self.attribute_session
    }

    fn ack(&self, refused: bool) -> Result<(), RadioError> {
        if refused {
            Err(RadioError::Busy)
        } else {
            Ok(())
        }
    }

    fn allocate_handle(&mut self) -> u16 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl Radio for MockRadio {
    fn start_scan(&mut self, params: &InquiryParams) -> Result<(), RadioError> {
        self.calls.push(RadioCall::StartScan(*params));
        self.ack(self.refuse_scan)
    }

    fn cancel_scan(&mut self) -> Result<(), RadioError> {
        self.calls.push(RadioCall::CancelScan);
        self.ack(self.refuse_cancel)
    }

    fn resolve_name(&mut self, peer: PeerAddress) -> Result<(), RadioError> {
        self.calls.push(RadioCall::ResolveName(peer));
        self.ack(self.refuse_names.contains(&peer))
    }

    fn cancel_name_request(&mut self, peer: PeerAddress) -> Result<(), RadioError> {
        self.calls.push(RadioCall::CancelNameRequest(peer));
        self.ack(self.refuse_cancel)
    }

    fn open_directory_lookup(&mut self, peer: PeerAddress) -> Result<LookupHandle, RadioError> {
        self.calls.push(RadioCall::OpenDirectoryLookup(peer));
        self.ack(self.refuse_open)?;
        Ok(LookupHandle(self.allocate_handle()))
    }

    fn query(&mut self, handle: LookupHandle, service: Uuid) -> Result<(), RadioError> {
        self.calls.push(RadioCall::Query(handle, service));
        Ok(())
    }

    fn close_directory_lookup(&mut self, handle: LookupHandle) {
        self.calls.push(RadioCall::CloseDirectoryLookup(handle));
    }

    fn open_attribute_session(
        &mut self,
        peer: PeerAddress,
    ) -> Result<AttributeSession, RadioError> {
        self.calls.push(RadioCall::OpenAttributeSession(peer));
        self.ack(self.refuse_open)?;
        let session = AttributeSession {
            client_if: 1,
            conn_id: self.allocate_handle(),
        };
        self.attribute_session = Some(session);
        Ok(session)
    }

    fn discover(&mut self, session: AttributeSession) -> Result<(), RadioError> {
        self.calls.push(RadioCall::Discover(session));
        Ok(())
    }

    fn close_attribute_session(&mut self, session: AttributeSession) {
        self.calls.push(RadioCall::CloseAttributeSession(session));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCall {
    Arm(TimerId, TimerToken, Duration),
    Cancel(TimerId),
}

/// Timers that only record what they were asked to do
#[derive(Debug, Default)]
pub struct MockTimers {
    pub calls: Vec<TimerCall>,
}

impl MockTimers {
    /// Token of the latest arming of `id`, unless it was cancelled since
    pub fn armed(&self, id: TimerId) -> Option<TimerToken> {
        self.calls.iter().rev().find_map(|call| match *call {
            TimerCall::Arm(timer, token, _) if timer == id => Some(Some(token)),
            TimerCall::Cancel(timer) if timer == id => Some(None),
            _ => None,
        })?
    }
}

impl Timers for MockTimers {
    fn arm(&mut self, timer: TimerId, token: TimerToken, after: Duration) {
        self.calls.push(TimerCall::Arm(timer, token, after));
    }

    fn cancel(&mut self, timer: TimerId) {
        self.calls.push(TimerCall::Cancel(timer));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchRecord {
    DeviceFound(PeerAddress),
    NameResolved(PeerAddress),
    Complete(DiscoveryStatus),
}

/// Search callback that remembers everything it was told
#[derive(Debug, Default)]
pub struct SearchRecorder {
    records: Mutex<Vec<SearchRecord>>,
}

impl SearchRecorder {
    pub fn leak() -> &'static Self {
        Box::leak(Box::default())
    }

    pub fn records(&self) -> Vec<SearchRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<DiscoveryStatus> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                SearchRecord::Complete(status) => Some(status),
                _ => None,
            })
            .collect()
    }
}

impl SearchCallback for SearchRecorder {
    fn on_search_event(&self, event: SearchEvent<'_>) {
        let record = match event {
            SearchEvent::DeviceFound(device) => SearchRecord::DeviceFound(device.addr),
            SearchEvent::NameResolved(device) => SearchRecord::NameResolved(device.addr),
            SearchEvent::Complete(status) => SearchRecord::Complete(status),
        };
        self.records.lock().unwrap().push(record);
    }
}

/// Service discovery callback that remembers every result
#[derive(Debug, Default)]
pub struct DiscoveryRecorder {
    results: Mutex<Vec<ServiceDiscoveryResult>>,
}

impl DiscoveryRecorder {
    pub fn leak() -> &'static Self {
        Box::leak(Box::default())
    }

    pub fn results(&self) -> Vec<ServiceDiscoveryResult> {
        self.results.lock().unwrap().clone()
    }

    /// The one result this callback got; panics on zero or several
    pub fn single(&self) -> ServiceDiscoveryResult {
        let results = self.results();
        assert_eq!(results.len(), 1, "expected exactly one result");
        results[0].clone()
    }
}

impl ServiceDiscoveryCallback for DiscoveryRecorder {
    fn on_service_discovery(&self, result: &ServiceDiscoveryResult) {
        self.results.lock().unwrap().push(result.clone());
    }
}
