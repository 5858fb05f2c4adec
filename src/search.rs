//! Device search state machine
//!
//! Drives an inquiry, collects the devices that answer it and then resolves the
//! names of those that were found without one, one remote name request at a
//! time.
//!
//! ```text
//!   Idle ──StartSearch──▶ Active ──CancelSearch / StartSearch──▶ Cancelling
//!    ▲                      │                                        │
//!    └──── completion ──────┘◀──── InquiryComplete / RemoteNameResult ┘
//! ```
//!
//! Only one search runs at a time. A `StartSearch` that arrives while a search
//! is running cancels it and is replayed once the radio confirms the cancel;
//! every `StartSearch` receives exactly one [`SearchEvent::Complete`].

use crate::{
    DiscoveredDevice, DiscoveryStatus, PeerAddress,
    constants::{MAX_DEVICE_NAME_LENGTH, MAX_DISCOVERED_DEVICES},
    dispatcher::DispatchError,
    event::{EventKind, InquiryComplete, InquiryResult, RemoteNameResult},
    radio::{InquiryParams, Radio},
};
use core::fmt;
use heapless::{String, Vec};

/// Receives device search progress and the final outcome
pub trait SearchCallback: Sync {
    /// Called for every search event
    fn on_search_event(&self, event: SearchEvent<'_>);
}

/// Progress of a device search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEvent<'a> {
    /// A device answered the inquiry (or updated its record)
    DeviceFound(&'a DiscoveredDevice),
    /// A device's remote name was resolved
    NameResolved(&'a DiscoveredDevice),
    /// The search ended; sent exactly once per `StartSearch`
    Complete(DiscoveryStatus),
}

/// A request to start a device search
#[derive(Clone, Copy)]
pub struct SearchRequest {
    /// Where progress and the outcome are reported
    pub callback: &'static dyn SearchCallback,
}

impl SearchRequest {
    /// Create a search request reporting to `callback`
    #[must_use]
    pub const fn new(callback: &'static dyn SearchCallback) -> Self {
        Self { callback }
    }

    fn complete(self, status: DiscoveryStatus) {
        self.callback
            .on_search_event(SearchEvent::Complete(status));
    }
}

impl fmt::Debug for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchRequest").finish_non_exhaustive()
    }
}

/// Device search state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SearchState {
    /// No search running
    Idle,
    /// Inquiry or name discovery in progress
    Active,
    /// Waiting for the radio to confirm a cancel
    Cancelling,
}

/// Remote name request in flight
#[derive(Debug)]
struct NameQuery {
    addr: PeerAddress,
    name: String<MAX_DEVICE_NAME_LENGTH>,
}

/// Device search control block
pub struct DeviceSearch {
    state: SearchState,
    inquiry_done: bool,
    name_discovery_done: bool,
    current_peer: Option<NameQuery>,
    name_cursor: usize,
    devices: Vec<DiscoveredDevice, MAX_DISCOVERED_DEVICES>,
    pending_search: Option<SearchRequest>,
    result_callback: Option<&'static dyn SearchCallback>,
    scan_result_callback: Option<&'static dyn SearchCallback>,
    inquiry: InquiryParams,
    resolve_names: bool,
}

impl DeviceSearch {
    /// Create an idle device search
    #[must_use]
    pub const fn new(inquiry: InquiryParams, resolve_names: bool) -> Self {
        Self {
            state: SearchState::Idle,
            inquiry_done: false,
            name_discovery_done: false,
            current_peer: None,
            name_cursor: 0,
            devices: Vec::new(),
            pending_search: None,
            result_callback: None,
            scan_result_callback: None,
            inquiry,
            resolve_names,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SearchState {
        self.state
    }

    /// Whether name discovery for the current (or last) search has finished
    #[must_use]
    pub const fn name_discovery_done(&self) -> bool {
        self.name_discovery_done
    }

    /// Peer whose name is being resolved
    #[must_use]
    pub fn current_peer(&self) -> Option<PeerAddress> {
        self.current_peer.as_ref().map(|query| query.addr)
    }

    /// Whether a search is waiting to be replayed after the cancel completes
    #[must_use]
    pub const fn has_pending_search(&self) -> bool {
        self.pending_search.is_some()
    }

    /// Devices found by the current (or last) search
    #[must_use]
    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// Install an extra observer that sees every device found by any search
    pub fn set_scan_result_callback(&mut self, callback: Option<&'static dyn SearchCallback>) {
        self.scan_result_callback = callback;
    }

    /// Start a search, or defer it behind a cancel of the running one
    pub fn start_search<R: Radio>(&mut self, request: SearchRequest, radio: &mut R) {
        match self.state {
            SearchState::Idle => self.begin(request, radio),
            SearchState::Active => {
                debug!("[SEARCH] Search active, cancelling it to make room");
                self.defer(request);
                self.cancel_search(radio);
            }
            SearchState::Cancelling => {
                debug!("[SEARCH] Cancel in progress, replacing pending search");
                self.defer(request);
            }
        }
    }

    /// Cancel the running search; a no-op when idle
    pub fn cancel_search<R: Radio>(&mut self, radio: &mut R) {
        match self.state {
            SearchState::Idle => debug!("[SEARCH] No search to cancel"),
            SearchState::Active => {
                self.state = SearchState::Cancelling;
                let ack = match &self.current_peer {
                    Some(query) => radio.cancel_name_request(query.addr),
                    None => radio.cancel_scan(),
                };
                match ack {
                    Ok(()) => info!("[SEARCH] Cancelling search"),
                    Err(e) => {
                        debug!("[SEARCH] Nothing outstanding to cancel ({:?})", e);
                        self.finish_cancellation(radio);
                    }
                }
            }
            SearchState::Cancelling => {
                if let Some(dropped) = self.pending_search.take() {
                    debug!("[SEARCH] Dropping pending search");
                    dropped.complete(DiscoveryStatus::Cancelled);
                }
            }
        }
    }

    /// Record a device that answered the inquiry
    ///
    /// # Errors
    /// Returns [`DispatchError::UnexpectedEvent`] when no search is running.
    pub fn on_inquiry_result(&mut self, result: InquiryResult) -> Result<(), DispatchError> {
        match self.state {
            SearchState::Idle => return Err(DispatchError::UnexpectedEvent(EventKind::InquiryResult)),
            SearchState::Cancelling => {
                trace!("[SEARCH] Ignoring inquiry result while cancelling");
                return Ok(());
            }
            SearchState::Active => {}
        }

        let index = match self.devices.iter().position(|d| d.addr == result.addr) {
            Some(index) => {
                self.devices[index].refresh(result.rssi, result.class_of_device);
                index
            }
            None => {
                let mut device = DiscoveredDevice::new(result.addr);
                device.refresh(result.rssi, result.class_of_device);
                if self.devices.push(device).is_err() {
                    warn!("[SEARCH] Device list full, dropping {}", result.addr);
                    return Ok(());
                }
                self.devices.len() - 1
            }
        };

        let device = &self.devices[index];
        trace!("[SEARCH] Found {}", device.addr);
        for callback in [self.result_callback, self.scan_result_callback]
            .into_iter()
            .flatten()
        {
            callback.on_search_event(SearchEvent::DeviceFound(device));
        }
        Ok(())
    }

    /// Handle the end of the inquiry
    ///
    /// # Errors
    /// Returns [`DispatchError::UnexpectedEvent`] when no inquiry is outstanding.
    pub fn on_inquiry_complete<R: Radio>(
        &mut self,
        complete: InquiryComplete,
        radio: &mut R,
    ) -> Result<(), DispatchError> {
        let unexpected = DispatchError::UnexpectedEvent(EventKind::InquiryComplete);
        match self.state {
            SearchState::Idle => Err(unexpected),
            SearchState::Cancelling if self.current_peer.is_none() => {
                self.finish_cancellation(radio);
                Ok(())
            }
            SearchState::Cancelling => Err(unexpected),
            SearchState::Active if self.inquiry_done => Err(unexpected),
            SearchState::Active => {
                self.inquiry_done = true;
                if let Err(e) = complete.status {
                    warn!("[SEARCH] Inquiry failed: {:?}", e);
                    self.complete(DiscoveryStatus::Failed);
                } else {
                    info!(
                        "[SEARCH] Inquiry complete, {} responses, {} devices",
                        complete.num_responses,
                        self.devices.len()
                    );
                    self.discover_next_name(radio);
                }
                Ok(())
            }
        }
    }

    /// Handle the outcome of a remote name request
    ///
    /// # Errors
    /// Returns [`DispatchError::UnexpectedEvent`] when idle and
    /// [`DispatchError::StalePeer`] for a peer whose name was not being resolved.
    pub fn on_remote_name<R: Radio>(
        &mut self,
        result: RemoteNameResult,
        radio: &mut R,
    ) -> Result<(), DispatchError> {
        if self.state == SearchState::Idle {
            return Err(DispatchError::UnexpectedEvent(EventKind::RemoteNameResult));
        }
        let Some(mut query) = self.current_peer.take_if(|query| query.addr == result.addr) else {
            return Err(DispatchError::StalePeer(result.addr));
        };

        if self.state == SearchState::Cancelling {
            self.finish_cancellation(radio);
            return Ok(());
        }

        match result.status {
            Ok(()) => {
                query.name = result.name;
                self.store_name(query);
            }
            Err(e) => debug!("[SEARCH] Name request for {} failed: {:?}", query.addr, e),
        }
        self.name_cursor += 1;
        self.discover_next_name(radio);
        Ok(())
    }

    fn begin<R: Radio>(&mut self, request: SearchRequest, radio: &mut R) {
        self.devices.clear();
        self.name_cursor = 0;
        self.inquiry_done = false;
        self.name_discovery_done = false;
        self.current_peer = None;
        self.result_callback = Some(request.callback);
        self.state = SearchState::Active;

        match radio.start_scan(&self.inquiry) {
            Ok(()) => info!("[SEARCH] Inquiry started"),
            Err(e) => {
                warn!("[SEARCH] Failed to start inquiry: {:?}", e);
                self.complete(DiscoveryStatus::Failed);
            }
        }
    }

    fn defer(&mut self, request: SearchRequest) {
        if let Some(displaced) = self.pending_search.replace(request) {
            displaced.complete(DiscoveryStatus::Busy);
        }
    }

    fn discover_next_name<R: Radio>(&mut self, radio: &mut R) {
        if self.resolve_names {
            while let Some(device) = self.devices.get(self.name_cursor) {
                let addr = device.addr;
                if device.name.is_none() {
                    match radio.resolve_name(addr) {
                        Ok(()) => {
                            debug!("[SEARCH] Resolving name of {}", addr);
                            self.current_peer = Some(NameQuery {
                                addr,
                                name: String::new(),
                            });
                            return;
                        }
                        Err(e) => warn!("[SEARCH] Cannot resolve name of {}: {:?}", addr, e),
                    }
                }
                self.name_cursor += 1;
            }
        }

        self.name_discovery_done = true;
        self.complete(DiscoveryStatus::Completed);
    }

    fn store_name(&mut self, query: NameQuery) {
        let Some(device) = self.devices.iter_mut().find(|d| d.addr == query.addr) else {
            return;
        };
        device.name = Some(query.name);

        let device = &*device;
        for callback in [self.result_callback, self.scan_result_callback]
            .into_iter()
            .flatten()
        {
            callback.on_search_event(SearchEvent::NameResolved(device));
        }
    }

    fn finish_cancellation<R: Radio>(&mut self, radio: &mut R) {
        info!("[SEARCH] Search cancelled");
        self.complete(DiscoveryStatus::Cancelled);

        if let Some(next) = self.pending_search.take() {
            info!("[SEARCH] Replaying pending search");
            self.begin(next, radio);
        }
    }

    fn complete(&mut self, status: DiscoveryStatus) {
        self.state = SearchState::Idle;
        self.current_peer = None;
        if let Some(callback) = self.result_callback.take() {
            callback.on_search_event(SearchEvent::Complete(status));
        }
    }
}

impl fmt::Debug for DeviceSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSearch")
            .field("state", &self.state)
            .field("name_discovery_done", &self.name_discovery_done)
            .field("current_peer", &self.current_peer)
            .field("devices", &self.devices.len())
            .field("pending_search", &self.pending_search.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        RadioError,
        testing::{MockRadio, RadioCall, SearchRecorder, SearchRecord, peer},
    };
    use std::vec;

    fn search() -> DeviceSearch {
        DeviceSearch::new(crate::DiscoveryOptions::default().inquiry, true)
    }

    fn found(id: u8) -> InquiryResult {
        InquiryResult {
            addr: peer(id),
            rssi: Some(-60),
            class_of_device: None,
        }
    }

    fn inquiry_done() -> InquiryComplete {
        InquiryComplete {
            num_responses: 1,
            status: Ok(()),
        }
    }

    fn name(id: u8, text: &str) -> RemoteNameResult {
        RemoteNameResult {
            addr: peer(id),
            name: String::try_from(text).unwrap(),
            status: Ok(()),
        }
    }

    #[test]
    fn test_search_resolves_names_one_at_a_time() {
        let mut radio = MockRadio::default();
        let mut search = search();
        let cb = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb), &mut radio);
        assert_eq!(search.state(), SearchState::Active);
        search.on_inquiry_result(found(1)).unwrap();
        search.on_inquiry_result(found(2)).unwrap();
        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();

        assert_eq!(search.current_peer(), Some(peer(1)));
        assert!(!search.name_discovery_done());
        search.on_remote_name(name(1, "Speaker"), &mut radio).unwrap();
        assert_eq!(search.current_peer(), Some(peer(2)));
        search.on_remote_name(name(2, "Watch"), &mut radio).unwrap();

        assert_eq!(search.state(), SearchState::Idle);
        assert!(search.name_discovery_done());
        assert_eq!(search.devices()[0].name.as_deref(), Some("Speaker"));
        assert_eq!(
            cb.records(),
            vec![
                SearchRecord::DeviceFound(peer(1)),
                SearchRecord::DeviceFound(peer(2)),
                SearchRecord::NameResolved(peer(1)),
                SearchRecord::NameResolved(peer(2)),
                SearchRecord::Complete(DiscoveryStatus::Completed),
            ]
        );
        assert_eq!(
            radio.calls,
            vec![
                RadioCall::StartScan(search.inquiry),
                RadioCall::ResolveName(peer(1)),
                RadioCall::ResolveName(peer(2)),
            ]
        );
    }

    #[test]
    fn test_failed_name_request_moves_on() {
        let mut radio = MockRadio {
            refuse_names: vec![peer(1)],
            ..MockRadio::default()
        };
        let mut search = search();
        let cb = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb), &mut radio);
        search.on_inquiry_result(found(1)).unwrap();
        search.on_inquiry_result(found(2)).unwrap();
        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();
        assert_eq!(search.current_peer(), Some(peer(2)));

        let mut failed = name(2, "");
        failed.status = Err(RadioError::Hci(0x04));
        search.on_remote_name(failed, &mut radio).unwrap();

        assert_eq!(search.state(), SearchState::Idle);
        assert_eq!(cb.completions(), vec![DiscoveryStatus::Completed]);
        assert!(search.devices().iter().all(|d| d.name.is_none()));
    }

    #[test]
    fn test_search_without_name_resolution() {
        let mut radio = MockRadio::default();
        let mut search = DeviceSearch::new(crate::DiscoveryOptions::default().inquiry, false);
        let cb = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb), &mut radio);
        search.on_inquiry_result(found(1)).unwrap();
        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();

        assert_eq!(search.state(), SearchState::Idle);
        assert_eq!(cb.completions(), vec![DiscoveryStatus::Completed]);
        assert_eq!(radio.calls.len(), 1);
    }

    #[test]
    fn test_inquiry_failure_reports_failed() {
        let mut radio = MockRadio::default();
        let mut search = search();
        let cb = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb), &mut radio);
        search
            .on_inquiry_complete(
                InquiryComplete {
                    num_responses: 0,
                    status: Err(RadioError::Hci(0x0C)),
                },
                &mut radio,
            )
            .unwrap();

        assert_eq!(search.state(), SearchState::Idle);
        assert_eq!(cb.completions(), vec![DiscoveryStatus::Failed]);
    }

    #[test]
    fn test_refused_scan_reports_failed() {
        let mut radio = MockRadio {
            refuse_scan: true,
            ..MockRadio::default()
        };
        let mut search = search();
        let cb = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb), &mut radio);

        assert_eq!(search.state(), SearchState::Idle);
        assert_eq!(cb.completions(), vec![DiscoveryStatus::Failed]);
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let mut radio = MockRadio::default();
        let mut search = search();

        search.cancel_search(&mut radio);
        search.cancel_search(&mut radio);

        assert_eq!(search.state(), SearchState::Idle);
        assert!(radio.calls.is_empty());
    }

    #[test]
    fn test_cancel_waits_for_confirmation() {
        let mut radio = MockRadio::default();
        let mut search = search();
        let cb = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb), &mut radio);
        search.cancel_search(&mut radio);
        assert_eq!(search.state(), SearchState::Cancelling);
        assert!(cb.completions().is_empty());

        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();
        assert_eq!(search.state(), SearchState::Idle);
        assert_eq!(cb.completions(), vec![DiscoveryStatus::Cancelled]);
        assert_eq!(radio.calls.last(), Some(&RadioCall::CancelScan));
    }

    #[test]
    fn test_cancel_during_name_discovery() {
        let mut radio = MockRadio::default();
        let mut search = search();
        let cb = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb), &mut radio);
        search.on_inquiry_result(found(7)).unwrap();
        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();
        search.cancel_search(&mut radio);

        assert_eq!(radio.calls.last(), Some(&RadioCall::CancelNameRequest(peer(7))));
        let mut cancelled = name(7, "");
        cancelled.status = Err(RadioError::Hci(0x02));
        search.on_remote_name(cancelled, &mut radio).unwrap();

        assert_eq!(search.state(), SearchState::Idle);
        assert_eq!(cb.completions(), vec![DiscoveryStatus::Cancelled]);
    }

    #[test]
    fn test_second_search_replaces_first() {
        let mut radio = MockRadio::default();
        let mut search = search();
        let cb1 = SearchRecorder::leak();
        let cb2 = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb1), &mut radio);
        search.start_search(SearchRequest::new(cb2), &mut radio);

        assert_eq!(search.state(), SearchState::Cancelling);
        assert!(search.has_pending_search());
        assert_eq!(radio.calls.last(), Some(&RadioCall::CancelScan));

        // cancel confirmed: cb1 is told, cb2's search starts on its own
        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();
        assert_eq!(cb1.completions(), vec![DiscoveryStatus::Cancelled]);
        assert_eq!(search.state(), SearchState::Active);
        assert!(!search.has_pending_search());
        assert_eq!(
            radio
                .calls
                .iter()
                .filter(|call| matches!(call, RadioCall::StartScan(_)))
                .count(),
            2
        );

        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();
        assert_eq!(cb1.completions(), vec![DiscoveryStatus::Cancelled]);
        assert_eq!(cb2.completions(), vec![DiscoveryStatus::Completed]);
    }

    #[test]
    fn test_only_latest_pending_search_is_kept() {
        let mut radio = MockRadio::default();
        let mut search = search();
        let cb1 = SearchRecorder::leak();
        let cb2 = SearchRecorder::leak();
        let cb3 = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb1), &mut radio);
        search.start_search(SearchRequest::new(cb2), &mut radio);
        search.start_search(SearchRequest::new(cb3), &mut radio);
        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();
        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();

        assert_eq!(cb1.completions(), vec![DiscoveryStatus::Cancelled]);
        assert_eq!(cb2.completions(), vec![DiscoveryStatus::Busy]);
        assert_eq!(cb3.completions(), vec![DiscoveryStatus::Completed]);
    }

    #[test]
    fn test_cancel_while_cancelling_drops_pending() {
        let mut radio = MockRadio::default();
        let mut search = search();
        let cb1 = SearchRecorder::leak();
        let cb2 = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb1), &mut radio);
        search.start_search(SearchRequest::new(cb2), &mut radio);
        search.cancel_search(&mut radio);
        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();

        assert_eq!(search.state(), SearchState::Idle);
        assert!(!search.has_pending_search());
        assert_eq!(cb1.completions(), vec![DiscoveryStatus::Cancelled]);
        assert_eq!(cb2.completions(), vec![DiscoveryStatus::Cancelled]);
    }

    #[test]
    fn test_refused_cancel_completes_immediately() {
        let mut radio = MockRadio {
            refuse_cancel: true,
            ..MockRadio::default()
        };
        let mut search = search();
        let cb1 = SearchRecorder::leak();
        let cb2 = SearchRecorder::leak();

        search.start_search(SearchRequest::new(cb1), &mut radio);
        search.start_search(SearchRequest::new(cb2), &mut radio);

        assert_eq!(cb1.completions(), vec![DiscoveryStatus::Cancelled]);
        assert_eq!(search.state(), SearchState::Active);
        assert!(cb2.completions().is_empty());
    }

    #[test]
    fn test_scan_result_callback_sees_devices() {
        let mut radio = MockRadio::default();
        let mut search = search();
        let cb = SearchRecorder::leak();
        let observer = SearchRecorder::leak();

        search.set_scan_result_callback(Some(observer));
        search.start_search(SearchRequest::new(cb), &mut radio);
        search.on_inquiry_result(found(3)).unwrap();
        search.on_inquiry_result(found(3)).unwrap();

        assert_eq!(search.devices().len(), 1);
        assert_eq!(
            observer.records(),
            vec![
                SearchRecord::DeviceFound(peer(3)),
                SearchRecord::DeviceFound(peer(3)),
            ]
        );
    }

    #[test]
    fn test_unexpected_events_are_rejected() {
        let mut radio = MockRadio::default();
        let mut search = search();

        assert_eq!(
            search.on_inquiry_result(found(1)),
            Err(DispatchError::UnexpectedEvent(EventKind::InquiryResult))
        );
        assert_eq!(
            search.on_inquiry_complete(inquiry_done(), &mut radio),
            Err(DispatchError::UnexpectedEvent(EventKind::InquiryComplete))
        );

        let cb = SearchRecorder::leak();
        search.start_search(SearchRequest::new(cb), &mut radio);
        search.on_inquiry_result(found(1)).unwrap();
        search.on_inquiry_complete(inquiry_done(), &mut radio).unwrap();
        assert_eq!(
            search.on_remote_name(name(9, "Stranger"), &mut radio),
            Err(DispatchError::StalePeer(peer(9)))
        );
        assert_eq!(search.current_peer(), Some(peer(1)));
    }
}
