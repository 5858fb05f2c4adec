//! Event dispatcher
//!
//! [`DiscoveryManager`] owns both state machines together with the radio and
//! timer collaborators and routes every [`DiscoveryEvent`] to the machine that
//! handles it. Events that do not fit the current state are rejected with a
//! [`DispatchError`] and logged; none of them is fatal.

use crate::{
    DiscoveryEvent, DiscoveryOptions, PeerAddress,
    discovery::{DiscoveryRequest, ServiceDiscovery},
    event::EventKind,
    radio::Radio,
    search::{DeviceSearch, SearchCallback, SearchRequest},
    timer::{TimerId, Timers},
};

/// Events rejected by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchError {
    /// Raw event code that maps to no event
    UnknownEvent(u16),
    /// The event is not valid in the current state
    UnexpectedEvent(EventKind),
    /// Result for a peer that is not the one being worked on
    StalePeer(PeerAddress),
    /// Result from a session to the peer that has since been closed
    StaleSession(PeerAddress),
    /// Expiry of a timer arming that has since been cancelled or replaced
    StaleTimer(TimerId),
}

/// Discovery core: both state machines and their collaborators
#[derive(Debug)]
pub struct DiscoveryManager<R: Radio, T: Timers> {
    radio: R,
    timers: T,
    search: DeviceSearch,
    discovery: ServiceDiscovery,
}

impl<R: Radio, T: Timers> DiscoveryManager<R, T> {
    /// Create a manager with both state machines idle
    pub const fn new(radio: R, timers: T, options: DiscoveryOptions) -> Self {
        Self {
            radio,
            timers,
            search: DeviceSearch::new(options.inquiry, options.resolve_names),
            discovery: ServiceDiscovery::new(
                options.discovery_timeout,
                options.close_delay,
                options.max_pending_discoveries,
            ),
        }
    }

    /// Handle one event
    ///
    /// # Errors
    /// Returns a [`DispatchError`] when the event does not fit the current state;
    /// the state is left untouched in that case.
    pub fn dispatch(&mut self, event: DiscoveryEvent) -> Result<(), DispatchError> {
        let kind = event.kind();
        trace!("[DISPATCH] {}", kind.as_str());

        let outcome = match event {
            DiscoveryEvent::StartSearch(request) => {
                self.search.start_search(request, &mut self.radio);
                Ok(())
            }
            DiscoveryEvent::CancelSearch => {
                self.search.cancel_search(&mut self.radio);
                Ok(())
            }
            DiscoveryEvent::InquiryResult(result) => self.search.on_inquiry_result(result),
            DiscoveryEvent::InquiryComplete(complete) => {
                self.search.on_inquiry_complete(complete, &mut self.radio)
            }
            DiscoveryEvent::RemoteNameResult(result) => {
                self.search.on_remote_name(result, &mut self.radio)
            }
            DiscoveryEvent::StartDiscovery(request) => {
                self.discovery
                    .request_discovery(request, &mut self.radio, &mut self.timers);
                Ok(())
            }
            DiscoveryEvent::DirectoryLookupResult(result) => self
                .discovery
                .on_directory_lookup_result(result, &mut self.radio, &mut self.timers),
            DiscoveryEvent::AttributeDiscoveryResult(result) => self
                .discovery
                .on_attribute_discovery_result(result, &mut self.radio, &mut self.timers),
            DiscoveryEvent::ServiceResult(result) => {
                self.discovery
                    .on_service_result(result, &mut self.radio, &mut self.timers)
            }
            DiscoveryEvent::DiscoveryTimeout(token) => {
                self.discovery
                    .on_discovery_timeout(token, &mut self.radio, &mut self.timers)
            }
            DiscoveryEvent::CloseTimeout(token) => {
                self.discovery.on_close_timeout(token, &mut self.radio)
            }
        };

        if let Err(e) = outcome {
            warn!("[DISPATCH] Dropped {}: {:?}", kind.as_str(), e);
        }
        outcome
    }

    /// Decode a raw event code coming from a platform bridge
    ///
    /// # Errors
    /// Returns [`DispatchError::UnknownEvent`] for codes that name no event.
    pub fn decode(code: u16) -> Result<EventKind, DispatchError> {
        EventKind::try_from(code).map_err(|code| {
            warn!("[DISPATCH] Unknown event code {:#x}", code);
            DispatchError::UnknownEvent(code)
        })
    }

    /// Start a device search
    pub fn start_search(&mut self, callback: &'static dyn SearchCallback) {
        // Dispatch of start requests is infallible
        let _ = self.dispatch(DiscoveryEvent::StartSearch(SearchRequest::new(callback)));
    }

    /// Cancel the running device search
    pub fn cancel_search(&mut self) {
        let _ = self.dispatch(DiscoveryEvent::CancelSearch);
    }

    /// Start, or queue, service discovery on a peer
    pub fn request_service_discovery(&mut self, request: DiscoveryRequest) {
        let _ = self.dispatch(DiscoveryEvent::StartDiscovery(request));
    }

    /// Install an observer that sees every device found by any search
    pub fn set_scan_result_callback(&mut self, callback: Option<&'static dyn SearchCallback>) {
        self.search.set_scan_result_callback(callback);
    }

    /// Device search state machine
    pub const fn search(&self) -> &DeviceSearch {
        &self.search
    }

    /// Service discovery state machine
    pub const fn discovery(&self) -> &ServiceDiscovery {
        &self.discovery
    }

    /// Radio collaborator
    pub const fn radio(&self) -> &R {
        &self.radio
    }

    /// Radio collaborator, mutably
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Timer collaborator
    pub const fn timers(&self) -> &T {
        &self.timers
    }

    /// Timer collaborator, mutably
    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DiscoveryStatus,
        discovery::{DiscoveryState, Transport},
        event::{DirectoryLookupResult, InquiryComplete, InquiryResult},
        radio::LookupHandle,
        search::SearchState,
        service::{ServiceId, ServiceMask},
        testing::{DiscoveryRecorder, MockRadio, MockTimers, RadioCall, SearchRecorder, peer},
        timer::TimerToken,
    };
    use std::vec;

    type Manager = DiscoveryManager<MockRadio, MockTimers>;

    fn manager() -> Manager {
        DiscoveryManager::new(
            MockRadio::default(),
            MockTimers::default(),
            DiscoveryOptions::default(),
        )
    }

    #[test]
    fn test_search_and_discovery_run_side_by_side() {
        let mut manager = manager();
        let search_cb = SearchRecorder::leak();
        let discovery_cb = DiscoveryRecorder::leak();

        manager.start_search(search_cb);
        manager.request_service_discovery(DiscoveryRequest::new(
            peer(1),
            ServiceMask::of(ServiceId::Hfp),
            Transport::Classic,
            discovery_cb,
        ));
        assert_eq!(manager.search().state(), SearchState::Active);
        assert_eq!(
            manager.discovery().active_peer(),
            Some(peer(1))
        );

        manager
            .dispatch(DiscoveryEvent::InquiryResult(InquiryResult {
                addr: peer(2),
                rssi: None,
                class_of_device: Some(0x0024_0404),
            }))
            .unwrap();
        manager
            .dispatch(DiscoveryEvent::DirectoryLookupResult(DirectoryLookupResult {
                peer: peer(1),
                handle: LookupHandle(1),
                uuids: [ServiceId::Hfp.uuid()].into_iter().collect(),
                channel: Some(2),
                status: Ok(()),
            }))
            .unwrap();

        assert_eq!(discovery_cb.single().status, DiscoveryStatus::Completed);
        assert_eq!(manager.discovery().state(), DiscoveryState::Idle);
        assert_eq!(manager.search().devices().len(), 1);
    }

    #[test]
    fn test_cancel_search_in_idle_is_noop() {
        let mut manager = manager();
        manager.cancel_search();

        assert_eq!(manager.search().state(), SearchState::Idle);
        assert!(manager.radio().calls.is_empty());
    }

    #[test]
    fn test_replaced_search_gets_cancelled() {
        let mut manager = manager();
        let cb1 = SearchRecorder::leak();
        let cb2 = SearchRecorder::leak();

        manager.start_search(cb1);
        manager.start_search(cb2);
        let done = InquiryComplete {
            num_responses: 0,
            status: Ok(()),
        };
        manager.dispatch(DiscoveryEvent::InquiryComplete(done)).unwrap();
        manager.dispatch(DiscoveryEvent::InquiryComplete(done)).unwrap();

        assert_eq!(cb1.completions(), vec![DiscoveryStatus::Cancelled]);
        assert_eq!(cb2.completions(), vec![DiscoveryStatus::Completed]);
    }

    #[test]
    fn test_out_of_state_events_are_rejected() {
        let mut manager = manager();

        assert_eq!(
            manager.dispatch(DiscoveryEvent::InquiryComplete(InquiryComplete {
                num_responses: 0,
                status: Ok(()),
            })),
            Err(DispatchError::UnexpectedEvent(EventKind::InquiryComplete))
        );
        assert_eq!(
            manager.dispatch(DiscoveryEvent::DiscoveryTimeout(TimerToken::new(7))),
            Err(DispatchError::StaleTimer(TimerId::Discovery))
        );
        assert_eq!(
            manager.dispatch(DiscoveryEvent::CloseTimeout(TimerToken::new(7))),
            Err(DispatchError::StaleTimer(TimerId::Close))
        );
        assert_eq!(manager.search().state(), SearchState::Idle);
        assert_eq!(manager.discovery().state(), DiscoveryState::Idle);
    }

    #[test]
    fn test_decode_raw_codes() {
        assert_eq!(Manager::decode(0x0001), Ok(EventKind::CancelSearch));
        assert_eq!(Manager::decode(0x0104), Ok(EventKind::DiscoveryTimeout));
        assert_eq!(Manager::decode(0x0200), Err(DispatchError::UnknownEvent(0x0200)));
    }

    #[test]
    fn test_scan_result_callback_installed_through_manager() {
        let mut manager = manager();
        let observer = SearchRecorder::leak();
        manager.set_scan_result_callback(Some(observer));

        manager.start_search(SearchRecorder::leak());
        manager
            .dispatch(DiscoveryEvent::InquiryResult(InquiryResult {
                addr: peer(4),
                rssi: Some(-70),
                class_of_device: None,
            }))
            .unwrap();

        assert_eq!(observer.records().len(), 1);
        assert_eq!(
            manager.radio_mut().calls.first(),
            Some(&RadioCall::StartScan(DiscoveryOptions::default().inquiry))
        );
        assert!(manager.timers_mut().calls.is_empty());
        assert!(manager.timers().calls.is_empty());
    }
}
