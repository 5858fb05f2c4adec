//! Service discovery state machine
//!
//! Discovers which services a known peer exposes. Classic peers are searched
//! with directory lookup queries, one service class at a time; low energy peers
//! are asked for all primary services over an attribute session.
//!
//! Only one peer is under discovery at a time. Requests arriving meanwhile wait
//! in a [`RequestQueue`] and are served in arrival order. Every request gets
//! exactly one [`ServiceDiscoveryResult`], whatever ends it.
//!
//! When a session ends its transport connection is not closed right away but
//! parked under the close timer, so a follow-up request for the same peer can
//! reuse it without opening a new one.

use crate::{
    DiscoveryStatus, PeerAddress,
    constants::MAX_DISCOVERED_UUIDS,
    dispatcher::DispatchError,
    event::{
        AttributeDiscoveryResult, AttributeOutcome, DirectoryLookupResult, EventKind,
        ServiceResult,
    },
    queue::RequestQueue,
    radio::{AttributeSession, LookupHandle, Radio},
    service::{ServiceId, ServiceMask, Uuid},
    timer::{ScopedTimer, TimerId, TimerToken, Timers},
};
use core::{fmt, time::Duration};
use heapless::Vec;

/// Transport a peer is discovered over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transport {
    /// BR/EDR, searched with directory lookup queries
    Classic,
    /// Low energy, searched with attribute discovery
    LowEnergy,
}

/// Receives the outcome of a service discovery request
pub trait ServiceDiscoveryCallback: Sync {
    /// Called exactly once per request
    fn on_service_discovery(&self, result: &ServiceDiscoveryResult);
}

/// A request to discover the services of one peer
#[derive(Clone, Copy)]
pub struct DiscoveryRequest {
    /// Peer to discover
    pub peer: PeerAddress,
    /// Services the caller is interested in (classic transport only)
    pub services: ServiceMask,
    /// Transport to discover over
    pub transport: Transport,
    /// Where the result is reported
    pub callback: &'static dyn ServiceDiscoveryCallback,
}

impl DiscoveryRequest {
    /// Create a service discovery request
    #[must_use]
    pub const fn new(
        peer: PeerAddress,
        services: ServiceMask,
        transport: Transport,
        callback: &'static dyn ServiceDiscoveryCallback,
    ) -> Self {
        Self {
            peer,
            services,
            transport,
            callback,
        }
    }
}

impl fmt::Debug for DiscoveryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryRequest")
            .field("peer", &self.peer)
            .field("services", &self.services)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// Outcome of one service discovery request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDiscoveryResult {
    /// Peer that was discovered
    pub peer: PeerAddress,
    /// Transport it was discovered over
    pub transport: Transport,
    /// Known services found
    pub services: ServiceMask,
    /// Every distinct service UUID reported, in discovery order
    pub uuids: Vec<Uuid, MAX_DISCOVERED_UUIDS>,
    /// RFCOMM server channel of the first matching record, if any
    pub channel: Option<u8>,
    /// Why the session ended; results are partial unless `Completed`
    pub status: DiscoveryStatus,
}

impl ServiceDiscoveryResult {
    /// Empty result for `request`
    #[must_use]
    pub fn empty(request: &DiscoveryRequest, status: DiscoveryStatus) -> Self {
        Self {
            peer: request.peer,
            transport: request.transport,
            services: ServiceMask::EMPTY,
            uuids: Vec::new(),
            channel: None,
            status,
        }
    }
}

/// What the active session is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryPhase {
    /// Classic directory lookup queries
    DirectoryLookup,
    /// Low energy primary service discovery
    AttributeDiscovery,
}

impl From<Transport> for DiscoveryPhase {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Classic => Self::DirectoryLookup,
            Transport::LowEnergy => Self::AttributeDiscovery,
        }
    }
}

/// Service discovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryState {
    /// No session
    Idle,
    /// A session is running in the given phase
    Active(DiscoveryPhase),
}

/// An open transport connection used for discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportSession {
    /// Directory lookup session
    DirectoryLookup(LookupHandle),
    /// Attribute client session
    Attribute(AttributeSession),
}

impl TransportSession {
    /// Transport this session runs over
    #[must_use]
    pub const fn transport(self) -> Transport {
        match self {
            Self::DirectoryLookup(_) => Transport::Classic,
            Self::Attribute(_) => Transport::LowEnergy,
        }
    }

    fn close<R: Radio>(self, radio: &mut R) {
        match self {
            Self::DirectoryLookup(handle) => radio.close_directory_lookup(handle),
            Self::Attribute(session) => radio.close_attribute_session(session),
        }
    }
}

/// Session kept open after its request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParkedSession {
    /// Peer the session is connected to
    pub peer: PeerAddress,
    /// The session itself
    pub session: TransportSession,
}

enum Step {
    Continue,
    Finished(DiscoveryStatus),
}

/// Request under discovery and everything found so far
struct ActiveDiscovery {
    request: DiscoveryRequest,
    found: ServiceMask,
    uuids: Vec<Uuid, MAX_DISCOVERED_UUIDS>,
    channel: Option<u8>,
    cursor: usize,
    session: Option<TransportSession>,
}

impl ActiveDiscovery {
    const fn new(request: DiscoveryRequest) -> Self {
        Self {
            request,
            found: ServiceMask::EMPTY,
            uuids: Vec::new(),
            channel: None,
            cursor: 0,
            session: None,
        }
    }

    fn merge(&mut self, uuids: &[Uuid]) {
        for &uuid in uuids {
            self.found |= ServiceMask::from_uuid(uuid);
            if !self.uuids.contains(&uuid) && self.uuids.push(uuid).is_err() {
                warn!("[DISCOVERY] UUID list full, dropping {:?}", uuid);
            }
        }
    }

    /// Send the query for the next wanted service that is still missing
    fn query_next<R: Radio>(&mut self, radio: &mut R) -> Step {
        let Some(TransportSession::DirectoryLookup(handle)) = self.session else {
            return Step::Finished(DiscoveryStatus::Failed);
        };
        let missing = self.request.services.difference(self.found);
        let Some(service) = missing
            .next_index(self.cursor)
            .and_then(ServiceId::from_index)
        else {
            return Step::Finished(DiscoveryStatus::Completed);
        };
        self.cursor = service as usize + 1;

        match radio.query(handle, service.uuid()) {
            Ok(()) => {
                debug!("[DISCOVERY] Querying {:?} on {}", service, self.request.peer);
                Step::Continue
            }
            Err(e) => {
                warn!("[DISCOVERY] Query for {:?} refused: {:?}", service, e);
                Step::Finished(DiscoveryStatus::Failed)
            }
        }
    }

    fn into_result(self, status: DiscoveryStatus) -> ServiceDiscoveryResult {
        ServiceDiscoveryResult {
            peer: self.request.peer,
            transport: self.request.transport,
            services: self.found,
            uuids: self.uuids,
            channel: self.channel,
            status,
        }
    }
}

/// Service discovery control block
pub struct ServiceDiscovery {
    active: Option<ActiveDiscovery>,
    pending_queue: RequestQueue,
    discovery_timer: ScopedTimer,
    close_timer: ScopedTimer,
    deferred_close: Option<ParkedSession>,
    discovery_timeout: Duration,
    close_delay: Duration,
}

impl ServiceDiscovery {
    /// Create an idle service discovery letting up to `max_pending` requests wait
    #[must_use]
    pub const fn new(
        discovery_timeout: Duration,
        close_delay: Duration,
        max_pending: usize,
    ) -> Self {
        Self {
            active: None,
            pending_queue: RequestQueue::new(max_pending),
            discovery_timer: ScopedTimer::new(TimerId::Discovery),
            close_timer: ScopedTimer::new(TimerId::Close),
            deferred_close: None,
            discovery_timeout,
            close_delay,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DiscoveryState {
        match &self.active {
            Some(active) => DiscoveryState::Active(active.request.transport.into()),
            None => DiscoveryState::Idle,
        }
    }

    /// Peer under discovery
    #[must_use]
    pub fn active_peer(&self) -> Option<PeerAddress> {
        self.active.as_ref().map(|active| active.request.peer)
    }

    /// Services found so far in the active session
    #[must_use]
    pub fn services_found(&self) -> ServiceMask {
        self.active
            .as_ref()
            .map_or(ServiceMask::EMPTY, |active| active.found)
    }

    /// Requests waiting for the active session to end
    #[must_use]
    pub const fn pending(&self) -> &RequestQueue {
        &self.pending_queue
    }

    /// Session the active request runs on
    #[must_use]
    pub fn active_session(&self) -> Option<TransportSession> {
        self.active.as_ref().and_then(|active| active.session)
    }

    /// Session awaiting its delayed close
    #[must_use]
    pub const fn deferred_close(&self) -> Option<ParkedSession> {
        self.deferred_close
    }

    /// Start discovery on a peer, or queue it behind the active session
    ///
    /// The callback is always called exactly once. A request that finds the
    /// queue at its limit (`DiscoveryOptions::max_pending_discoveries`) is not
    /// queued; it is answered at once with [`DiscoveryStatus::Busy`] and an
    /// empty result.
    pub fn request_discovery<R: Radio, T: Timers>(
        &mut self,
        request: DiscoveryRequest,
        radio: &mut R,
        timers: &mut T,
    ) {
        if self.active.is_none() {
            self.start(request, radio, timers);
            self.advance_queue(radio, timers);
            return;
        }

        if self.pending_queue.contains_peer(request.peer) {
            debug!("[DISCOVERY] {} already queued, keeping duplicate", request.peer);
        }
        match self.pending_queue.push(request) {
            Ok(()) => info!(
                "[DISCOVERY] Queued {} ({} waiting)",
                request.peer,
                self.pending_queue.len()
            ),
            Err(rejected) => {
                warn!("[DISCOVERY] Queue full, rejecting {}", rejected.peer);
                let result = ServiceDiscoveryResult::empty(&rejected, DiscoveryStatus::Busy);
                rejected.callback.on_service_discovery(&result);
            }
        }
    }

    /// Handle the answer to a directory lookup query
    ///
    /// # Errors
    /// Rejects results when no classic session is running, the peer is not the
    /// one under discovery, or the result comes from an earlier session.
    pub fn on_directory_lookup_result<R: Radio, T: Timers>(
        &mut self,
        result: DirectoryLookupResult,
        radio: &mut R,
        timers: &mut T,
    ) -> Result<(), DispatchError> {
        let active = self.expect_active(
            result.peer,
            TransportSession::DirectoryLookup(result.handle),
            EventKind::DirectoryLookupResult,
        )?;

        active.merge(&result.uuids);
        if active.channel.is_none() {
            active.channel = result.channel;
        }

        let step = match result.status {
            Ok(()) => active.query_next(radio),
            Err(e) => {
                warn!("[DISCOVERY] Directory lookup on {} failed: {:?}", result.peer, e);
                Step::Finished(DiscoveryStatus::Failed)
            }
        };
        self.apply(step, radio, timers);
        Ok(())
    }

    /// Handle attribute discovery progress
    ///
    /// # Errors
    /// Rejects results when no low energy session is running, the peer is not
    /// the one under discovery, or the result comes from an earlier session.
    pub fn on_attribute_discovery_result<R: Radio, T: Timers>(
        &mut self,
        result: AttributeDiscoveryResult,
        radio: &mut R,
        timers: &mut T,
    ) -> Result<(), DispatchError> {
        let active = self.expect_active(
            result.peer,
            TransportSession::Attribute(result.session),
            EventKind::AttributeDiscoveryResult,
        )?;

        let step = match result.outcome {
            AttributeOutcome::Services(uuids) => {
                active.merge(&uuids);
                Step::Continue
            }
            AttributeOutcome::Complete => Step::Finished(DiscoveryStatus::Completed),
            AttributeOutcome::Failed(e) => {
                warn!("[DISCOVERY] Attribute discovery on {} failed: {:?}", result.peer, e);
                Step::Finished(DiscoveryStatus::Failed)
            }
        };
        self.apply(step, radio, timers);
        Ok(())
    }

    /// Handle a final result produced by the collaborator for the active peer
    ///
    /// # Errors
    /// Rejects results when idle or for a peer that is not under discovery.
    pub fn on_service_result<R: Radio, T: Timers>(
        &mut self,
        result: ServiceResult,
        radio: &mut R,
        timers: &mut T,
    ) -> Result<(), DispatchError> {
        let Some(active) = self.active.as_mut() else {
            return Err(DispatchError::UnexpectedEvent(EventKind::ServiceResult));
        };
        if active.request.peer != result.peer || active.request.transport != result.transport {
            return Err(DispatchError::StalePeer(result.peer));
        }

        active.found |= result.services;
        active.merge(&result.uuids);
        self.apply(Step::Finished(result.status), radio, timers);
        Ok(())
    }

    /// Force the active session to end with whatever it found
    ///
    /// # Errors
    /// Returns [`DispatchError::StaleTimer`] if `token` is not the armed one.
    pub fn on_discovery_timeout<R: Radio, T: Timers>(
        &mut self,
        token: TimerToken,
        radio: &mut R,
        timers: &mut T,
    ) -> Result<(), DispatchError> {
        if !self.discovery_timer.expire(token) {
            return Err(DispatchError::StaleTimer(TimerId::Discovery));
        }
        warn!("[DISCOVERY] Discovery timed out");
        self.apply(Step::Finished(DiscoveryStatus::TimedOut), radio, timers);
        Ok(())
    }

    /// Close the parked session
    ///
    /// # Errors
    /// Returns [`DispatchError::StaleTimer`] if `token` is not the armed one.
    pub fn on_close_timeout<R: Radio>(
        &mut self,
        token: TimerToken,
        radio: &mut R,
    ) -> Result<(), DispatchError> {
        if !self.close_timer.expire(token) {
            return Err(DispatchError::StaleTimer(TimerId::Close));
        }
        if let Some(parked) = self.deferred_close.take() {
            debug!("[DISCOVERY] Closing idle session to {}", parked.peer);
            parked.session.close(radio);
        }
        Ok(())
    }

    /// The active request, if `session` to `peer` is the one it runs on
    fn expect_active(
        &mut self,
        peer: PeerAddress,
        session: TransportSession,
        kind: EventKind,
    ) -> Result<&mut ActiveDiscovery, DispatchError> {
        let Some(active) = self.active.as_mut() else {
            return Err(DispatchError::UnexpectedEvent(kind));
        };
        if active.request.transport != session.transport() {
            return Err(DispatchError::UnexpectedEvent(kind));
        }
        if active.request.peer != peer {
            return Err(DispatchError::StalePeer(peer));
        }
        // A closed session to the same peer may still deliver a late answer
        if active.session != Some(session) {
            return Err(DispatchError::StaleSession(peer));
        }
        Ok(active)
    }

    fn start<R: Radio, T: Timers>(
        &mut self,
        request: DiscoveryRequest,
        radio: &mut R,
        timers: &mut T,
    ) {
        info!(
            "[DISCOVERY] Starting {:?} discovery on {}",
            request.transport, request.peer
        );
        let mut active = ActiveDiscovery::new(request);
        active.session = self.reclaim_session(request.peer, request.transport, timers);

        if request.transport == Transport::Classic && request.services.is_empty() {
            self.finish(active, DiscoveryStatus::Completed, radio, timers);
            return;
        }

        if active.session.is_none() {
            let opened = match request.transport {
                Transport::Classic => radio
                    .open_directory_lookup(request.peer)
                    .map(TransportSession::DirectoryLookup),
                Transport::LowEnergy => radio
                    .open_attribute_session(request.peer)
                    .map(TransportSession::Attribute),
            };
            match opened {
                Ok(session) => active.session = Some(session),
                Err(e) => {
                    warn!("[DISCOVERY] Cannot open session to {}: {:?}", request.peer, e);
                    self.finish(active, DiscoveryStatus::Failed, radio, timers);
                    return;
                }
            }
        }

        self.discovery_timer.arm(timers, self.discovery_timeout);
        let step = match active.session {
            Some(TransportSession::Attribute(session)) => match radio.discover(session) {
                Ok(()) => Step::Continue,
                Err(e) => {
                    warn!("[DISCOVERY] Attribute discovery refused: {:?}", e);
                    Step::Finished(DiscoveryStatus::Failed)
                }
            },
            _ => active.query_next(radio),
        };

        match step {
            Step::Continue => self.active = Some(active),
            Step::Finished(status) => self.finish(active, status, radio, timers),
        }
    }

    /// Take the parked session if it matches, cancelling its close timer
    fn reclaim_session<T: Timers>(
        &mut self,
        peer: PeerAddress,
        transport: Transport,
        timers: &mut T,
    ) -> Option<TransportSession> {
        let parked = self.deferred_close.take_if(|parked| {
            parked.peer == peer && parked.session.transport() == transport
        })?;
        debug!("[DISCOVERY] Reusing open session to {}", peer);
        self.close_timer.cancel(timers);
        Some(parked.session)
    }

    fn apply<R: Radio, T: Timers>(&mut self, step: Step, radio: &mut R, timers: &mut T) {
        if let Step::Finished(status) = step {
            if let Some(active) = self.active.take() {
                self.finish(active, status, radio, timers);
            }
            self.advance_queue(radio, timers);
        }
    }

    fn finish<R: Radio, T: Timers>(
        &mut self,
        mut active: ActiveDiscovery,
        status: DiscoveryStatus,
        radio: &mut R,
        timers: &mut T,
    ) {
        self.discovery_timer.cancel(timers);

        let peer = active.request.peer;
        match active.session.take() {
            Some(session) if status == DiscoveryStatus::TimedOut => session.close(radio),
            Some(session) => self.park(ParkedSession { peer, session }, radio, timers),
            None => {}
        }

        info!(
            "[DISCOVERY] Discovery on {} finished: {:?}, services {:#x}",
            peer,
            status,
            active.found.bits()
        );
        let callback = active.request.callback;
        callback.on_service_discovery(&active.into_result(status));
    }

    fn park<R: Radio, T: Timers>(&mut self, parked: ParkedSession, radio: &mut R, timers: &mut T) {
        if let Some(previous) = self.deferred_close.take() {
            debug!("[DISCOVERY] Closing session to {} early", previous.peer);
            self.close_timer.cancel(timers);
            previous.session.close(radio);
        }
        self.deferred_close = Some(parked);
        self.close_timer.arm(timers, self.close_delay);
    }

    fn advance_queue<R: Radio, T: Timers>(&mut self, radio: &mut R, timers: &mut T) {
        while self.active.is_none() {
            let Some(next) = self.pending_queue.pop() else {
                break;
            };
            self.start(next, radio, timers);
        }
    }
}

impl fmt::Debug for ServiceDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDiscovery")
            .field("state", &self.state())
            .field("active_peer", &self.active_peer())
            .field("pending", &self.pending_queue.len())
            .field("deferred_close", &self.deferred_close)
            .finish_non_exhaustive()
    }
}
