//! `Birdwatch` API
//!
//! [`DiscoveryClient`] is the caller side of the serialized event channel: every
//! request becomes a [`DiscoveryEvent`] that the processor task dispatches in
//! arrival order. Outcomes always come back through callbacks; [`SearchSignal`]
//! and [`DiscoverySignal`] are ready-made callbacks an async caller can wait on.
//!
//! # Usage
//!
//! ```rust,ignore
//! use birdwatch::{ServiceId, Transport, api::{DiscoveryClient, DiscoverySignal, SearchSignal}};
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
//!
//! static SEARCH: SearchSignal<CriticalSectionRawMutex> = SearchSignal::new();
//! static SERVICES: DiscoverySignal<CriticalSectionRawMutex> = DiscoverySignal::new();
//!
//! let client = DiscoveryClient::new(&EVENTS);
//! client.start_search(&SEARCH).await;
//! let status = SEARCH.wait().await;
//!
//! client
//!     .discover_services("00:1B:DC:0F:42:07", ServiceId::Hfp.into(), Transport::Classic, &SERVICES)
//!     .await?;
//! let result = SERVICES.wait().await;
//! ```

use crate::{
    DiscoveryError, DiscoveryEvent, DiscoveryRequest, DiscoveryStatus, PeerAddress,
    SearchCallback, SearchEvent, SearchRequest, ServiceDiscoveryCallback, ServiceDiscoveryResult,
    ServiceMask, Transport,
};
use embassy_sync::{
    blocking_mutex::raw::RawMutex,
    channel::{Channel, Sender},
    signal::Signal,
};

/// Submits requests to the discovery processor
pub struct DiscoveryClient<'ch, M: RawMutex, const N: usize> {
    sender: Sender<'ch, M, DiscoveryEvent, N>,
}

impl<M: RawMutex, const N: usize> Clone for DiscoveryClient<'_, M, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: RawMutex, const N: usize> Copy for DiscoveryClient<'_, M, N> {}

impl<'ch, M: RawMutex, const N: usize> DiscoveryClient<'ch, M, N> {
    /// Create a client feeding `channel`
    pub fn new(channel: &'ch Channel<M, DiscoveryEvent, N>) -> Self {
        Self {
            sender: channel.sender(),
        }
    }

    /// Start a device search; a running search is cancelled first
    pub async fn start_search(&self, callback: &'static dyn SearchCallback) {
        self.send(DiscoveryEvent::StartSearch(SearchRequest::new(callback)))
            .await;
    }

    /// Cancel the running device search
    pub async fn cancel_search(&self) {
        self.send(DiscoveryEvent::CancelSearch).await;
    }

    /// Start, or queue, service discovery on a peer
    pub async fn request_service_discovery(&self, request: DiscoveryRequest) {
        self.send(DiscoveryEvent::StartDiscovery(request)).await;
    }

    /// Start service discovery on a peer given by its textual address
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidAddress`] if `address` is not of the form
    /// `AA:BB:CC:DD:EE:FF`; nothing is submitted in that case.
    pub async fn discover_services(
        &self,
        address: &str,
        services: ServiceMask,
        transport: Transport,
        callback: &'static dyn ServiceDiscoveryCallback,
    ) -> Result<(), DiscoveryError> {
        let peer = PeerAddress::from_hex(address)?;
        self.request_service_discovery(DiscoveryRequest::new(peer, services, transport, callback))
            .await;
        Ok(())
    }

    /// Non-blocking [`Self::start_search`]
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::QueueFull`] if the channel has no room.
    pub fn try_start_search(
        &self,
        callback: &'static dyn SearchCallback,
    ) -> Result<(), DiscoveryError> {
        self.try_send(DiscoveryEvent::StartSearch(SearchRequest::new(callback)))
    }

    /// Non-blocking [`Self::cancel_search`]
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::QueueFull`] if the channel has no room.
    pub fn try_cancel_search(&self) -> Result<(), DiscoveryError> {
        self.try_send(DiscoveryEvent::CancelSearch)
    }

    /// Non-blocking [`Self::request_service_discovery`]
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::QueueFull`] if the channel has no room.
    pub fn try_request_service_discovery(
        &self,
        request: DiscoveryRequest,
    ) -> Result<(), DiscoveryError> {
        self.try_send(DiscoveryEvent::StartDiscovery(request))
    }

    /// Push any event, including radio completions and timer expiries from
    /// platform glue
    pub async fn send(&self, event: DiscoveryEvent) {
        self.sender.send(event).await;
    }

    /// Non-blocking [`Self::send`]
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::QueueFull`] if the channel has no room.
    pub fn try_send(&self, event: DiscoveryEvent) -> Result<(), DiscoveryError> {
        self.sender.try_send(event).map_err(|_| {
            warn!("[API] Event queue full");
            DiscoveryError::QueueFull
        })
    }
}

/// Search callback that stores the final status for an async waiter
///
/// Progress events are ignored; only [`SearchEvent::Complete`] is kept.
pub struct SearchSignal<M: RawMutex> {
    inner: Signal<M, DiscoveryStatus>,
}

impl<M: RawMutex> SearchSignal<M> {
    /// Create an empty signal
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Signal::new(),
        }
    }

    /// Wait for the search to complete
    pub async fn wait(&self) -> DiscoveryStatus {
        self.inner.wait().await
    }

    /// Take the status if the search has completed
    pub fn try_take(&self) -> Option<DiscoveryStatus> {
        self.inner.try_take()
    }
}

impl<M: RawMutex> Default for SearchSignal<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex + Sync> SearchCallback for SearchSignal<M> {
    fn on_search_event(&self, event: SearchEvent<'_>) {
        if let SearchEvent::Complete(status) = event {
            self.inner.signal(status);
        }
    }
}

/// Service discovery callback that stores the result for an async waiter
pub struct DiscoverySignal<M: RawMutex> {
    inner: Signal<M, ServiceDiscoveryResult>,
}

impl<M: RawMutex> DiscoverySignal<M> {
    /// Create an empty signal
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Signal::new(),
        }
    }

    /// Wait for the discovery result
    pub async fn wait(&self) -> ServiceDiscoveryResult {
        self.inner.wait().await
    }

    /// Take the result if it has arrived
    pub fn try_take(&self) -> Option<ServiceDiscoveryResult> {
        self.inner.try_take()
    }
}

impl<M: RawMutex> Default for DiscoverySignal<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex + Sync> ServiceDiscoveryCallback for DiscoverySignal<M> {
    fn on_service_discovery(&self, result: &ServiceDiscoveryResult) {
        self.inner.signal(result.clone());
    }
}
