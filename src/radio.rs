//! Radio collaborator contract
//!
//! The state machines never perform radio I/O themselves. They call into a
//! [`Radio`] implementation, which acknowledges each command immediately and
//! later reports the outcome as a [`crate::DiscoveryEvent`] through the same
//! serialized event queue.

use crate::PeerAddress;

/// Failures reported by the radio collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// HCI command or event carried a non-success status code
    Hci(u8),
    /// The controller is busy with a conflicting operation
    Busy,
    /// No connection to the peer
    NotConnected,
    /// Out of handles, buffers or connection slots
    NoResources,
    /// The remote side answered with a protocol error
    Protocol,
}

/// Inquiry parameters handed to [`Radio::start_scan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InquiryParams {
    /// Inquiry access code LAP (`GIAC` or `LIAC`)
    pub lap: [u8; 3],
    /// Inquiry duration in 1.28s units (1-48)
    pub inquiry_length: u8,
    /// Maximum number of responses, 0 for unlimited
    pub num_responses: u8,
}

/// Handle of an open directory lookup (SDP) session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LookupHandle(pub u16);

/// An open attribute (GATT client) session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttributeSession {
    /// Registered client interface
    pub client_if: u8,
    /// Connection the client is bound to
    pub conn_id: u16,
}

/// Radio and transport operations the discovery core relies on
///
/// Every method must return without waiting for the operation to finish.
pub trait Radio {
    /// Start an inquiry; devices arrive as `InquiryResult`, the end as `InquiryComplete`
    ///
    /// # Errors
    /// Returns an error if the controller refuses the inquiry.
    fn start_scan(&mut self, params: &InquiryParams) -> Result<(), RadioError>;

    /// Cancel the running inquiry; confirmed by `InquiryComplete`
    ///
    /// # Errors
    /// Returns an error if no inquiry is running.
    fn cancel_scan(&mut self) -> Result<(), RadioError>;

    /// Request the remote name of `peer`; answered by `RemoteNameResult`
    ///
    /// # Errors
    /// Returns an error if the request cannot be issued.
    fn resolve_name(&mut self, peer: PeerAddress) -> Result<(), RadioError>;

    /// Cancel an outstanding remote name request; confirmed by `RemoteNameResult`
    ///
    /// # Errors
    /// Returns an error if no request is outstanding for `peer`.
    fn cancel_name_request(&mut self, peer: PeerAddress) -> Result<(), RadioError>;

    /// Open a directory lookup session with `peer`
    ///
    /// # Errors
    /// Returns an error if no session can be allocated.
    fn open_directory_lookup(&mut self, peer: PeerAddress) -> Result<LookupHandle, RadioError>;

    /// Search the peer's records for one service class; answered by `DirectoryLookupResult`
    ///
    /// # Errors
    /// Returns an error if the query cannot be sent.
    fn query(&mut self, handle: LookupHandle, service: crate::Uuid) -> Result<(), RadioError>;

    /// Release a directory lookup session
    fn close_directory_lookup(&mut self, handle: LookupHandle);

    /// Open (connect) an attribute client session with `peer`
    ///
    /// # Errors
    /// Returns an error if the client cannot be registered or connected.
    fn open_attribute_session(&mut self, peer: PeerAddress)
    -> Result<AttributeSession, RadioError>;

    /// Enumerate primary services; reported as `AttributeDiscoveryResult`
    ///
    /// # Errors
    /// Returns an error if discovery cannot be started.
    fn discover(&mut self, session: AttributeSession) -> Result<(), RadioError>;

    /// Disconnect and release an attribute session
    fn close_attribute_session(&mut self, session: AttributeSession);
}
