use crate::{DiscoveryError, constants::BD_ADDR_LENGTH};
use core::{fmt, str::FromStr};

/// A peer device address (`BD_ADDR`), the key every discovery session is tracked by
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress(pub [u8; BD_ADDR_LENGTH]);

impl PeerAddress {
    /// Create a peer address from raw bytes
    #[must_use]
    pub const fn new(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BD_ADDR_LENGTH] {
        &self.0
    }

    /// Format the address as a colon-separated, upper-case hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";

        let mut out = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(':').ok();
            }
            out.push(char::from(HEX[usize::from(byte >> 4)])).ok();
            out.push(char::from(HEX[usize::from(byte & 0x0F)])).ok();
        }
        out
    }

    /// Parse an address written as `XX:XX:XX:XX:XX:XX` or `XX-XX-XX-XX-XX-XX`
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidAddress`] if the string does not contain
    /// exactly six two-digit hex groups.
    pub fn from_hex(text: &str) -> Result<Self, DiscoveryError> {
        let separator = if text.contains('-') { '-' } else { ':' };
        let mut bytes = [0u8; BD_ADDR_LENGTH];
        let mut groups = text.split(separator);

        for byte in &mut bytes {
            let group = groups.next().ok_or(DiscoveryError::InvalidAddress)?;
            if group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(DiscoveryError::InvalidAddress);
            }
            *byte = u8::from_str_radix(group, 16).map_err(|_| DiscoveryError::InvalidAddress)?;
        }

        if groups.next().is_some() {
            return Err(DiscoveryError::InvalidAddress);
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_hex())
    }
}

impl FromStr for PeerAddress {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; BD_ADDR_LENGTH]> for PeerAddress {
    fn from(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }
}

impl From<PeerAddress> for [u8; BD_ADDR_LENGTH] {
    fn from(addr: PeerAddress) -> Self {
        addr.0
    }
}

impl From<PeerAddress> for bt_hci::param::BdAddr {
    fn from(addr: PeerAddress) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl From<bt_hci::param::BdAddr> for PeerAddress {
    fn from(bd_addr: bt_hci::param::BdAddr) -> Self {
        let mut addr = [0u8; BD_ADDR_LENGTH];
        addr.copy_from_slice(bd_addr.raw());
        Self(addr)
    }
}

impl TryFrom<&[u8]> for PeerAddress {
    type Error = DiscoveryError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let addr: [u8; BD_ADDR_LENGTH] =
            bytes.try_into().map_err(|_| DiscoveryError::InvalidAddress)?;
        Ok(Self(addr))
    }
}
