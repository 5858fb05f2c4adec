//! Service classes, service masks and UUIDs
//!
//! The service table maps each known service class ([`ServiceId`]) to the 16-bit
//! UUID a directory lookup searches for. A [`ServiceMask`] is a bitmask over the
//! same table (bit `n` is the service whose id is `n`) and is used both for the
//! services a caller wants and the services actually found on a peer.

use core::ops::{BitAnd, BitOr, BitOrAssign};

/// Bluetooth Base UUID: 00000000-0000-1000-8000-00805F9B34FB
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;
const SHORT_UUID_MASK: u128 = 0xFFFF_FFFF_u128 << 96;

/// A 128-bit service UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid(u128);

impl Uuid {
    /// Create a UUID from its full 128-bit value
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    /// Expand a 16-bit short UUID over the Bluetooth Base UUID
    #[must_use]
    pub const fn from_u16(short: u16) -> Self {
        Self(BASE_UUID | ((short as u128) << 96))
    }

    /// Full 128-bit value
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0
    }

    /// The 16-bit short form, if this UUID is derived from the Base UUID
    #[must_use]
    pub const fn as_u16(self) -> Option<u16> {
        let value = self.0 >> 96;
        if self.0 & !SHORT_UUID_MASK == BASE_UUID && value <= 0xFFFF {
            Some(value as u16)
        } else {
            None
        }
    }
}

impl From<u16> for Uuid {
    fn from(short: u16) -> Self {
        Self::from_u16(short)
    }
}

/// Known service classes, in lookup-table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ServiceId {
    /// Device Identification (`PnP` information)
    Res = 0,
    /// Serial Port Profile
    Spp = 1,
    /// Dial-up Networking
    Dun = 2,
    /// Advanced Audio source
    A2dpSource = 3,
    /// LAN Access
    Lap = 4,
    /// Headset
    Hsp = 5,
    /// Hands-Free
    Hfp = 6,
    /// Object Push
    Opp = 7,
    /// File Transfer
    Ftp = 8,
    /// Cordless Telephony
    Ctp = 9,
    /// Intercom
    Icp = 10,
    /// `IrMC` Synchronization
    Sync = 11,
    /// Basic Printing
    Bpp = 12,
    /// Basic Imaging
    Bip = 13,
    /// PAN user
    Panu = 14,
    /// PAN network access point
    Nap = 15,
    /// PAN group ad-hoc network
    Gn = 16,
    /// SIM Access
    Sap = 17,
    /// Advanced Audio sink
    A2dpSink = 18,
    /// A/V Remote Control
    Avrcp = 19,
    /// Human Interface Device
    Hid = 20,
    /// Video Distribution
    Vdp = 21,
    /// Phonebook Access server
    Pbap = 22,
    /// Headset (headset role)
    HspHeadset = 23,
    /// Hands-Free (hands-free unit role)
    HfpHandsFree = 24,
    /// Message Access
    Map = 25,
    /// Message Notification
    Mn = 26,
    /// Health Device
    Hdp = 27,
    /// Phonebook Access client
    PbapClient = 28,
}

/// Number of entries in the service table
pub const SERVICE_COUNT: usize = 29;

/// Service table: service id order, 16-bit service class UUID
const SERVICE_TABLE: [(ServiceId, u16); SERVICE_COUNT] = [
    (ServiceId::Res, 0x1200),
    (ServiceId::Spp, 0x1101),
    (ServiceId::Dun, 0x1103),
    (ServiceId::A2dpSource, 0x110A),
    (ServiceId::Lap, 0x1102),
    (ServiceId::Hsp, 0x1108),
    (ServiceId::Hfp, 0x111E),
    (ServiceId::Opp, 0x1105),
    (ServiceId::Ftp, 0x1106),
    (ServiceId::Ctp, 0x1109),
    (ServiceId::Icp, 0x1110),
    (ServiceId::Sync, 0x1104),
    (ServiceId::Bpp, 0x1118),
    (ServiceId::Bip, 0x111B),
    (ServiceId::Panu, 0x1115),
    (ServiceId::Nap, 0x1116),
    (ServiceId::Gn, 0x1117),
    (ServiceId::Sap, 0x112D),
    (ServiceId::A2dpSink, 0x110B),
    (ServiceId::Avrcp, 0x110E),
    (ServiceId::Hid, 0x1124),
    (ServiceId::Vdp, 0x1304),
    (ServiceId::Pbap, 0x112F),
    (ServiceId::HspHeadset, 0x1131),
    (ServiceId::HfpHandsFree, 0x111F),
    (ServiceId::Map, 0x1132),
    (ServiceId::Mn, 0x1133),
    (ServiceId::Hdp, 0x1400),
    (ServiceId::PbapClient, 0x112E),
];

impl ServiceId {
    /// Look up the service at `index` in the service table
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < SERVICE_COUNT {
            Some(SERVICE_TABLE[index].0)
        } else {
            None
        }
    }

    /// 16-bit service class UUID searched for this service
    #[must_use]
    pub const fn uuid16(self) -> u16 {
        SERVICE_TABLE[self as usize].1
    }

    /// Full service class UUID
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        Uuid::from_u16(self.uuid16())
    }

    /// Find the service whose class UUID is `uuid`
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        let short = uuid.as_u16()?;
        SERVICE_TABLE
            .iter()
            .find(|(_, class)| *class == short)
            .map(|(id, _)| *id)
    }
}

impl TryFrom<u8> for ServiceId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_index(usize::from(value)).ok_or(value)
    }
}

/// Bitmask over the service table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceMask(pub u32);

impl ServiceMask {
    /// No services
    pub const EMPTY: Self = Self(0);

    /// Every service in the table
    pub const ALL: Self = Self((1 << SERVICE_COUNT) - 1);

    /// Mask holding a single service
    #[must_use]
    pub const fn of(id: ServiceId) -> Self {
        Self(1 << (id as u32))
    }

    /// Raw bits
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether no service bit is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether `id` is part of the mask
    #[must_use]
    pub const fn contains(self, id: ServiceId) -> bool {
        self.0 & (1 << (id as u32)) != 0
    }

    /// Whether every service in `other` is also in `self`
    #[must_use]
    pub const fn is_superset_of(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Services in `self` that are not in `other`
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Add a service to the mask
    pub fn insert(&mut self, id: ServiceId) {
        self.0 |= 1 << (id as u32);
    }

    /// Number of services in the mask
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Mask of the table entry matching `uuid`, empty when the UUID is unknown
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        ServiceId::from_uuid(uuid).map_or(Self::EMPTY, Self::of)
    }

    /// Next table index at or after `cursor` whose service is in the mask
    #[must_use]
    pub fn next_index(self, cursor: usize) -> Option<usize> {
        (cursor..SERVICE_COUNT).find(|&index| self.0 & (1 << index) != 0)
    }

    /// Iterate the services in table order
    pub fn iter(self) -> impl Iterator<Item = ServiceId> {
        (0..SERVICE_COUNT)
            .filter_map(ServiceId::from_index)
            .filter(move |id| self.contains(*id))
    }
}

impl From<ServiceId> for ServiceMask {
    fn from(id: ServiceId) -> Self {
        Self::of(id)
    }
}

impl BitOr for ServiceMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOr<ServiceId> for ServiceMask {
    type Output = Self;

    fn bitor(self, rhs: ServiceId) -> Self::Output {
        self | Self::of(rhs)
    }
}

impl BitOr for ServiceId {
    type Output = ServiceMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ServiceMask::of(self) | ServiceMask::of(rhs)
    }
}

impl BitOrAssign for ServiceMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ServiceMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_in_id_order() {
        for (index, (id, _)) in SERVICE_TABLE.iter().enumerate() {
            assert_eq!(*id as usize, index);
            assert_eq!(ServiceId::try_from(index as u8), Ok(*id));
        }
        assert_eq!(ServiceId::try_from(SERVICE_COUNT as u8), Err(29));
    }

    #[test]
    fn test_uuid_short_form() {
        let uuid = Uuid::from_u16(0x110A);
        assert_eq!(
            uuid.as_u128(),
            0x0000_110A_0000_1000_8000_0080_5F9B_34FB
        );
        assert_eq!(uuid.as_u16(), Some(0x110A));

        let vendor = Uuid::from_u128(0x6E40_0001_B5A3_F393_E0A9_E50E_24DC_CA9E);
        assert_eq!(vendor.as_u16(), None);
    }

    #[test]
    fn test_service_lookup_by_uuid() {
        assert_eq!(
            ServiceId::from_uuid(Uuid::from_u16(0x111E)),
            Some(ServiceId::Hfp)
        );
        assert_eq!(ServiceId::from_uuid(Uuid::from_u16(0x1812)), None);
        // headset role is 0x1131; 0x1112 is the audio gateway and maps to nothing
        assert_eq!(ServiceId::HspHeadset.uuid16(), 0x1131);
        assert_eq!(
            ServiceId::from_uuid(Uuid::from_u16(0x1131)),
            Some(ServiceId::HspHeadset)
        );
        assert_eq!(ServiceId::from_uuid(Uuid::from_u16(0x1112)), None);
        assert_eq!(
            ServiceMask::from_uuid(Uuid::from_u16(0x110B)),
            ServiceMask::of(ServiceId::A2dpSink)
        );
        assert!(ServiceMask::from_uuid(Uuid::from_u16(0x1812)).is_empty());
    }

    #[test]
    fn test_mask_operations() {
        let mut mask = ServiceId::Hfp | ServiceId::A2dpSink;
        assert!(mask.contains(ServiceId::Hfp));
        assert!(!mask.contains(ServiceId::Spp));
        assert_eq!(mask.len(), 2);

        mask.insert(ServiceId::Spp);
        assert!(mask.is_superset_of(ServiceId::Spp | ServiceId::Hfp));
        assert!(!mask.is_superset_of(ServiceMask::of(ServiceId::Map)));
        assert_eq!(ServiceMask::ALL.len(), SERVICE_COUNT as u32);
        assert_eq!(
            mask.difference(ServiceId::Hfp | ServiceId::Map),
            ServiceId::A2dpSink | ServiceId::Spp
        );
    }

    #[test]
    fn test_mask_cursor_walk() {
        let mask = ServiceId::Spp | ServiceId::Hfp | ServiceId::A2dpSink;
        assert_eq!(mask.next_index(0), Some(1));
        assert_eq!(mask.next_index(2), Some(6));
        assert_eq!(mask.next_index(7), Some(18));
        assert_eq!(mask.next_index(19), None);

        let ids: heapless::Vec<ServiceId, 4> = mask.iter().collect();
        assert_eq!(
            ids.as_slice(),
            &[ServiceId::Spp, ServiceId::Hfp, ServiceId::A2dpSink]
        );
    }
}
