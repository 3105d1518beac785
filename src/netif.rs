//! Network interface descriptors and per-packet link-layer metadata.
//!
//! The fragmentation engine never talks to a radio directly. It reads the
//! fragment size limit from an [`Interface`] and copies the [`NetifHeader`] of
//! the datagram it splits onto every fragment it emits.

use derive_more::{Display, From, Into};
use thiserror::Error;

/// Longest link-layer address supported (IEEE 802.15.4 extended address).
pub const L2ADDR_MAX_LEN: usize = 8;

/// Identifier of a network interface within one stack instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
#[display("if{_0}")]
pub struct IfaceId(u16);

impl IfaceId {
    /// Create a new interface identifier.
    #[must_use]
    pub const fn new(value: u16) -> Self { Self(value) }

    /// Return the numeric identifier.
    #[must_use]
    pub const fn get(self) -> u16 { self.0 }
}

/// Error returned when a link-layer address exceeds [`L2ADDR_MAX_LEN`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("link-layer address of {0} bytes exceeds {max} bytes", max = L2ADDR_MAX_LEN)]
pub struct L2AddrTooLong(pub usize);

/// Link-layer address of up to [`L2ADDR_MAX_LEN`] bytes.
///
/// # Examples
///
/// ```
/// use sixlowpan_frag::netif::L2Addr;
///
/// let addr = L2Addr::new(&[0xb3, 0x47]).expect("short address fits");
/// assert_eq!(addr.as_bytes(), &[0xb3, 0x47]);
/// assert!(L2Addr::new(&[0; 9]).is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct L2Addr {
    bytes: [u8; L2ADDR_MAX_LEN],
    len: u8,
}

impl L2Addr {
    /// Build an address from its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`L2AddrTooLong`] when `bytes` is longer than
    /// [`L2ADDR_MAX_LEN`].
    pub fn new(bytes: &[u8]) -> Result<Self, L2AddrTooLong> {
        if bytes.len() > L2ADDR_MAX_LEN {
            return Err(L2AddrTooLong(bytes.len()));
        }
        let len = u8::try_from(bytes.len()).map_err(|_| L2AddrTooLong(bytes.len()))?;
        let mut addr = Self {
            bytes: [0; L2ADDR_MAX_LEN],
            len,
        };
        addr.bytes[..bytes.len()].copy_from_slice(bytes);
        Ok(addr)
    }

    /// Borrow the address bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.bytes[..usize::from(self.len)] }

    /// Number of address bytes.
    #[must_use]
    pub fn len(&self) -> usize { usize::from(self.len) }

    /// Whether the address is absent.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }
}

impl std::fmt::Debug for L2Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Link-layer metadata travelling with a packet through the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetifHeader {
    /// Interface the packet is sent on or was received from.
    pub iface: IfaceId,
    /// Link-layer source address.
    pub src: L2Addr,
    /// Link-layer destination address.
    pub dst: L2Addr,
    /// Further frames of the same datagram follow this one.
    pub more_data: bool,
}

impl NetifHeader {
    /// Create a header without the "more data" flag.
    #[must_use]
    pub const fn new(iface: IfaceId, src: L2Addr, dst: L2Addr) -> Self {
        Self {
            iface,
            src,
            dst,
            more_data: false,
        }
    }
}

/// Static description of a 6LoWPAN-capable network interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interface {
    /// Identifier used in [`NetifHeader::iface`].
    pub id: IfaceId,
    /// Largest 6LoWPAN frame (fragment header included) the link carries.
    pub max_frag_size: u16,
    /// IPv6 MTU advertised for the interface.
    pub mtu: u16,
    /// Own link-layer address.
    pub l2addr: L2Addr,
}

impl Interface {
    /// IPv6 minimum MTU, which 6LoWPAN links provide through fragmentation.
    pub const IPV6_MIN_MTU: u16 = 1280;

    /// Create an interface with the IPv6 minimum MTU.
    #[must_use]
    pub const fn new(id: IfaceId, max_frag_size: u16, l2addr: L2Addr) -> Self {
        Self {
            id,
            max_frag_size,
            mtu: Self::IPV6_MIN_MTU,
            l2addr,
        }
    }
}
