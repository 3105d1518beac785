//! Helpers for explicit network byte-order conversions.
//!
//! 6LoWPAN fragment headers carry their multi-byte fields big-endian. These
//! helpers keep Clippy expectations scoped to the conversion points so the
//! header codec can stay explicit about wire endianness.

/// Serialise a `u16` in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use sixlowpan_frag::byte_order::write_network_u16;
///
/// assert_eq!(write_network_u16(0x690e), [0x69, 0x0e]);
/// ```
#[must_use]
pub fn write_network_u16(value: u16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u16` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use sixlowpan_frag::byte_order::read_network_u16;
///
/// assert_eq!(read_network_u16([0xc1, 0x5c]), 0xc15c);
/// ```
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u16::from_be_bytes(bytes)
}
