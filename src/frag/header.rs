//! RFC 4944 fragmentation header codec.
//!
//! Two header shapes exist on the wire:
//!
//! ```text
//! FRAG1:  | 1 1 0 0 0 | datagram_size (11) | datagram_tag (16) |
//! FRAGN:  | 1 1 1 0 0 | datagram_size (11) | datagram_tag (16) | offset (8) |
//! ```
//!
//! The offset of a subsequent fragment is stored in units of eight bytes.
//! Multi-byte fields are big-endian. Encoding and decoding work on byte
//! slices through named masks rather than on a packed struct layout.

use derive_more::{Display, From, Into};
use static_assertions::const_assert_eq;
use thiserror::Error;

use crate::byte_order::{read_network_u16, write_network_u16};

/// Dispatch bits of a first fragment header.
pub const FRAG1_DISPATCH: u8 = 0xc0;
/// Dispatch bits of a subsequent fragment header.
pub const FRAGN_DISPATCH: u8 = 0xe0;
/// Mask selecting the five dispatch bits of a fragment header.
pub const FRAG_DISPATCH_MASK: u8 = 0xf8;
/// Mask selecting the datagram size from the first 16 bits.
pub const FRAG_SIZE_MASK: u16 = 0x07ff;
/// Largest datagram size the 11-bit size field can express.
pub const MAX_DATAGRAM_SIZE: u16 = FRAG_SIZE_MASK;
/// Length of a first fragment header.
pub const FRAG1_HEADER_LEN: usize = 4;
/// Length of a subsequent fragment header.
pub const FRAGN_HEADER_LEN: usize = 5;
/// Offsets are carried in units of this many bytes.
pub const FRAG_OFFSET_UNIT: u16 = 8;
/// Dispatch of an uncompressed IPv6 header.
pub const UNCOMPRESSED_IPV6_DISPATCH: u8 = 0x41;
/// Dispatch bits of an IPHC compressed header.
pub const IPHC_DISPATCH: u8 = 0x60;
/// Mask selecting the IPHC dispatch bits.
pub const IPHC_DISPATCH_MASK: u8 = 0xe0;

const_assert_eq!(FRAG1_DISPATCH & !FRAG_DISPATCH_MASK, 0);
const_assert_eq!(FRAGN_DISPATCH & !FRAG_DISPATCH_MASK, 0);
const_assert_eq!(FRAGN_HEADER_LEN, FRAG1_HEADER_LEN + 1);

/// Datagram tag shared by all fragments of one datagram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, From, Into)]
#[display("{_0:#06x}")]
pub struct DatagramTag(u16);

impl DatagramTag {
    /// Create a new tag.
    #[must_use]
    pub const fn new(value: u16) -> Self { Self(value) }

    /// Return the numeric tag.
    #[must_use]
    pub const fn get(self) -> u16 { self.0 }

    /// Return the tag that follows this one, wrapping at `u16::MAX`.
    #[must_use]
    pub const fn wrapping_next(self) -> Self { Self(self.0.wrapping_add(1)) }
}

/// Errors raised while decoding or encoding fragment headers.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// The buffer is shorter than the header it announces.
    #[error("fragment header truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required by the header.
        needed: usize,
        /// Bytes available in the buffer.
        available: usize,
    },
    /// The dispatch byte matches neither fragment header.
    #[error("not a fragment dispatch: {0:#04x}")]
    UnknownDispatch(u8),
    /// The datagram size does not fit the 11-bit size field.
    #[error("datagram size {0} exceeds {max}", max = MAX_DATAGRAM_SIZE)]
    SizeOutOfRange(usize),
    /// The offset is not a multiple of eight or exceeds the 8-bit field.
    #[error("fragment offset {0} cannot be encoded")]
    InvalidOffset(usize),
}

/// Decoded fragment header.
///
/// # Examples
///
/// ```
/// use sixlowpan_frag::frag::header::{DatagramTag, FragmentHeader};
///
/// let header = FragmentHeader::decode(&[0xe1, 0x5c, 0x69, 0x0e, 0x0c]).expect("valid header");
/// assert_eq!(
///     header,
///     FragmentHeader::Subsequent {
///         datagram_size: 348,
///         tag: DatagramTag::new(0x690e),
///         offset: 96,
///     }
/// );
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentHeader {
    /// First fragment; its payload starts at offset zero.
    First {
        /// Size of the uncompressed datagram.
        datagram_size: u16,
        /// Datagram tag.
        tag: DatagramTag,
    },
    /// Any later fragment.
    Subsequent {
        /// Size of the uncompressed datagram.
        datagram_size: u16,
        /// Datagram tag.
        tag: DatagramTag,
        /// Offset of the payload in the uncompressed datagram, in bytes.
        offset: u16,
    },
}

impl FragmentHeader {
    /// Decode the header at the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::UnknownDispatch`] when `data` does not start
    /// with a fragment dispatch and [`HeaderError::Truncated`] when it is too
    /// short for the announced header.
    pub fn decode(data: &[u8]) -> Result<Self, HeaderError> {
        let Some(&first) = data.first() else {
            return Err(HeaderError::Truncated {
                needed: FRAG1_HEADER_LEN,
                available: 0,
            });
        };
        let needed = match first & FRAG_DISPATCH_MASK {
            FRAG1_DISPATCH => FRAG1_HEADER_LEN,
            FRAGN_DISPATCH => FRAGN_HEADER_LEN,
            _ => return Err(HeaderError::UnknownDispatch(first)),
        };
        if data.len() < needed {
            return Err(HeaderError::Truncated {
                needed,
                available: data.len(),
            });
        }

        let datagram_size = read_network_u16([data[0], data[1]]) & FRAG_SIZE_MASK;
        let tag = DatagramTag::new(read_network_u16([data[2], data[3]]));
        if needed == FRAG1_HEADER_LEN {
            return Ok(Self::First { datagram_size, tag });
        }
        Ok(Self::Subsequent {
            datagram_size,
            tag,
            offset: u16::from(data[4]) * FRAG_OFFSET_UNIT,
        })
    }

    /// Build a subsequent fragment header, validating the offset.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::InvalidOffset`] when `offset` is not a multiple
    /// of eight or exceeds the range of the 8-bit offset field.
    pub fn subsequent(datagram_size: u16, tag: DatagramTag, offset: usize) -> Result<Self, HeaderError> {
        let unit = usize::from(FRAG_OFFSET_UNIT);
        if offset % unit != 0 || offset / unit > usize::from(u8::MAX) {
            return Err(HeaderError::InvalidOffset(offset));
        }
        let offset = u16::try_from(offset).map_err(|_| HeaderError::InvalidOffset(offset))?;
        Ok(Self::Subsequent {
            datagram_size,
            tag,
            offset,
        })
    }

    /// Size of the uncompressed datagram.
    #[must_use]
    pub const fn datagram_size(&self) -> u16 {
        match *self {
            Self::First { datagram_size, .. } | Self::Subsequent { datagram_size, .. } => {
                datagram_size
            }
        }
    }

    /// Datagram tag.
    #[must_use]
    pub const fn tag(&self) -> DatagramTag {
        match *self {
            Self::First { tag, .. } | Self::Subsequent { tag, .. } => tag,
        }
    }

    /// Byte offset of the fragment payload in the uncompressed datagram.
    #[must_use]
    pub const fn offset(&self) -> u16 {
        match *self {
            Self::First { .. } => 0,
            Self::Subsequent { offset, .. } => offset,
        }
    }

    /// Encoded length of the header.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::First { .. } => FRAG1_HEADER_LEN,
            Self::Subsequent { .. } => FRAGN_HEADER_LEN,
        }
    }

    /// Whether this is a first fragment header.
    #[must_use]
    pub const fn is_first(&self) -> bool { matches!(self, Self::First { .. }) }

    /// Write the header to the start of `buf`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::Truncated`] when `buf` is too short,
    /// [`HeaderError::SizeOutOfRange`] when the datagram size exceeds the
    /// size field and [`HeaderError::InvalidOffset`] for an offset that is
    /// not representable.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, HeaderError> {
        let len = self.len();
        if buf.len() < len {
            return Err(HeaderError::Truncated {
                needed: len,
                available: buf.len(),
            });
        }
        let datagram_size = self.datagram_size();
        if datagram_size > MAX_DATAGRAM_SIZE {
            return Err(HeaderError::SizeOutOfRange(usize::from(datagram_size)));
        }

        let dispatch = if self.is_first() {
            FRAG1_DISPATCH
        } else {
            FRAGN_DISPATCH
        };
        let disp_size = (u16::from(dispatch) << 8) | datagram_size;
        buf[..2].copy_from_slice(&write_network_u16(disp_size));
        buf[2..4].copy_from_slice(&write_network_u16(self.tag().get()));
        if let Self::Subsequent { offset, .. } = *self {
            if offset % FRAG_OFFSET_UNIT != 0 {
                return Err(HeaderError::InvalidOffset(usize::from(offset)));
            }
            buf[4] = u8::try_from(offset / FRAG_OFFSET_UNIT)
                .map_err(|_| HeaderError::InvalidOffset(usize::from(offset)))?;
        }
        Ok(len)
    }
}

/// Whether `data` starts with a fragment dispatch.
#[must_use]
pub fn is_fragment(data: &[u8]) -> bool {
    data.first().is_some_and(|&byte| {
        matches!(byte & FRAG_DISPATCH_MASK, FRAG1_DISPATCH | FRAGN_DISPATCH)
    })
}

/// Whether `data` starts with an IPHC dispatch.
#[must_use]
pub fn is_iphc(data: &[u8]) -> bool {
    data.first()
        .is_some_and(|&byte| byte & IPHC_DISPATCH_MASK == IPHC_DISPATCH)
}

/// Round `value` down to a multiple of [`FRAG_OFFSET_UNIT`].
#[must_use]
pub const fn floor8(value: usize) -> usize { value & !(FRAG_OFFSET_UNIT as usize - 1) }
