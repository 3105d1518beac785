//! Tests for the RFC 4944 fragment header codec.

use rstest::rstest;

use crate::frag::header::*;

#[test]
fn decodes_captured_first_fragment() {
    let header = FragmentHeader::decode(&[0xc1, 0x5c, 0x69, 0x0e, 0x41, 0x60]).expect("valid");
    assert_eq!(
        header,
        FragmentHeader::First {
            datagram_size: 348,
            tag: DatagramTag::new(0x690e),
        }
    );
    assert_eq!(header.len(), FRAG1_HEADER_LEN);
    assert_eq!(header.offset(), 0);
}

#[rstest]
#[case(0x0c, 96)]
#[case(0x18, 192)]
#[case(0x24, 288)]
fn decodes_offsets_in_units_of_eight(#[case] raw: u8, #[case] offset: u16) {
    let header = FragmentHeader::decode(&[0xe1, 0x5c, 0x69, 0x0e, raw]).expect("valid");
    assert_eq!(header.offset(), offset);
    assert!(!header.is_first());
}

#[test]
fn encodes_subsequent_fragment() {
    let header = FragmentHeader::subsequent(300, DatagramTag::new(0x1234), 88).expect("aligned");
    let mut buf = [0_u8; 8];
    assert_eq!(header.encode(&mut buf), Ok(FRAGN_HEADER_LEN));
    assert_eq!(&buf[..FRAGN_HEADER_LEN], &[0xe1, 0x2c, 0x12, 0x34, 11]);
}

#[rstest]
#[case(&[], HeaderError::Truncated { needed: 4, available: 0 })]
#[case(&[0xc1, 0x5c, 0x69], HeaderError::Truncated { needed: 4, available: 3 })]
#[case(&[0xe1, 0x5c, 0x69, 0x0e], HeaderError::Truncated { needed: 5, available: 4 })]
#[case(&[0x41, 0x60, 0x00, 0x00], HeaderError::UnknownDispatch(0x41))]
fn rejects_malformed_headers(#[case] data: &[u8], #[case] expected: HeaderError) {
    assert_eq!(FragmentHeader::decode(data), Err(expected));
}

#[rstest]
#[case(12)]
#[case(2048)]
fn rejects_unencodable_offsets(#[case] offset: usize) {
    assert_eq!(
        FragmentHeader::subsequent(348, DatagramTag::new(1), offset),
        Err(HeaderError::InvalidOffset(offset))
    );
}

#[test]
fn rejects_oversized_datagram_on_encode() {
    let header = FragmentHeader::First {
        datagram_size: 2048,
        tag: DatagramTag::new(1),
    };
    let mut buf = [0_u8; 4];
    assert_eq!(header.encode(&mut buf), Err(HeaderError::SizeOutOfRange(2048)));
}

#[test]
fn classifies_dispatch_bytes() {
    assert!(is_fragment(&[0xc1]));
    assert!(is_fragment(&[0xe7]));
    assert!(!is_fragment(&[0x41]));
    assert!(!is_fragment(&[]));
    assert!(is_iphc(&[0x7a]));
    assert!(!is_iphc(&[0x41]));
    assert_eq!(floor8(95), 88);
    assert_eq!(floor8(96), 96);
}
