//! Frame integrity trailer.
//!
//! The protocol uses CRC-16/CCITT with initial value `0x1d0f` (the "1D0F"
//! variant, no reflection, no final xor). The two trailer bytes go out
//! high byte first, which makes the digest over payload-plus-trailer come
//! out zero on the receive side.

use crc::{Crc, CRC_16_SPI_FUJITSU};

// CRC-16/SPI-FUJITSU is poly 0x1021 with init 0x1d0f: CCITT "1D0F".
const CCITT_1D0F: Crc<u16> = Crc::<u16>::new(&CRC_16_SPI_FUJITSU);

/// Compute the CRC over a payload.
pub fn checksum(payload: &[u8]) -> u16 {
    CCITT_1D0F.checksum(payload)
}

/// Append the big-endian CRC trailer to an outgoing payload.
pub fn append(payload: &mut Vec<u8>) {
    let crc = checksum(payload);
    payload.extend_from_slice(&crc.to_be_bytes());
}

/// Check a received payload that still carries its trailer.
///
/// Valid exactly when the digest over everything, trailer included,
/// leaves a zero residue.
pub fn residue_ok(payload: &[u8]) -> bool {
    payload.len() >= 2 && checksum(payload) == 0
}

#[cfg(test)]
mod test {
    use super::*;

    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn trailered_payload_has_zero_residue(payload: Vec<u8>) -> bool {
        let mut framed = payload;
        append(&mut framed);
        residue_ok(&framed)
    }

    #[test]
    fn single_bit_flip_breaks_residue() {
        let mut framed = vec![0x00, 0x00, 0x00, 0x01];
        append(&mut framed);
        for byte in 0..framed.len() {
            for bit in 0..8 {
                let mut corrupt = framed.clone();
                corrupt[byte] ^= 1 << bit;
                assert!(!residue_ok(&corrupt), "flip {}:{} went unnoticed", byte, bit);
            }
        }
    }

    #[test]
    fn short_input_is_invalid() {
        assert!(!residue_ok(&[]));
        assert!(!residue_ok(&[0x15]));
    }

    #[test]
    fn known_vector() {
        // "123456789" under CRC-16/SPI-FUJITSU
        assert_eq!(checksum(b"123456789"), 0xe5cc);
    }
}
