//! RFC 1071 Internet checksum.

/// Ones' complement sum of `data` taken as big endian 16 bit words, carries
/// folded back into the low 16 bits. A trailing odd byte is the high byte of
/// a zero padded word.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        // Fold eagerly so arbitrarily long buffers cannot overflow.
        if sum > 0xFFFF {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Checksum to store (big endian) in a header whose checksum field was zeroed
/// while computing it.
pub fn checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data)
}

/// True when a buffer carrying its checksum sums to `0xFFFF`.
pub fn verify(data: &[u8]) -> bool {
    ones_complement_sum(data) == 0xFFFF
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zeros() {
        assert_eq!(checksum(&[0u8; 20]), 0xFFFF);
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn known_ipv4_header() {
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(checksum(&header), 0xb861);
    }

    #[test]
    fn odd_trailing_byte_is_high_byte() {
        assert_eq!(ones_complement_sum(&[0x01]), 0x0100);
        assert_eq!(checksum(&[0x01]), 0xFEFF);
        assert_eq!(checksum(&[0x12, 0x34, 0x56]), !(0x1234u16 + 0x5600));
    }

    #[test]
    fn carries_are_folded() {
        // 0xFFFF + 0x0001 = 0x1_0000 -> 0x0001
        assert_eq!(ones_complement_sum(&[0xFF, 0xFF, 0x00, 0x01]), 0x0001);
    }

    #[test]
    fn matches_pnet() {
        let mut message = vec![8, 0, 0, 0, 0x12, 0x34, 0x00, 0x01];
        message.extend((0u8..37).map(|n| n.wrapping_mul(7)));
        assert_eq!(checksum(&message), pnet::util::checksum(&message, 1));
    }

    proptest! {
        #[test]
        fn stored_checksum_verifies(mut data in proptest::collection::vec(any::<u8>(), 4..512)) {
            data[2] = 0;
            data[3] = 0;
            let sum = checksum(&data);
            data[2..4].copy_from_slice(&sum.to_be_bytes());
            prop_assert!(verify(&data));
        }
    }
}
