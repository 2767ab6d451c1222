use crate::hash::dir_index;
use crate::*;

#[test]
fn known_values() {
    assert_eq!(hash(b""), 0x3039);
    assert_eq!(hash(b"a"), 0x094a_72e9);
    assert_eq!(hash(b"b"), 0x4b10_c154);
    assert_eq!(hash(b"c"), 0x0cd7_0fbf);
    assert_eq!(hash(b"hello"), 0x6725_5f4a);
}

#[test]
fn high_bytes_are_sign_extended() {
    // 0xFF contributes -1, not 255.
    assert_eq!(hash(&[0xff]), 0x5b60_6df3);
    assert_ne!(hash(&[0xff]), 0x21ae_d8f3);
    assert_eq!(hash(b"\x80abc"), 0x67ae_54ad);
}

#[test]
fn always_31_bits() {
    for len in 0..64usize {
        let key: Vec<u8> = (0..len).map(|i| (i * 37 + 200) as u8).collect();
        assert!(hash(&key) <= 0x7FFF_FFFF);
    }
}

#[test]
fn dir_index_uses_top_bits() {
    assert_eq!(dir_index(0x7FFF_FFFF, 0), 0);
    assert_eq!(dir_index(0x7FFF_FFFF, 1), 1);
    assert_eq!(dir_index(0x4000_0000, 1), 1);
    assert_eq!(dir_index(0x3FFF_FFFF, 1), 0);
    assert_eq!(dir_index(hash(b"b"), 3), 4);
    assert_eq!(dir_index(0x7FFF_FFFF, 31), 0x7FFF_FFFF);
}
