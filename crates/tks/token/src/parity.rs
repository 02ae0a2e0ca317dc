//! DES key parity

/// Force odd parity on every byte of a DES key
///
/// Bytes with an even number of set bits have their low bit flipped. DES ignores the low bit of
/// each key byte, so the adjustment never changes cipher output.
pub fn set_odd_parity(bytes: &mut [u8]) {
    for byte in bytes.iter_mut() {
        if byte.count_ones() % 2 == 0 {
            *byte ^= 0x01;
        }
    }
}
