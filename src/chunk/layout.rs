//! Little-endian field access for fixed-width chunk layouts
//!
//! The delta and double-delta encodings keep their samples in a flat byte
//! buffer; these helpers read and write individual fields at byte offsets.
//! Callers are responsible for bounds: offsets come from validated headers.

pub(crate) fn get_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn get_i32(buf: &[u8], at: usize) -> i32 {
    get_u32(buf, at) as i32
}

pub(crate) fn get_i64(buf: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(bytes)
}

pub(crate) fn put_i64(buf: &mut [u8], at: usize, v: i64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn get_f64(buf: &[u8], at: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    f64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_round_trip() {
        let mut buf = vec![0u8; 32];

        put_u16(&mut buf, 0, 0xBEEF);
        put_i64(&mut buf, 2, -1234567890123);
        buf[10..18].copy_from_slice(&7.25f64.to_le_bytes());
        buf[18..22].copy_from_slice(&(-42i32).to_le_bytes());

        assert_eq!(get_u16(&buf, 0), 0xBEEF);
        assert_eq!(get_i64(&buf, 2), -1234567890123);
        assert_eq!(get_f64(&buf, 10), 7.25);
        assert_eq!(get_i32(&buf, 18), -42);
    }
}
