//! Small helpers shared across the engine.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

/// Fills a buffer with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Returns `size` cryptographically secure random bytes.
pub fn get_rand_bytes(size: usize) -> Vec<u8> {
    let mut bytes = vec![0_u8; size];
    fill_random(&mut bytes);
    bytes
}

/// Securely wipes a byte slice.
pub fn mem_clear(bytes: &mut [u8]) {
    bytes.zeroize();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rand_bytes_have_requested_length() {
        assert_eq!(get_rand_bytes(32).len(), 32);
        assert_eq!(get_rand_bytes(0).len(), 0);
    }

    #[test]
    fn mem_clear_zeroes() {
        let mut buf = get_rand_bytes(16);
        mem_clear(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
