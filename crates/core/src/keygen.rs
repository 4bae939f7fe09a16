//! Employee key generation
//!
//! Keys are short mixed-case alphanumeric strings. Uniqueness is not
//! guaranteed by construction; callers retry on collision.

use rand::Rng;

/// Default length of generated employee ids
pub const DEFAULT_KEY_LEN: usize = 4;

const DIGITS: u32 = 10;
const LETTERS: u32 = 26;

/// Generate a random key of `len` characters drawn from `[0-9A-Za-z]`
pub fn generate_key(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let n = rng.gen_range(0..DIGITS + 2 * LETTERS);
            let byte = if n < DIGITS {
                b'0' + n as u8
            } else if n < DIGITS + LETTERS {
                b'A' + (n - DIGITS) as u8
            } else {
                b'a' + (n - DIGITS - LETTERS) as u8
            };
            byte as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length() {
        assert_eq!(generate_key(DEFAULT_KEY_LEN).len(), DEFAULT_KEY_LEN);
        assert_eq!(generate_key(16).len(), 16);
        assert!(generate_key(0).is_empty());
    }

    #[test]
    fn test_key_charset() {
        let key = generate_key(256);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
