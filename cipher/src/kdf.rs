use md5::{Digest, Md5};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::Algorithm;

const PBKDF2_ITERATIONS: u32 = 1000;
const OUTWARD_KEY_LEN: usize = 16;

/// Derives the 32-character outward key for a passphrase.
///
/// A passphrase of exactly 32 bytes is used verbatim. Anything else is run
/// through PBKDF2-HMAC-SHA256 with a per-algorithm salt and hex-encoded, so
/// the same passphrase yields unrelated keys for different algorithms.
pub fn derive_outward_key(password: &str, algorithm: Algorithm) -> String {
    if password.len() == 32 {
        return password.to_string();
    }
    let mut key = [0u8; OUTWARD_KEY_LEN];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        algorithm.kdf_salt(),
        PBKDF2_ITERATIONS,
        &mut key,
    );
    hex::encode(key)
}

/// Per-file key material: MD5 of the outward key concatenated with the
/// decimal file size. Both aesctr and rc4 key their streams with this.
pub fn file_key(passwd_outward: &str, file_size: u64) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(passwd_outward.as_bytes());
    hasher.update(file_size.to_string().as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outward_key_is_lowercase_hex() {
        let key = derive_outward_key("hunter2", Algorithm::AesCtr);
        assert_eq!(key.len(), 32);
        assert!(key
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn outward_key_is_deterministic() {
        let a = derive_outward_key("correct horse battery staple", Algorithm::Rc4);
        let b = derive_outward_key("correct horse battery staple", Algorithm::Rc4);
        assert_eq!(a, b);
    }

    #[test]
    fn thirty_two_byte_passphrase_is_used_verbatim() {
        let password = "0123456789abcdef0123456789abcdef";
        assert_eq!(password.len(), 32);
        for algorithm in [Algorithm::Mix, Algorithm::Rc4, Algorithm::AesCtr] {
            assert_eq!(derive_outward_key(password, algorithm), password);
        }
    }

    #[test]
    fn salts_separate_algorithms() {
        // 33 bytes, so the KDF path is taken.
        let password = "a-passphrase-of-thirty-three-byte";
        assert_eq!(password.len(), 33);
        let mix = derive_outward_key(password, Algorithm::Mix);
        let rc4 = derive_outward_key(password, Algorithm::Rc4);
        let aesctr = derive_outward_key(password, Algorithm::AesCtr);
        assert_ne!(mix, rc4);
        assert_ne!(mix, aesctr);
        assert_ne!(rc4, aesctr);
    }

    #[test]
    fn file_key_depends_on_size() {
        let outward = derive_outward_key("pw", Algorithm::AesCtr);
        assert_ne!(file_key(&outward, 10), file_key(&outward, 11));
        assert_eq!(file_key(&outward, 10), file_key(&outward, 10));
    }
}
