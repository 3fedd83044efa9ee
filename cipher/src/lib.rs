//! Seekable stream ciphers for encrypting WebDAV payloads in place.
//!
//! Each engine derives its key material from a passphrase-derived outward
//! key plus the plaintext byte length of the file, and can reposition its
//! keystream to an arbitrary byte offset without processing the bytes
//! before it. That property is what makes HTTP range requests over
//! encrypted objects possible. Ciphertext length always equals plaintext
//! length; none of the engines authenticates data.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{de::Error as _, Deserialize, Serialize};
use thiserror::Error;

mod aes_ctr;
pub mod kdf;
mod mix;
mod rc4;

pub use aes_ctr::{AesCtr, AesCtrParams};
pub use mix::{Mix, MixParams};
pub use rc4::{Rc4, Rc4Params, SEGMENT_SIZE};

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("unknown encryption algorithm: {0}")]
    UnknownAlgorithm(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Mix,
    Rc4,
    AesCtr,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mix => "mix",
            Self::Rc4 => "rc4",
            Self::AesCtr => "aesctr",
        }
    }

    pub(crate) fn kdf_salt(self) -> &'static [u8] {
        match self {
            Self::Mix => b"MIX",
            Self::Rc4 => b"RC4",
            Self::AesCtr => b"AES-CTR",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mix" => Ok(Self::Mix),
            "rc4" => Ok(Self::Rc4),
            "aesctr" => Ok(Self::AesCtr),
            other => Err(CipherError::UnknownAlgorithm(other.into())),
        }
    }
}

impl Serialize for Algorithm {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(D::Error::custom)
    }
}

/// A seekable cipher stream owned by a single request for the duration of
/// one body transfer. Construction from cached parameters is cheap; nothing
/// here is shared, so repositioning and processing need no synchronization.
pub enum ContentCipher {
    AesCtr(AesCtr),
    Rc4(Rc4),
    Mix(Mix),
}

impl ContentCipher {
    /// Repositions the keystream so the next processed byte corresponds to
    /// the plaintext byte at `position`.
    pub fn set_position(&mut self, position: u64) {
        match self {
            Self::AesCtr(cipher) => cipher.set_position(position),
            Self::Rc4(cipher) => cipher.set_position(position),
            Self::Mix(cipher) => cipher.set_position(position),
        }
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        match self {
            Self::AesCtr(cipher) => cipher.process(data),
            Self::Rc4(cipher) => cipher.process(data),
            Self::Mix(cipher) => cipher.encrypt(data),
        }
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        match self {
            Self::AesCtr(cipher) => cipher.process(data),
            Self::Rc4(cipher) => cipher.process(data),
            Self::Mix(cipher) => cipher.decrypt(data),
        }
    }
}

/// Derived key material for one `(algorithm, file size)` pair. Deriving
/// runs the per-file hashes but not the passphrase KDF, which the factory
/// performs once.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CipherParams {
    AesCtr(AesCtrParams),
    Rc4(Rc4Params),
    Mix(MixParams),
}

impl CipherParams {
    fn derive(algorithm: Algorithm, passwd_outward: &str, file_size: u64) -> Self {
        match algorithm {
            Algorithm::AesCtr => Self::AesCtr(AesCtrParams::derive(passwd_outward, file_size)),
            Algorithm::Rc4 => Self::Rc4(Rc4Params::derive(passwd_outward, file_size)),
            Algorithm::Mix => Self::Mix(MixParams::derive(passwd_outward)),
        }
    }

    fn into_cipher(self) -> ContentCipher {
        match self {
            Self::AesCtr(params) => ContentCipher::AesCtr(AesCtr::new(&params)),
            Self::Rc4(params) => ContentCipher::Rc4(Rc4::new(&params)),
            Self::Mix(params) => ContentCipher::Mix(Mix::new(&params)),
        }
    }
}

/// Cache capacity; exceeding it clears the whole map on the next sweep.
/// Parameters rebuild in well under a millisecond, so eviction never
/// affects correctness.
pub const MAX_CACHED_PARAMS: usize = 1000;

/// Builds cipher streams for one configured `(passphrase, algorithm)`
/// pair. The outward key is derived once here; per-file parameters are
/// memoized by plaintext size. Every call hands out a fresh stream, so
/// concurrent requests never share mutable cipher state.
pub struct CipherFactory {
    algorithm: Algorithm,
    passwd_outward: String,
    params: Mutex<HashMap<u64, CipherParams>>,
}

impl CipherFactory {
    pub fn new(password: &str, algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            passwd_outward: kdf::derive_outward_key(password, algorithm),
            params: Mutex::new(HashMap::new()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Returns a cipher stream for a file of `file_size` plaintext bytes,
    /// positioned at offset zero.
    pub fn cipher(&self, file_size: u64) -> ContentCipher {
        let params = {
            let mut cache = self.params.lock().expect("cipher parameter cache poisoned");
            cache
                .entry(file_size)
                .or_insert_with(|| {
                    CipherParams::derive(self.algorithm, &self.passwd_outward, file_size)
                })
                .clone()
        };
        params.into_cipher()
    }

    /// Clears the parameter cache if it has grown past
    /// [`MAX_CACHED_PARAMS`], returning the number of evicted entries.
    /// Streams already handed out keep their parameters by value.
    pub fn sweep(&self) -> Option<usize> {
        let mut cache = self.params.lock().expect("cipher parameter cache poisoned");
        if cache.len() > MAX_CACHED_PARAMS {
            let evicted = cache.len();
            cache.clear();
            Some(evicted)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};

    const ALGORITHMS: [Algorithm; 3] = [Algorithm::Mix, Algorithm::Rc4, Algorithm::AesCtr];

    #[test]
    fn algorithm_parses_known_names() {
        assert_eq!("mix".parse::<Algorithm>().unwrap(), Algorithm::Mix);
        assert_eq!("rc4".parse::<Algorithm>().unwrap(), Algorithm::Rc4);
        assert_eq!("aesctr".parse::<Algorithm>().unwrap(), Algorithm::AesCtr);
        assert!(matches!(
            "des".parse::<Algorithm>(),
            Err(CipherError::UnknownAlgorithm(name)) if name == "des",
        ));
    }

    #[test]
    fn roundtrip_at_random_offsets() {
        let mut rng = rand::thread_rng();
        for algorithm in ALGORITHMS {
            let factory = CipherFactory::new("a shared passphrase", algorithm);
            for _ in 0..10 {
                let file_size = rng.gen_range(1..500_000u64);
                let len = rng.gen_range(0..=file_size.min(4096)) as usize;
                let position = rng.gen_range(0..=file_size - len as u64);

                let mut plaintext = vec![0u8; len];
                rng.fill_bytes(&mut plaintext);

                let mut enc = factory.cipher(file_size);
                enc.set_position(position);
                let mut data = plaintext.clone();
                enc.encrypt(&mut data);
                assert_eq!(data.len(), plaintext.len());

                let mut dec = factory.cipher(file_size);
                dec.set_position(position);
                dec.decrypt(&mut data);
                assert_eq!(
                    data, plaintext,
                    "{algorithm} roundtrip failed at position {position} of {file_size}",
                );
            }
        }
    }

    #[test]
    fn seek_equals_dummy_processing() {
        for algorithm in ALGORITHMS {
            let factory = CipherFactory::new("seek equivalence", algorithm);
            let file_size = 100_000;
            let position = 77_777usize;
            let payload = b"payload under test";

            let mut skipped = factory.cipher(file_size);
            skipped.set_position(0);
            let mut dummy = vec![0u8; position];
            skipped.encrypt(&mut dummy);
            let mut a = payload.to_vec();
            skipped.encrypt(&mut a);

            let mut seeked = factory.cipher(file_size);
            seeked.set_position(position as u64);
            let mut b = payload.to_vec();
            seeked.encrypt(&mut b);

            assert_eq!(a, b, "{algorithm} seek mismatch");
        }
    }

    #[test]
    fn zero_length_file() {
        for algorithm in ALGORITHMS {
            let factory = CipherFactory::new("pw", algorithm);
            let mut cipher = factory.cipher(0);
            cipher.set_position(0);
            let mut empty: [u8; 0] = [];
            cipher.encrypt(&mut empty);
        }
    }

    #[test]
    fn cached_params_produce_identical_streams() {
        let factory = CipherFactory::new("pw", Algorithm::AesCtr);
        let mut first = factory.cipher(1234);
        let mut second = factory.cipher(1234);
        first.set_position(100);
        second.set_position(100);
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        first.encrypt(&mut a);
        second.encrypt(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn sweep_clears_only_oversized_cache() {
        let factory = CipherFactory::new("pw", Algorithm::Rc4);
        for size in 0..10 {
            factory.cipher(size);
        }
        assert_eq!(factory.sweep(), None);

        for size in 0..=MAX_CACHED_PARAMS as u64 {
            factory.cipher(size);
        }
        assert_eq!(factory.sweep(), Some(MAX_CACHED_PARAMS + 1));
        // A cleared cache still serves ciphers.
        let mut cipher = factory.cipher(42);
        cipher.set_position(0);
        let mut data = [0u8; 4];
        cipher.encrypt(&mut data);
    }
}
