use sha2::{Digest, Sha256};

const TABLE_LEN: usize = 32;

/// Substitution tables for the mix engine. The encode table is
/// SHA-256(outward key); the decode table is built so that for every byte
/// `b`, `D[(b ^ E[b % 32]) % 32] == E[b % 32]`. Collisions during
/// construction rewrite the colliding encode entry into a free slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixParams {
    encode: [u8; TABLE_LEN],
    decode: [u8; TABLE_LEN],
}

impl MixParams {
    pub fn derive(passwd_outward: &str) -> Self {
        let mut encode: [u8; TABLE_LEN] = Sha256::digest(passwd_outward.as_bytes()).into();
        let mut decode = [0u8; TABLE_LEN];
        let mut taken = [false; TABLE_LEN];

        for i in 0..TABLE_LEN {
            let slot = ((encode[i] ^ i as u8) % TABLE_LEN as u8) as usize;
            if !taken[slot] {
                decode[slot] = encode[i];
                taken[slot] = true;
            } else if let Some(free) = taken.iter().position(|used| !used) {
                encode[i] = (encode[i] & TABLE_LEN as u8) | (free as u8 ^ i as u8);
                decode[free] = encode[i];
                taken[free] = true;
            }
        }

        Self { encode, decode }
    }
}

/// Byte-local substitution cipher. It has no keystream position, so
/// `set_position` is a no-op; it is retained only for compatibility with
/// data written by existing deployments and offers the weakest protection
/// of the three engines.
pub struct Mix {
    encode: [u8; TABLE_LEN],
    decode: [u8; TABLE_LEN],
}

impl Mix {
    pub fn new(params: &MixParams) -> Self {
        Self {
            encode: params.encode,
            decode: params.decode,
        }
    }

    pub fn set_position(&mut self, _position: u64) {}

    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut().rev() {
            *byte ^= self.encode[(*byte % TABLE_LEN as u8) as usize];
        }
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut().rev() {
            *byte ^= self.decode[(*byte % TABLE_LEN as u8) as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_outward_key;
    use crate::Algorithm;

    fn cipher(password: &str) -> Mix {
        let outward = derive_outward_key(password, Algorithm::Mix);
        Mix::new(&MixParams::derive(&outward))
    }

    #[test]
    fn abcd_roundtrip() {
        let mut mix = cipher("secret");
        let mut data = b"ABCD".to_vec();
        mix.encrypt(&mut data);
        assert_ne!(data, b"ABCD");
        mix.decrypt(&mut data);
        assert_eq!(data, b"ABCD");
    }

    #[test]
    fn every_byte_value_roundtrips() {
        for password in ["a", "longer passphrase with spaces", "0123456789abcdef"] {
            let mut mix = cipher(password);
            let mut data: Vec<u8> = (0..=255).collect();
            let original = data.clone();
            mix.encrypt(&mut data);
            mix.decrypt(&mut data);
            assert_eq!(data, original, "roundtrip failed for password {password:?}");
        }
    }

    #[test]
    fn position_does_not_affect_output() {
        let mut a = cipher("pw");
        let mut b = cipher("pw");
        b.set_position(123_456);
        let mut data_a = b"same bytes".to_vec();
        let mut data_b = b"same bytes".to_vec();
        a.encrypt(&mut data_a);
        b.encrypt(&mut data_b);
        assert_eq!(data_a, data_b);
    }
}
