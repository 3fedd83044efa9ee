use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use md5::{Digest, Md5};

use crate::kdf;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Derived key material for the aesctr engine: the AES-128 key and the
/// initial counter block, both functions of the outward key and file size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesCtrParams {
    key: [u8; 16],
    source_iv: [u8; 16],
}

impl AesCtrParams {
    pub fn derive(passwd_outward: &str, file_size: u64) -> Self {
        let key = kdf::file_key(passwd_outward, file_size);
        let source_iv: [u8; 16] = Md5::digest(file_size.to_string().as_bytes()).into();
        Self { key, source_iv }
    }
}

/// AES-128-CTR over a 128-bit big-endian counter block.
///
/// Streaming uses the standard counter increment; only `set_position`
/// recomputes the counter, using the split-carry scheme of `advance_iv`.
/// Existing stored data depends on that scheme, so it must not be replaced
/// with a plain 128-bit addition.
pub struct AesCtr {
    key: [u8; 16],
    source_iv: [u8; 16],
    stream: Aes128Ctr,
}

impl AesCtr {
    pub fn new(params: &AesCtrParams) -> Self {
        let stream = Aes128Ctr::new(&params.key.into(), &params.source_iv.into());
        Self {
            key: params.key,
            source_iv: params.source_iv,
            stream,
        }
    }

    pub fn set_position(&mut self, position: u64) {
        let mut iv = self.source_iv;
        advance_iv(&mut iv, position / 16);
        self.stream = Aes128Ctr::new(&self.key.into(), &iv.into());
        let offset = (position % 16) as usize;
        if offset > 0 {
            let mut dummy = [0u8; 16];
            self.stream.apply_keystream(&mut dummy[..offset]);
        }
    }

    pub fn process(&mut self, data: &mut [u8]) {
        self.stream.apply_keystream(data);
    }
}

const MAX_UINT32: i128 = 0xffff_ffff;

/// Adds `blocks` to the counter block in four 32-bit big-endian lanes,
/// walking from the least-significant lane upward.
///
/// Every division and modulus uses 2^32 - 1, not 2^32, and intermediate
/// lane values may go negative before being truncated back to u32.
/// Files already stored by existing clients were positioned with exactly
/// this arithmetic, so it must not be replaced with a plain 128-bit
/// addition; for counters that never push a lane past 0xffff_ffff the two
/// coincide.
fn advance_iv(iv: &mut [u8; 16], blocks: u64) {
    let increment = blocks as i128;
    let big = increment / MAX_UINT32;
    let little = (increment % MAX_UINT32) - big;

    let mut overflow: i128 = 0;
    for idx in 0..4 {
        let pos = 12 - idx * 4;
        let lane: [u8; 4] = iv[pos..pos + 4].try_into().expect("lane is 4 bytes");
        let mut num = i128::from(u32::from_be_bytes(lane)) + overflow;
        if idx == 0 {
            num += little;
        }
        if idx == 1 {
            num += big;
        }
        let carry = num / MAX_UINT32;
        let value = (num % MAX_UINT32) - carry;
        overflow = carry;
        iv[pos..pos + 4].copy_from_slice(&(value as u32).to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_outward_key;
    use crate::Algorithm;

    fn cipher(password: &str, file_size: u64) -> AesCtr {
        let outward = derive_outward_key(password, Algorithm::AesCtr);
        AesCtr::new(&AesCtrParams::derive(&outward, file_size))
    }

    #[test]
    fn advance_by_small_count() {
        let mut iv = [0u8; 16];
        advance_iv(&mut iv, 5);
        let mut expected = [0u8; 16];
        expected[15] = 5;
        assert_eq!(iv, expected);
    }

    #[test]
    fn advance_carries_one_early() {
        // The low lane saturates at 0xffff_ffff (not 2^32), so adding one
        // block to 0xff_ff_ff_fe already carries into the next lane.
        let mut iv = [0u8; 16];
        iv[12..].copy_from_slice(&0xffff_fffe_u32.to_be_bytes());
        advance_iv(&mut iv, 1);
        let mut expected = [0u8; 16];
        expected[8..12].copy_from_slice(&1u32.to_be_bytes());
        expected[12..].copy_from_slice(&0xffff_ffff_u32.to_be_bytes());
        assert_eq!(iv, expected);
    }

    #[test]
    fn advance_splits_big_and_little() {
        let mut iv = [0u8; 16];
        advance_iv(&mut iv, 0xffff_ffff);
        let mut expected = [0u8; 16];
        expected[8..12].copy_from_slice(&1u32.to_be_bytes());
        expected[12..].copy_from_slice(&0xffff_ffff_u32.to_be_bytes());
        assert_eq!(iv, expected);

        let mut iv = [0u8; 16];
        advance_iv(&mut iv, 1 << 32);
        let mut expected = [0u8; 16];
        expected[8..12].copy_from_slice(&1u32.to_be_bytes());
        assert_eq!(iv, expected);
    }

    #[test]
    fn roundtrip_at_origin() {
        let plaintext = b"0123456789".to_vec();
        let mut enc = cipher("correct horse battery staple", 10);
        enc.set_position(0);
        let mut data = plaintext.clone();
        enc.process(&mut data);
        assert_ne!(data, plaintext);
        assert_eq!(data.len(), plaintext.len());

        let mut dec = cipher("correct horse battery staple", 10);
        dec.set_position(0);
        dec.process(&mut data);
        assert_eq!(data, plaintext);
    }

    #[test]
    fn seek_matches_streaming() {
        let file_size: u64 = 1 << 20;
        let mut streamed = cipher("seek test", file_size);
        streamed.set_position(0);
        let mut keystream = vec![0u8; 1_048_576];
        streamed.process(&mut keystream);

        for position in [0u64, 1, 15, 16, 17, 4096, 1_048_000] {
            let mut seeked = cipher("seek test", file_size);
            seeked.set_position(position);
            let mut tail = vec![0u8; 64.min(keystream.len() - position as usize)];
            seeked.process(&mut tail);
            assert_eq!(
                tail,
                &keystream[position as usize..position as usize + tail.len()],
                "keystream mismatch at position {position}",
            );
        }
    }

    #[test]
    fn chunked_processing_matches_whole() {
        let mut whole = cipher("chunks", 1000);
        whole.set_position(0);
        let mut a = vec![7u8; 1000];
        whole.process(&mut a);

        let mut chunked = cipher("chunks", 1000);
        chunked.set_position(0);
        let mut b = vec![7u8; 1000];
        for chunk in b.chunks_mut(33) {
            chunked.process(chunk);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_sizes_produce_distinct_keystreams() {
        let mut a = cipher("pw", 100);
        let mut b = cipher("pw", 101);
        a.set_position(0);
        b.set_position(0);
        let mut ka = [0u8; 32];
        let mut kb = [0u8; 32];
        a.process(&mut ka);
        b.process(&mut kb);
        assert_ne!(ka, kb);
    }

    #[test]
    fn empty_buffer_is_a_no_op() {
        let mut c = cipher("pw", 0);
        c.set_position(0);
        let mut empty: [u8; 0] = [];
        c.process(&mut empty);
    }
}
