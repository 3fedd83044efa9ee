use crate::kdf;

/// Plaintext span covered by a single key schedule. Every segment re-keys
/// the S-box from the file key mixed with the segment's byte offset, which
/// bounds the cost of seeking into large files.
pub const SEGMENT_SIZE: u64 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rc4Params {
    file_key: [u8; 16],
}

impl Rc4Params {
    pub fn derive(passwd_outward: &str, file_size: u64) -> Self {
        Self {
            file_key: kdf::file_key(passwd_outward, file_size),
        }
    }
}

/// Segmented RC4. The keystream restarts from a fresh key schedule at every
/// `SEGMENT_SIZE` boundary of the plaintext, so `set_position` costs at most
/// one KSA plus `position % SEGMENT_SIZE` discarded PRGA steps.
pub struct Rc4 {
    file_key: [u8; 16],
    sbox: [u8; 256],
    i: u8,
    j: u8,
    position: u64,
}

impl Rc4 {
    pub fn new(params: &Rc4Params) -> Self {
        let mut cipher = Self {
            file_key: params.file_key,
            sbox: [0; 256],
            i: 0,
            j: 0,
            position: 0,
        };
        cipher.reset_ksa();
        cipher
    }

    /// Key schedule for the segment containing the current position. The
    /// 4-byte big-endian encoding of the segment's byte offset (mod 2^32)
    /// is XORed into the last four key bytes before the KSA runs.
    fn reset_ksa(&mut self) {
        let offset = (self.position / SEGMENT_SIZE) * SEGMENT_SIZE;
        let mut key = self.file_key;
        let mix = (offset as u32).to_be_bytes();
        for (byte, mask) in key[12..].iter_mut().zip(mix) {
            *byte ^= mask;
        }

        for (index, slot) in self.sbox.iter_mut().enumerate() {
            *slot = index as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j
                .wrapping_add(self.sbox[i])
                .wrapping_add(key[i % key.len()]);
            self.sbox.swap(i, j as usize);
        }
        self.i = 0;
        self.j = 0;
    }

    pub fn set_position(&mut self, position: u64) {
        self.position = position;
        self.reset_ksa();
        // Advance the PRGA without producing output.
        for _ in 0..(position % SEGMENT_SIZE) {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.sbox[self.i as usize]);
            self.sbox.swap(self.i as usize, self.j as usize);
        }
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.sbox[self.i as usize]);
        self.sbox.swap(self.i as usize, self.j as usize);
        let index = self.sbox[self.i as usize].wrapping_add(self.sbox[self.j as usize]);
        self.sbox[index as usize]
    }

    pub fn process(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.next_byte();
            self.position += 1;
            if self.position % SEGMENT_SIZE == 0 {
                self.reset_ksa();
            }
        }
    }
}
