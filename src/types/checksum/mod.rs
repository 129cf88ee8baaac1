#![forbid(unsafe_code)]

/// Incremental checksum over a byte stream.
pub trait Checksum {
    /// Discards all input seen so far.
    fn reset(&mut self);
    /// Feeds more input.
    fn update(&mut self, bytes: &[u8]);
    /// Checksum of the input so far.
    fn finalize(&self) -> u64;
}

/// XOR of consecutive little-endian 8-byte words.
///
/// Input is consumed as one continuous stream, so a word may straddle two
/// `update` calls. A trailing partial word is zero-padded on `finalize`.
#[derive(Clone, Debug, Default)]
pub struct XorWords {
    acc: u64,
    pending: [u8; 8],
    pending_len: usize,
}

impl Checksum for XorWords {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, mut bytes: &[u8]) {
        if self.pending_len > 0 {
            let take = (8 - self.pending_len).min(bytes.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&bytes[..take]);
            self.pending_len += take;
            bytes = &bytes[take..];
            if self.pending_len < 8 {
                return;
            }
            self.acc ^= u64::from_le_bytes(self.pending);
            self.pending_len = 0;
        }
        let mut words = bytes.chunks_exact(8);
        for word in &mut words {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(word);
            self.acc ^= u64::from_le_bytes(buf);
        }
        let rest = words.remainder();
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    fn finalize(&self) -> u64 {
        if self.pending_len == 0 {
            return self.acc;
        }
        let mut tail = [0u8; 8];
        tail[..self.pending_len].copy_from_slice(&self.pending[..self.pending_len]);
        self.acc ^ u64::from_le_bytes(tail)
    }
}

/// One-shot [`XorWords`] over `bytes`.
pub fn xor_words(bytes: &[u8]) -> u64 {
    let mut hasher = XorWords::default();
    hasher.update(bytes);
    hasher.finalize()
}
