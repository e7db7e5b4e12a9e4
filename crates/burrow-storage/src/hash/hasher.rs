//! Key hashing for the extendible hash index.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use burrow_common::types::FixedCodec;

/// Hashes keys down to the 32 bits the directory indexes by.
pub trait KeyHasher<K>: Clone + Send + Sync {
    /// Returns the 32-bit hash of `key`.
    fn hash32(&self, key: &K) -> u32;
}

// Fixed keys so the directory layout is deterministic across runs; the
// on-disk image depends on where every key hashed.
const SIP_KEY_0: u64 = 0x5b60_31a1_9c8e_f2d4;
const SIP_KEY_1: u64 = 0x88b5_62dc_36ae_071c;

/// Default hasher: SipHash-1-3 over the key's encoded bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SipKeyHasher;

impl SipKeyHasher {
    /// Creates the default hasher.
    pub fn new() -> Self {
        Self
    }
}

impl<K: FixedCodec> KeyHasher<K> for SipKeyHasher {
    fn hash32(&self, key: &K) -> u32 {
        let mut buf = [0u8; 64];
        assert!(
            K::ENCODED_SIZE <= buf.len(),
            "key encoding too wide to hash on the stack"
        );
        key.encode_into(&mut buf[..K::ENCODED_SIZE]);

        let mut hasher = SipHasher13::new_with_keys(SIP_KEY_0, SIP_KEY_1);
        hasher.write(&buf[..K::ENCODED_SIZE]);
        hasher.finish() as u32
    }
}
