use sha2::{Digest as ShaDigest, Sha512};

pub type Digest = [u8; 64];

pub trait Hashable {
    fn hash(&self) -> Digest;
}

pub fn sha512(bytes: &[u8]) -> Digest {
    let mut hasher = Sha512::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut digest = [0u8; 64];
    digest.copy_from_slice(&result[..]);
    digest
}

/// First eight bytes of a digest as lowercase hex, enough to tell payloads apart in logs.
pub fn short_hex(digest: &Digest) -> String {
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha512_is_deterministic() {
        let first = sha512(b"hello");
        let second = sha512(b"hello");
        let other = sha512(b"world");

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn test_short_hex() {
        let mut digest = [0u8; 64];
        digest[0] = 0xab;
        digest[7] = 0x01;
        digest[8] = 0xff;

        assert_eq!(short_hex(&digest), "ab00000000000001");
    }
}
