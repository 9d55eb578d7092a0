//! Incremental SHA-1 content hashing, advisory for the optional `-c` flag.
//!
//! Recomputing a digest over the whole prefix on every append poll would be
//! quadratic in file size, so [`IncrementalSha1`] maintains a running digest
//! instead: `update` feeds new bytes into a live `sha1` context, and
//! [`IncrementalSha1::hex`] reads the current digest without consuming the
//! context (by cloning it), so the file tracker can keep hashing subsequent
//! appends.
//!
//! Full recomputation from scratch is still needed, but only for the two
//! genuine "the prefix is no longer trustworthy" events: truncation, and an
//! mtime change with no append in flight. Those paths use [`digest_hex`]
//! directly.

use digest::Digest;

/// A live, incrementally updatable SHA-1 context.
#[derive(Clone)]
pub struct IncrementalSha1 {
    inner: sha1::Sha1,
}

impl Default for IncrementalSha1 {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalSha1 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: sha1::Sha1::new(),
        }
    }

    /// Feeds additional bytes into the running digest.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Returns the digest of everything hashed so far, as lowercase hex,
    /// without consuming the context.
    #[must_use]
    pub fn hex(&self) -> String {
        encode_hex(&self.inner.clone().finalize())
    }

    /// Replaces the context with a fresh empty one, used when a watched
    /// file's prefix is invalidated (truncation or replacement).
    pub fn reset(&mut self) {
        self.inner = sha1::Sha1::new();
    }
}

/// Computes the SHA-1 digest of `data` in one shot, as lowercase hex.
#[must_use]
pub fn digest_hex(data: &[u8]) -> String {
    encode_hex(&sha1::Sha1::digest(data))
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot_digest() {
        let mut hasher = IncrementalSha1::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.hex(), digest_hex(b"hello world"));
    }

    #[test]
    fn hex_can_be_read_mid_stream_without_finalizing() {
        let mut hasher = IncrementalSha1::new();
        hasher.update(b"abc");
        let mid = hasher.hex();
        hasher.update(b"def");
        let end = hasher.hex();
        assert_eq!(mid, digest_hex(b"abc"));
        assert_eq!(end, digest_hex(b"abcdef"));
    }

    #[test]
    fn reset_clears_accumulated_state() {
        let mut hasher = IncrementalSha1::new();
        hasher.update(b"stale prefix");
        hasher.reset();
        hasher.update(b"fresh");
        assert_eq!(hasher.hex(), digest_hex(b"fresh"));
    }

    #[test]
    fn empty_digest_matches_known_sha1_of_empty_input() {
        assert_eq!(
            digest_hex(b""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }
}
