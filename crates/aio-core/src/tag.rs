//! Opaque application tag.
//!
//! Copied by value at submit time, handed back to the callback unchanged.
//! The engine never inspects its bits (spec: "the engine inspects no
//! bits"). Fixed-size so it can live inline in an IOCB without an
//! allocation.

/// Maximum tag length in bytes, matching `MAX_AIO_USERDATA_LEN` in the
/// original `aiocb_cache.h` family of headers.
pub const MAX_TAG_LEN: usize = 40;

#[derive(Debug, Clone, Copy)]
pub struct Tag {
    bytes: [u8; MAX_TAG_LEN],
    len: u8,
}

impl Tag {
    /// Copies `data` into a fixed-size tag. `data.len()` must be
    /// `<= MAX_TAG_LEN`; longer tags are truncated defensively rather than
    /// panicking, since tag length is caller-controlled, not a backend
    /// invariant.
    pub fn from_bytes(data: &[u8]) -> Self {
        let len = data.len().min(MAX_TAG_LEN);
        let mut bytes = [0u8; MAX_TAG_LEN];
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Tag {
    fn default() -> Self {
        Self {
            bytes: [0u8; MAX_TAG_LEN],
            len: 0,
        }
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Tag {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_short_tag() {
        let t = Tag::from_bytes(&42u64.to_le_bytes());
        assert_eq!(t.as_slice(), &42u64.to_le_bytes());
        assert_eq!(t.len(), 8);
    }

    #[test]
    fn truncates_oversized_tag() {
        let data = [7u8; 64];
        let t = Tag::from_bytes(&data);
        assert_eq!(t.len(), MAX_TAG_LEN);
        assert_eq!(t.as_slice(), &[7u8; MAX_TAG_LEN][..]);
    }

    #[test]
    fn empty_tag_round_trips() {
        let t = Tag::default();
        assert!(t.is_empty());
        assert_eq!(t.as_slice(), &[] as &[u8]);
    }
}
