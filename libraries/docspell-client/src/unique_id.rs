//! Docspell-style opaque identifiers.
//!
//! Ids are random bytes rendered in base-58 and split into fixed-size,
//! hyphen-separated segments, e.g. `7DRnuarqeVc-9QTFof7pocU-VSsreZ2k5oh-zebbFYMnwRQ`.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

pub const DEFAULT_BYTES: usize = 32;
pub const DEFAULT_SEGMENT_LEN: usize = 11;
pub const DEFAULT_SEPARATOR: &str = "-";

/// Generate a random id with the default shape.
pub fn make_unique_id() -> String {
    UniqueIdBuilder::new().build()
}

/// Builder for ids with a custom shape or a fixed seed.
#[derive(Debug, Clone)]
pub struct UniqueIdBuilder {
    seed: Option<u64>,
    bytes: usize,
    segment_len: usize,
    separator: String,
}

impl Default for UniqueIdBuilder {
    fn default() -> Self {
        Self {
            seed: None,
            bytes: DEFAULT_BYTES,
            segment_len: DEFAULT_SEGMENT_LEN,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl UniqueIdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the id from a seed; the same seed always yields the same id.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn bytes(mut self, bytes: usize) -> Self {
        self.bytes = bytes;
        self
    }

    /// Segment length; 0 disables segmentation.
    pub fn segment_len(mut self, segment_len: usize) -> Self {
        self.segment_len = segment_len;
        self
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn build(&self) -> String {
        let mut raw = vec![0u8; self.bytes];
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed).fill_bytes(&mut raw),
            None => rand::thread_rng().fill_bytes(&mut raw),
        }

        let encoded = bs58::encode(raw).into_string();
        if self.segment_len == 0 {
            return encoded;
        }

        // base-58 output is ASCII, so byte chunks are char chunks
        encoded
            .as_bytes()
            .chunks(self.segment_len)
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(self.separator.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

    #[test]
    fn test_default_shape() {
        let id = make_unique_id();
        let segments: Vec<&str> = id.split('-').collect();

        assert!(segments.len() >= 4);
        let (last, full) = segments.split_last().unwrap();
        assert!(full.iter().all(|s| s.len() == DEFAULT_SEGMENT_LEN));
        assert!(!last.is_empty() && last.len() <= DEFAULT_SEGMENT_LEN);
        assert!(id.chars().all(|c| c == '-' || ALPHABET.contains(c)));
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = UniqueIdBuilder::new().seed(42).build();
        let b = UniqueIdBuilder::new().seed(42).build();
        let c = UniqueIdBuilder::new().seed(43).build();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(make_unique_id(), make_unique_id());
    }

    #[test]
    fn test_custom_shape() {
        let id = UniqueIdBuilder::new()
            .seed(7)
            .bytes(8)
            .segment_len(4)
            .separator("_")
            .build();

        assert!(id.split('_').all(|s| s.len() <= 4));
        assert!(id.contains('_'));
    }

    #[test]
    fn test_unsegmented() {
        let id = UniqueIdBuilder::new().seed(1).segment_len(0).build();
        assert!(!id.contains('-'));
        assert_eq!(bs58::decode(&id).into_vec().unwrap().len(), DEFAULT_BYTES);
    }
}
