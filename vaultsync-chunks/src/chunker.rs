//! Deterministic content-defined chunk boundaries.
//!
//! A rolling sum over a small window decides where chunks end: when the
//! low bits of the sum hit a fixed mask past the minimum size, the chunk
//! closes. The boundary depends only on content, so an insertion early in
//! a file shifts at most the chunks around it while later chunks realign.

/// Default upper bound on chunk size (128 KiB).
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 128 * 1024;

/// Absolute lower bound on chunk size.
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Multiplier folding byte history into the rolling sum (Knuth's 2^32 / phi).
const FOLD: u32 = 2654435761;

/// Splits byte payloads at content-defined boundaries.
#[derive(Debug, Clone)]
pub struct Chunker {
    min_size: usize,
    max_size: usize,
    mask: u32,
}

impl Chunker {
    /// Creates a chunker. `max_chunk_size == 0` selects the default bound.
    pub fn new(max_chunk_size: usize) -> Self {
        let max_size = if max_chunk_size == 0 {
            DEFAULT_MAX_CHUNK_SIZE
        } else {
            max_chunk_size.max(MIN_CHUNK_SIZE * 2)
        };
        let min_size = (max_size / 8).max(MIN_CHUNK_SIZE);
        // Target roughly max/4 bytes per chunk: mask of the matching width.
        let target = (max_size / 4).max(MIN_CHUNK_SIZE);
        let mask = (target.next_power_of_two() as u32).saturating_sub(1);
        Self {
            min_size,
            max_size,
            mask,
        }
    }

    /// Splits `content` into chunks. Deterministic: identical input yields
    /// identical boundary offsets.
    pub fn split(&self, content: &[u8]) -> Vec<Vec<u8>> {
        if content.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut sum: u32 = 0;

        for (i, &byte) in content.iter().enumerate() {
            sum = sum.wrapping_add(byte as u32).wrapping_mul(FOLD);

            let len = i + 1 - start;
            let at_boundary = len >= self.min_size && (sum & self.mask) == self.mask;
            if at_boundary || len >= self.max_size {
                chunks.push(content[start..=i].to_vec());
                start = i + 1;
                sum = 0;
            }
        }

        if start < content.len() {
            chunks.push(content[start..].to_vec());
        }
        chunks
    }

    /// The configured maximum chunk size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_is_deterministic() {
        let chunker = Chunker::new(8 * 1024);
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(chunker.split(&content), chunker.split(&content));
    }

    #[test]
    fn chunks_concatenate_to_input() {
        let chunker = Chunker::new(4 * 1024);
        let content: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let joined: Vec<u8> = chunker.split(&content).concat();
        assert_eq!(joined, content);
    }

    #[test]
    fn respects_max_size() {
        let chunker = Chunker::new(4 * 1024);
        for chunk in chunker.split(&vec![0u8; 100_000]) {
            assert!(chunk.len() <= chunker.max_size());
        }
    }

    #[test]
    fn empty_input_has_no_chunks() {
        assert!(Chunker::default().split(&[]).is_empty());
    }

    #[test]
    fn small_input_is_one_chunk() {
        let chunks = Chunker::default().split(b"tiny");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], b"tiny");
    }
}
