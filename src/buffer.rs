use std::collections::VecDeque;

/// One unit of data moving through a pipeline.
pub type Chunk = Vec<u8>;

/// An ordered, size-accounted FIFO of pending chunks.
///
/// Exclusively owned by one stream side. The accounted total always equals
/// the sum of the buffered chunk lengths; a dequeued chunk is gone.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: VecDeque<Chunk>,
    total: usize,
}

impl ChunkBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            total: 0,
        }
    }

    /// Append a chunk; returns the new accounted total
    pub fn push(&mut self, chunk: Chunk) -> usize {
        self.total += chunk.len();
        self.chunks.push_back(chunk);
        self.total
    }

    /// Remove and return up to `max` bytes reassembled from the front, or
    /// everything buffered when `max` is `None`. Returns `None` when the
    /// buffer is empty. A chunk straddling the limit is split and its tail
    /// stays buffered.
    pub fn pop(&mut self, max: Option<usize>) -> Option<Chunk> {
        let want = max.unwrap_or(self.total);
        if want == 0 {
            return None;
        }
        let mut out = self.chunks.pop_front()?;
        if out.len() > want {
            let rest = out.split_off(want);
            self.chunks.push_front(rest);
        } else {
            while out.len() < want {
                let Some(mut next) = self.chunks.pop_front() else {
                    break;
                };
                let room = want - out.len();
                if next.len() > room {
                    let rest = next.split_off(room);
                    self.chunks.push_front(rest);
                    out.extend_from_slice(&next);
                    break;
                }
                out.append(&mut next);
            }
        }
        self.total -= out.len();
        Some(out)
    }

    /// Dequeue the front chunk whole
    pub fn pop_chunk(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop_front()?;
        self.total -= chunk.len();
        Some(chunk)
    }

    /// Current accounted size in bytes
    pub fn peek_size(&self) -> usize {
        self.total
    }

    /// Number of buffered chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_accounts_size() {
        let mut buffer = ChunkBuffer::new();
        assert_eq!(buffer.push(b"abc".to_vec()), 3);
        assert_eq!(buffer.push(b"de".to_vec()), 5);
        assert_eq!(buffer.peek_size(), 5);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_pop_all_reassembles_in_order() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(b"pre".to_vec());
        buffer.push(b"push".to_vec());
        assert_eq!(buffer.pop(None), Some(b"prepush".to_vec()));
        assert_eq!(buffer.pop(None), None);
        assert_eq!(buffer.peek_size(), 0);
    }

    #[test]
    fn test_pop_splits_boundary_chunk() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(b"hello".to_vec());
        buffer.push(b"world".to_vec());
        assert_eq!(buffer.pop(Some(7)), Some(b"hellowo".to_vec()));
        assert_eq!(buffer.peek_size(), 3);
        assert_eq!(buffer.pop(None), Some(b"rld".to_vec()));
    }

    #[test]
    fn test_conservation() {
        let mut buffer = ChunkBuffer::new();
        let mut pushed = 0usize;
        for chunk in [&b"a"[..], b"bb", b"ccc", b"dddd"] {
            pushed = buffer.push(chunk.to_vec());
        }
        let mut popped = 0usize;
        while let Some(chunk) = buffer.pop(Some(3)) {
            popped += chunk.len();
        }
        assert_eq!(popped + buffer.peek_size(), pushed);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_pop_chunk_keeps_granularity() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(b"one".to_vec());
        buffer.push(b"two".to_vec());
        assert_eq!(buffer.pop_chunk(), Some(b"one".to_vec()));
        assert_eq!(buffer.peek_size(), 3);
        assert_eq!(buffer.pop_chunk(), Some(b"two".to_vec()));
        assert_eq!(buffer.pop_chunk(), None);
    }
}
