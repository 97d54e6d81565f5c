use std::collections::{BTreeMap, HashMap};

use crate::common::FrameId;

use super::Replacer;

/// Least-recently-unpinned replacement.
///
/// Every unpin stamps the frame with an increasing sequence number; the
/// victim is the evictable frame with the smallest stamp.
pub struct LruReplacer {
    capacity: usize,
    next_seq: u64,
    /// Unpin order: sequence number -> frame
    order: BTreeMap<u64, FrameId>,
    /// Evictable frames and their sequence number
    frames: HashMap<FrameId, u64>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_seq: 0,
            order: BTreeMap::new(),
            frames: HashMap::with_capacity(capacity),
        }
    }
}

impl Replacer for LruReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.order.pop_first()?;
        self.frames.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        if let Some(seq) = self.frames.remove(&frame_id) {
            self.order.remove(&seq);
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.capacity || self.frames.contains_key(&frame_id) {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, frame_id);
        self.frames.insert(frame_id, seq);
    }

    fn size(&self) -> usize {
        self.frames.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(id: u32) -> FrameId {
        FrameId::new(id)
    }

    #[test]
    fn test_lru_victim_order() {
        let mut replacer = LruReplacer::new(7);

        for i in 1..=6 {
            replacer.unpin(fid(i));
        }
        // Re-unpinning an evictable frame keeps its place
        replacer.unpin(fid(1));
        assert_eq!(replacer.size(), 6);

        assert_eq!(replacer.victim(), Some(fid(1)));
        assert_eq!(replacer.victim(), Some(fid(2)));
        assert_eq!(replacer.victim(), Some(fid(3)));

        replacer.pin(fid(3));
        replacer.pin(fid(4));
        assert_eq!(replacer.size(), 2);

        replacer.unpin(fid(4));
        assert_eq!(replacer.victim(), Some(fid(5)));
        assert_eq!(replacer.victim(), Some(fid(6)));
        assert_eq!(replacer.victim(), Some(fid(4)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_ignores_out_of_range_frames() {
        let mut replacer = LruReplacer::new(2);
        replacer.unpin(fid(5));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.capacity(), 2);
    }
}
