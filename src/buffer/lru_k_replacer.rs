use std::collections::{HashMap, VecDeque};

use crate::common::{FrameId, Timestamp};

use super::Replacer;

/// Tracks access history for a single frame
#[derive(Debug)]
struct FrameAccessInfo {
    /// History of access timestamps (most recent at back)
    history: VecDeque<Timestamp>,
    is_evictable: bool,
}

impl FrameAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Backward k-distance, or None (+inf) with fewer than k accesses.
    fn k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[self.history.len() - k])
        }
    }

    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

/// LRU-K replacement.
///
/// Evicts the evictable frame with the largest backward k-distance (time
/// since its k-th most recent access). Frames with fewer than k accesses
/// count as +inf and go first, oldest first access breaking ties. Pinning a
/// frame records an access.
pub struct LruKReplacer {
    k: usize,
    capacity: usize,
    current_timestamp: Timestamp,
    frame_info: HashMap<FrameId, FrameAccessInfo>,
    num_evictable: usize,
}

impl LruKReplacer {
    pub fn new(k: usize, capacity: usize) -> Self {
        Self {
            k: k.max(1),
            capacity,
            current_timestamp: 0,
            frame_info: HashMap::with_capacity(capacity),
            num_evictable: 0,
        }
    }

    /// Records an access to `frame_id` at the current logical time.
    pub fn record_access(&mut self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.capacity {
            return;
        }
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;
        self.frame_info
            .entry(frame_id)
            .or_insert_with(FrameAccessInfo::new)
            .record_access(timestamp, self.k);
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if frame_id.as_usize() >= self.capacity {
            return;
        }
        let info = self
            .frame_info
            .entry(frame_id)
            .or_insert_with(FrameAccessInfo::new);
        if info.is_evictable != evictable {
            info.is_evictable = evictable;
            if evictable {
                self.num_evictable += 1;
            } else {
                self.num_evictable -= 1;
            }
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

impl Replacer for LruKReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        if self.num_evictable == 0 {
            return None;
        }
        let now = self.current_timestamp;

        let mut victim: Option<(FrameId, Option<Timestamp>, Option<Timestamp>)> = None;
        for (&frame_id, info) in self.frame_info.iter().filter(|(_, i)| i.is_evictable) {
            let k_dist = info.k_distance(now, self.k);
            let earliest = info.earliest_timestamp();

            let replace = match victim {
                None => true,
                Some((_, v_dist, v_earliest)) => match (v_dist, k_dist) {
                    (None, Some(_)) => false,
                    (Some(_), None) => true,
                    (None, None) => match (v_earliest, earliest) {
                        (Some(v), Some(c)) => c < v,
                        (Some(_), None) => true,
                        _ => false,
                    },
                    (Some(v), Some(c)) => c > v,
                },
            };
            if replace {
                victim = Some((frame_id, k_dist, earliest));
            }
        }

        let (frame_id, _, _) = victim?;
        self.frame_info.remove(&frame_id);
        self.num_evictable -= 1;
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.record_access(frame_id);
        self.set_evictable(frame_id, false);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        self.set_evictable(frame_id, true);
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(info) = self.frame_info.remove(&frame_id) {
            if info.is_evictable {
                self.num_evictable -= 1;
            }
        }
    }

    fn size(&self) -> usize {
        self.num_evictable
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
