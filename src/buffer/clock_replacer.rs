use std::collections::HashMap;

use crate::common::FrameId;

use super::Replacer;

#[derive(Debug, Clone, Copy)]
struct ClockSlot {
    frame_id: FrameId,
    referenced: bool,
}

/// Clock (second chance) replacement.
///
/// Evictable frames sit in a fixed ring of `capacity` slots. An unpinned
/// frame takes the first empty slot with its reference bit set. The hand
/// clears set bits as it sweeps and evicts the first occupied slot whose
/// bit is already clear, then moves past it.
pub struct ClockReplacer {
    ring: Vec<Option<ClockSlot>>,
    hand: usize,
    /// Ring slot of every evictable frame
    slots: HashMap<FrameId, usize>,
}

impl ClockReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: vec![None; capacity],
            hand: 0,
            slots: HashMap::with_capacity(capacity),
        }
    }

    fn advance(&mut self) {
        self.hand = (self.hand + 1) % self.ring.len();
    }
}

impl Replacer for ClockReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        if self.slots.is_empty() {
            return None;
        }

        // Terminates within two sweeps: the first clears every bit
        loop {
            let index = self.hand;
            self.advance();
            match &mut self.ring[index] {
                Some(slot) if slot.referenced => slot.referenced = false,
                Some(slot) => {
                    let frame_id = slot.frame_id;
                    self.ring[index] = None;
                    self.slots.remove(&frame_id);
                    return Some(frame_id);
                }
                None => {}
            }
        }
    }

    fn pin(&mut self, frame_id: FrameId) {
        if let Some(index) = self.slots.remove(&frame_id) {
            self.ring[index] = None;
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.ring.len() || self.slots.contains_key(&frame_id) {
            return;
        }
        if let Some(index) = self.ring.iter().position(Option::is_none) {
            self.ring[index] = Some(ClockSlot {
                frame_id,
                referenced: true,
            });
            self.slots.insert(frame_id, index);
        }
    }

    fn size(&self) -> usize {
        self.slots.len()
    }

    fn capacity(&self) -> usize {
        self.ring.len()
    }
}
