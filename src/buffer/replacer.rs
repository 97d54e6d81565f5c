use crate::common::FrameId;

/// Page replacement policy over a fixed set of frame slots.
///
/// A replacer only tracks which frames are evictable; it never touches page
/// contents. The buffer pool calls it with its own latch held, so
/// implementations need no internal locking.
pub trait Replacer: Send {
    /// Removes and returns the frame to evict, or None if nothing is
    /// evictable.
    fn victim(&mut self) -> Option<FrameId>;

    /// Marks a frame as in use; it stops being a victim candidate.
    fn pin(&mut self, frame_id: FrameId);

    /// Marks a frame as evictable.
    fn unpin(&mut self, frame_id: FrameId);

    /// Forgets a frame whose page was deleted.
    fn remove(&mut self, frame_id: FrameId) {
        self.pin(frame_id);
    }

    /// Number of evictable frames.
    fn size(&self) -> usize;

    /// Number of frame slots the replacer was built for.
    fn capacity(&self) -> usize;
}
