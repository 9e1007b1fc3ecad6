//! Clock page replacement for the buffer pool.

use crate::frame::{BufferFrame, FrameId};

/// Clock replacement algorithm.
///
/// The hand sweeps the frame array circularly. On each step it advances,
/// then inspects the frame under it:
/// 1. Pinned frames are skipped
/// 2. A set reference bit is cleared (second chance) and the hand moves on
/// 3. An unpinned frame with a clear reference bit is the victim
///
/// At most two full rotations are made, which is enough for every
/// unpinned frame to lose its reference bit and be visited again.
#[derive(Debug)]
pub(crate) struct ClockReplacer {
    num_frames: usize,
    /// Frame inspected last; the next sweep starts after it.
    hand: usize,
}

impl ClockReplacer {
    /// Creates a replacer whose first inspected frame is frame 0.
    pub(crate) fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            hand: num_frames.saturating_sub(1),
        }
    }

    /// Returns the current hand position.
    #[cfg(test)]
    pub(crate) fn hand(&self) -> usize {
        self.hand
    }

    #[inline]
    fn advance(&mut self) {
        self.hand = (self.hand + 1) % self.num_frames;
    }

    /// Selects a victim frame, clearing reference bits along the way.
    ///
    /// Returns None if every frame stayed pinned for two rotations. The
    /// victim is not modified; the caller writes it back and resets it.
    pub(crate) fn find_victim(&mut self, frames: &[BufferFrame]) -> Option<FrameId> {
        debug_assert_eq!(frames.len(), self.num_frames);

        for _ in 0..(2 * self.num_frames) {
            self.advance();
            let frame = &frames[self.hand];

            if frame.is_pinned() {
                continue;
            }
            if frame.reference_bit() {
                frame.set_reference_bit(false);
                continue;
            }
            return Some(frame.frame_id());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::page::{FileId, Page, PageId, PageNum};
    use kestrel_common::Result;
    use kestrel_storage::PageFile;
    use std::sync::Arc;

    struct NullFile;

    impl PageFile for NullFile {
        fn file_id(&self) -> FileId {
            0
        }
        fn read_page(&self, _: PageNum, _: &mut Page) -> Result<()> {
            Ok(())
        }
        fn write_page(&self, _: PageNum, _: &Page) -> Result<()> {
            Ok(())
        }
        fn allocate_page(&self) -> Result<PageNum> {
            Ok(0)
        }
        fn dispose_page(&self, _: PageNum) -> Result<()> {
            Ok(())
        }
    }

    /// Builds `n` frames, all loaded and unpinned with the reference bit set.
    fn loaded_frames(n: u32) -> Vec<BufferFrame> {
        let file: Arc<dyn PageFile> = Arc::new(NullFile);
        (0..n)
            .map(|i| {
                let frame = BufferFrame::new(FrameId(i));
                frame.load(PageId::new(0, i), Arc::clone(&file));
                frame.unpin();
                frame
            })
            .collect()
    }

    #[test]
    fn test_starts_before_frame_zero() {
        let replacer = ClockReplacer::new(4);
        assert_eq!(replacer.hand(), 3);
    }

    #[test]
    fn test_empty_frames_selected_in_order() {
        let frames: Vec<_> = (0..3).map(|i| BufferFrame::new(FrameId(i))).collect();
        let mut replacer = ClockReplacer::new(3);

        assert_eq!(replacer.find_victim(&frames), Some(FrameId(0)));
        assert_eq!(replacer.find_victim(&frames), Some(FrameId(1)));
        assert_eq!(replacer.find_victim(&frames), Some(FrameId(2)));
        assert_eq!(replacer.find_victim(&frames), Some(FrameId(0)));
    }

    #[test]
    fn test_all_pinned() {
        let frames = loaded_frames(3);
        for frame in &frames {
            frame.pin();
        }
        let mut replacer = ClockReplacer::new(3);

        assert_eq!(replacer.find_victim(&frames), None);
        // Hand made exactly two rotations.
        assert_eq!(replacer.hand(), 2);
    }

    #[test]
    fn test_pinned_frame_never_selected() {
        let frames = loaded_frames(3);
        frames[0].pin();
        let mut replacer = ClockReplacer::new(3);

        for _ in 0..6 {
            let victim = replacer.find_victim(&frames).unwrap();
            assert_ne!(victim, FrameId(0));
        }
    }

    #[test]
    fn test_all_referenced_second_rotation() {
        let frames = loaded_frames(3);
        let mut replacer = ClockReplacer::new(3);

        // First rotation clears every bit, second picks frame 0.
        assert_eq!(replacer.find_victim(&frames), Some(FrameId(0)));
        assert!(frames.iter().all(|f| !f.reference_bit()));
    }

    #[test]
    fn test_second_chance() {
        let frames = loaded_frames(3);
        frames[1].set_reference_bit(false);
        let mut replacer = ClockReplacer::new(3);

        // Frame 0 keeps its page for one more rotation.
        assert_eq!(replacer.find_victim(&frames), Some(FrameId(1)));
        assert!(!frames[0].reference_bit());
        assert!(frames[2].reference_bit());
    }

    #[test]
    fn test_hand_resumes_after_victim() {
        let frames = loaded_frames(4);
        for frame in &frames {
            frame.set_reference_bit(false);
        }
        let mut replacer = ClockReplacer::new(4);

        assert_eq!(replacer.find_victim(&frames), Some(FrameId(0)));
        assert_eq!(replacer.hand(), 0);
        assert_eq!(replacer.find_victim(&frames), Some(FrameId(1)));
        assert_eq!(replacer.hand(), 1);
    }
}
