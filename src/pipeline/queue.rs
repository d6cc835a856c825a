use parking_lot::Mutex;

use crate::device::types::RawFrame;

/// Hand-off buffer between the device's arrival handler and the capture worker.
///
/// `push` appends under the lock; `drain_all` swaps the whole buffer out for an
/// empty one. Both critical sections are constant-time, so the producer is
/// never held up by the consumer's batch size.
#[derive(Debug, Default)]
pub struct CaptureQueue {
    frames: Mutex<Vec<RawFrame>>,
}

impl CaptureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame. Never drops.
    pub fn push(&self, frame: RawFrame) {
        self.frames.lock().push(frame);
    }

    /// Take every frame pushed since the previous drain, in arrival order.
    pub fn drain_all(&self) -> Vec<RawFrame> {
        std::mem::take(&mut *self.frames.lock())
    }

    /// Number of frames waiting to be drained.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::LinkType;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn make_frame(tag: u32) -> RawFrame {
        RawFrame::new(tag.to_be_bytes().to_vec(), SystemTime::now(), LinkType::Ethernet)
    }

    fn tag_of(frame: &RawFrame) -> u32 {
        u32::from_be_bytes([frame.data()[0], frame.data()[1], frame.data()[2], frame.data()[3]])
    }

    #[test]
    fn drain_returns_frames_in_push_order() {
        let queue = CaptureQueue::new();
        for i in 0..5 {
            queue.push(make_frame(i));
        }
        let drained: Vec<u32> = queue.drain_all().iter().map(tag_of).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn second_drain_without_push_is_empty() {
        let queue = CaptureQueue::new();
        queue.push(make_frame(1));
        assert_eq!(queue.drain_all().len(), 1);
        assert!(queue.drain_all().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_on_new_queue_is_empty() {
        let queue = CaptureQueue::new();
        assert!(queue.drain_all().is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn len_tracks_pending_frames() {
        let queue = CaptureQueue::new();
        queue.push(make_frame(1));
        queue.push(make_frame(2));
        assert_eq!(queue.len(), 2);
        queue.drain_all();
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn queue_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CaptureQueue>();
    }

    #[test]
    fn concurrent_push_and_drain_lose_nothing() {
        const COUNT: u32 = 20_000;
        let queue = Arc::new(CaptureQueue::new());
        let producer_queue = Arc::clone(&queue);

        let producer = std::thread::spawn(move || {
            for i in 0..COUNT {
                producer_queue.push(make_frame(i));
            }
        });

        let mut drained = Vec::new();
        while drained.len() < COUNT as usize {
            drained.extend(queue.drain_all().iter().map(tag_of));
            std::thread::yield_now();
        }
        producer.join().unwrap();
        drained.extend(queue.drain_all().iter().map(tag_of));

        let expected: Vec<u32> = (0..COUNT).collect();
        assert_eq!(drained, expected);
    }

    proptest! {
        /// Any interleaving of pushes and drains yields the push sequence when
        /// the drains are concatenated.
        #[test]
        fn drains_concatenate_to_push_sequence(ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let queue = CaptureQueue::new();
            let mut pushed = Vec::new();
            let mut drained = Vec::new();
            for (i, is_push) in ops.into_iter().enumerate() {
                if is_push {
                    queue.push(make_frame(i as u32));
                    pushed.push(i as u32);
                } else {
                    drained.extend(queue.drain_all().iter().map(tag_of));
                }
            }
            drained.extend(queue.drain_all().iter().map(tag_of));
            prop_assert_eq!(drained, pushed);
        }
    }
}
