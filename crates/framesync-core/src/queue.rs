use std::{collections::VecDeque, time::Instant};

/// A frame waiting in a queue, stamped with the time it was staged.
#[derive(Debug)]
pub struct Staged<F> {
    pub frame: F,
    pub enqueued_at: Instant,
}

/// A FIFO of frames emitted by one child matcher and waiting to be
/// grouped. Frames leave in the order they arrived.
#[derive(Debug)]
pub struct FrameQueue<F> {
    frames: VecDeque<Staged<F>>,
}

impl<F> Default for FrameQueue<F> {
    fn default() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }
}

impl<F> FrameQueue<F> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The head frame.
    pub fn front(&self) -> Option<&F> {
        self.frames.front().map(|staged| &staged.frame)
    }

    /// When the head frame was staged.
    pub fn front_enqueued_at(&self) -> Option<Instant> {
        self.frames.front().map(|staged| staged.enqueued_at)
    }

    pub fn push_back(&mut self, frame: F) {
        self.frames.push_back(Staged {
            frame,
            enqueued_at: Instant::now(),
        });
    }

    pub fn pop_front(&mut self) -> Option<Staged<F>> {
        self.frames.pop_front()
    }

    /// Puts a previously popped frame back at the head.
    pub fn restore_front(&mut self, staged: Staged<F>) {
        self.frames.push_front(staged);
    }

    /// Removes every frame, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = F> + '_ {
        self.frames.drain(..).map(|staged| staged.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn test_queue_with_capacity() {
        let queue: FrameQueue<u32> = FrameQueue::with_capacity(5);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
        assert!(queue.front().is_none());
        assert!(queue.front_enqueued_at().is_none());
    }

    #[test]
    fn test_queue_keeps_arrival_order() {
        let mut queue = FrameQueue::default();
        queue.push_back(3);
        queue.push_back(1);
        queue.push_back(2);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front(), Some(&3));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_front())
            .map(|staged| staged.frame)
            .collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_restore_front() {
        let mut queue = FrameQueue::default();
        queue.push_back(10);
        queue.push_back(20);

        let head = queue.pop_front().unwrap();
        let staged_at = head.enqueued_at;
        assert_eq!(queue.front(), Some(&20));

        queue.restore_front(head);
        assert_eq!(queue.front(), Some(&10));
        assert_eq!(queue.front_enqueued_at(), Some(staged_at));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_queue_head_age() {
        let mut queue = FrameQueue::default();
        queue.push_back(1);
        thread::sleep(Duration::from_millis(5));
        queue.push_back(2);

        let head_at = queue.front_enqueued_at().unwrap();
        assert!(head_at.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_queue_drain() {
        let mut queue = FrameQueue::default();
        queue.push_back("a");
        queue.push_back("b");

        let drained: Vec<_> = queue.drain().collect();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(queue.is_empty());
    }
}
