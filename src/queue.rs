use crate::command::Command;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Power of two so a slot index doubles as a bit position in the completion
/// word.
pub const QUEUE_CAPACITY: usize = 8;

struct Inner {
    buffer: [Option<Command>; QUEUE_CAPACITY],
    next_in: usize,
    next_out: usize,
    len: usize,
    /// One bit per slot, set when the consumer has finished the command that
    /// last occupied that slot.
    released: u8,
}

/// Bounded FIFO between command producers (HTTP thread, signal handler,
/// dispatcher follow-ups) and the single dispatcher consumer.
///
/// `post` with `wait` gives producers request/response semantics: it blocks
/// until the dispatcher has run the handler for exactly the slot the command
/// landed in, at which point the caller can take a fresh state snapshot and
/// observe the effects.
pub struct CommandQueue {
    inner: Mutex<Inner>,
    produced: Condvar,
    consumed: Condvar,
    released: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: [None; QUEUE_CAPACITY],
                next_in: 0,
                next_out: 0,
                len: 0,
                released: 0,
            }),
            produced: Condvar::new(),
            consumed: Condvar::new(),
            released: Condvar::new(),
        }
    }

    /// Block while the queue is full, then place `command` in the next slot.
    fn place(&self, inner: &mut MutexGuard<'_, Inner>, command: Command) -> usize {
        while inner.len == QUEUE_CAPACITY {
            self.consumed.wait(inner);
        }

        let slot = inner.next_in;
        inner.buffer[slot] = Some(command);
        inner.next_in = (slot + 1) % QUEUE_CAPACITY;
        inner.len += 1;
        // the slot starts a new lifetime; a stale completion bit from its
        // previous occupant must not wake this producer
        inner.released &= !(1 << slot);

        self.produced.notify_one();
        slot
    }

    /// Append a command, blocking while the queue is full. Returns the slot
    /// the command was placed in.
    pub fn enqueue(&self, command: Command) -> usize {
        let mut inner = self.inner.lock();
        self.place(&mut inner, command)
    }

    /// Wait up to `timeout` for a command. Returns the slot and the command,
    /// or `None` on timeout. The consumer must `release` the slot once the
    /// command has been handled.
    pub fn dequeue(&self, timeout: Duration) -> Option<(usize, Command)> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.len == 0 {
            if self.produced.wait_until(&mut inner, deadline).timed_out() && inner.len == 0 {
                return None;
            }
        }

        let slot = inner.next_out;
        let command = inner.buffer[slot].take().expect("occupied slot");
        inner.next_out = (slot + 1) % QUEUE_CAPACITY;
        inner.len -= 1;

        self.consumed.notify_one();
        Some((slot, command))
    }

    /// Mark `slot` as processed, waking any producer synchronously waiting on
    /// it. Idempotent within a slot's lifetime.
    pub fn release(&self, slot: usize) {
        let mut inner = self.inner.lock();
        inner.released |= 1 << slot;
        self.released.notify_all();
    }

    /// Enqueue and, unless `wait` is false, block until the dispatcher has
    /// released the slot this command landed in. The lock is held from
    /// placement to the wait so the slot cannot start another lifetime in
    /// between. Must never be called with `wait` from the dispatcher thread
    /// itself.
    pub fn post(&self, command: Command, wait: bool) {
        let mut inner = self.inner.lock();
        let slot = self.place(&mut inner, command);
        if !wait {
            return;
        }

        let mask = 1u8 << slot;
        while inner.released & mask == 0 {
            self.released.wait(&mut inner);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[test]
    fn commands_come_out_in_fifo_order() {
        let queue = CommandQueue::new();
        queue.enqueue(Command::Initialize);
        queue.enqueue(Command::Connect);
        queue.enqueue(Command::StartShooting);

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.dequeue(timeout).unwrap().1, Command::Initialize);
        assert_eq!(queue.dequeue(timeout).unwrap().1, Command::Connect);
        assert_eq!(queue.dequeue(timeout).unwrap().1, Command::StartShooting);
        assert!(queue.dequeue(timeout).is_none());
    }

    #[test]
    fn slots_advance_and_wrap() {
        let queue = CommandQueue::new();
        for round in 0..3 {
            for i in 0..QUEUE_CAPACITY {
                assert_eq!(queue.enqueue(Command::NoOp), i, "round {round}");
            }
            for i in 0..QUEUE_CAPACITY {
                let (slot, _) = queue.dequeue(Duration::from_millis(10)).unwrap();
                assert_eq!(slot, i, "round {round}");
                queue.release(slot);
            }
        }
    }

    #[test]
    fn enqueue_blocks_while_full() {
        let queue = Arc::new(CommandQueue::new());
        for _ in 0..QUEUE_CAPACITY {
            queue.enqueue(Command::NoOp);
        }

        let unblocked = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let unblocked = Arc::clone(&unblocked);
            std::thread::spawn(move || {
                queue.enqueue(Command::Terminate);
                unblocked.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!unblocked.load(Ordering::SeqCst));

        let (slot, _) = queue.dequeue(Duration::from_millis(10)).unwrap();
        queue.release(slot);
        producer.join().unwrap();
        assert!(unblocked.load(Ordering::SeqCst));
        assert_eq!(queue.len(), QUEUE_CAPACITY);
    }

    #[test]
    fn sync_post_waits_for_its_own_slot() {
        let queue = Arc::new(CommandQueue::new());
        // occupy slot 0 so the sync post lands in slot 1
        queue.enqueue(Command::NoOp);

        let posted = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let posted = Arc::clone(&posted);
            std::thread::spawn(move || {
                queue.post(Command::Connect, true);
                posted.store(true, Ordering::SeqCst);
            })
        };

        let timeout = Duration::from_millis(200);
        let (slot0, _) = queue.dequeue(timeout).unwrap();
        assert_eq!(slot0, 0);
        // releasing a different slot must not wake the producer
        queue.release(slot0);
        std::thread::sleep(Duration::from_millis(50));
        assert!(!posted.load(Ordering::SeqCst));

        let (slot1, command) = queue.dequeue(timeout).unwrap();
        assert_eq!(slot1, 1);
        assert_eq!(command, Command::Connect);
        queue.release(slot1);
        producer.join().unwrap();
        assert!(posted.load(Ordering::SeqCst));
    }

    #[test]
    fn reused_slot_does_not_inherit_completion() {
        let queue = Arc::new(CommandQueue::new());

        // run one full lifetime through every slot
        for _ in 0..QUEUE_CAPACITY {
            let slot = queue.enqueue(Command::NoOp);
            let (dequeued, _) = queue.dequeue(Duration::from_millis(10)).unwrap();
            assert_eq!(slot, dequeued);
            queue.release(slot);
        }

        // slot 0 now carries a stale released bit; a sync post into it must
        // still block until the new release
        let started = Instant::now();
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.post(Command::Disconnect, true))
        };

        let (slot, _) = queue.dequeue(Duration::from_millis(200)).unwrap();
        assert_eq!(slot, 0);
        std::thread::sleep(Duration::from_millis(30));
        queue.release(slot);
        producer.join().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn dequeue_times_out_when_idle() {
        let queue = CommandQueue::new();
        let started = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
