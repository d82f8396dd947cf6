//! Per-PD bounded command queue, backed by a fixed-capacity slab allocator:
//! a pool of `num_blocks` fixed-size slots plus a free-list, so the engine
//! is allocation-free in steady state (§4.3, §9 "Fixed-size slab").

use thiserror::Error;

/// Errors raised by [`Queue`]
pub type Error = crate::Error<ErrorKind>;

/// Kinds of queue errors
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum ErrorKind {
    /// The slab has no free blocks left
    #[error("command queue is full")]
    Full,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        anomaly::Context::new(kind, None).into()
    }
}

/// A fixed-capacity slab of `T`, indices standing in for block pointers
/// (§9: "Indices may replace pointers for ownership clarity").
struct Slab<T> {
    blocks: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Slab<T> {
    fn new(num_blocks: usize) -> Self {
        Self {
            blocks: (0..num_blocks).map(|_| None).collect(),
            free: (0..num_blocks).rev().collect(),
        }
    }

    fn alloc(&mut self, value: T) -> Option<usize> {
        let index = self.free.pop()?;
        self.blocks[index] = Some(value);
        Some(index)
    }

    fn free(&mut self, index: usize) -> Option<T> {
        let value = self.blocks[index].take();
        if value.is_some() {
            self.free.push(index);
        }
        value
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.blocks[index].as_ref()
    }
}

/// A bounded per-PD FIFO of pending commands.
///
/// `enqueue` allocates a slab block and links it at the tail; `dequeue`
/// unlinks the head and hands ownership to the caller while keeping the
/// block alive as the "in-flight" command until [`Queue::free_in_flight`]
/// is called, matching `cmd_get_last`'s role of peeking the most recently
/// sent command while its reply is still outstanding.
pub struct Queue<T> {
    slab: Slab<T>,
    order: std::collections::VecDeque<usize>,
    in_flight: Option<usize>,
}

impl<T> Queue<T> {
    /// Create a queue with room for `capacity` pending commands.
    pub fn new(capacity: usize) -> Self {
        Self {
            slab: Slab::new(capacity),
            order: std::collections::VecDeque::with_capacity(capacity),
            in_flight: None,
        }
    }

    /// Enqueue a command at the tail. Fails with [`ErrorKind::Full`] if the
    /// slab has no free blocks; never silently drops (spec §3 invariant).
    pub fn enqueue(&mut self, command: T) -> Result<(), Error> {
        let index = self.slab.alloc(command).ok_or(ErrorKind::Full)?;
        self.order.push_back(index);
        Ok(())
    }

    /// Dequeue the head command, making it the in-flight command. Returns
    /// `None` if the queue is empty.
    pub fn dequeue(&mut self) -> Option<&T> {
        let index = self.order.pop_front()?;
        self.in_flight = Some(index);
        self.slab.get(index)
    }

    /// Peek the most recently dequeued (in-flight) command, for matching an
    /// incoming reply against the command that provoked it.
    pub fn last(&self) -> Option<&T> {
        self.in_flight.and_then(|index| self.slab.get(index))
    }

    /// Free the in-flight command's block, returning it to the slab. Called
    /// after a successful send (CP role) or after handling completes (PD
    /// role).
    pub fn free_in_flight(&mut self) -> Option<T> {
        let index = self.in_flight.take()?;
        self.slab.free(index)
    }

    /// Number of commands currently queued (not counting the in-flight one).
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if no commands are queued.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let mut q = Queue::new(4);
        q.enqueue('A').unwrap();
        q.enqueue('B').unwrap();
        q.enqueue('C').unwrap();

        assert_eq!(*q.dequeue().unwrap(), 'A');
        q.free_in_flight();
        assert_eq!(*q.dequeue().unwrap(), 'B');
        q.free_in_flight();
        assert_eq!(*q.dequeue().unwrap(), 'C');
        q.free_in_flight();
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn full_queue_errors_without_corruption() {
        let mut q = Queue::new(2);
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        assert!(q.enqueue(3).is_err());

        assert_eq!(*q.dequeue().unwrap(), 1);
        q.free_in_flight();
        // freeing a block makes room again
        q.enqueue(3).unwrap();
        assert_eq!(*q.dequeue().unwrap(), 2);
        q.free_in_flight();
        assert_eq!(*q.dequeue().unwrap(), 3);
    }

    #[test]
    fn last_peeks_in_flight_command() {
        let mut q = Queue::new(2);
        q.enqueue("poll").unwrap();
        assert!(q.last().is_none());
        q.dequeue();
        assert_eq!(*q.last().unwrap(), "poll");
        q.free_in_flight();
        assert!(q.last().is_none());
    }
}
