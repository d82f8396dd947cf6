//! Round-robin visitation order over a CP's peers: cycles an index into the
//! peer array with no priority or fairness beyond strict rotation. Kept as
//! its own small type so [`super::Cp::refresh`] reads as "pick the next
//! peer, drive it" rather than inlining the modular arithmetic.

use crate::pd::PdHandle;

pub(crate) struct Scheduler {
    handles: Vec<PdHandle>,
    cursor: usize,
}

impl Scheduler {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            handles: (0..count).map(PdHandle).collect(),
            cursor: 0,
        }
    }

    /// The peer due to be serviced this tick.
    pub(crate) fn current(&self) -> PdHandle {
        self.handles[self.cursor]
    }

    /// Move on to the next peer for the following tick.
    pub(crate) fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.handles.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_every_handle_in_order() {
        let mut scheduler = Scheduler::new(3);
        let seen: Vec<usize> = (0..6)
            .map(|_| {
                let h = scheduler.current();
                scheduler.advance();
                h.0
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }
}
