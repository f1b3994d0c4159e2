//! Wait-free command handoff between the foreground and the control cycle.
//!
//! Two preallocated [`CommandData`] cells are exchanged by publishing a
//! single atomic word that names the cell the control cycle should read.
//! The foreground writes the inactive cell, then stores the new index with
//! release ordering; the control cycle loads with acquire ordering and sees
//! a fully written command. Single producer, single consumer, no locks and
//! no allocation on either path.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::state::CommandData;

pub struct CommandExchange {
    buffers: [UnsafeCell<CommandData>; 2],
    /// Index of the cell currently owned by the control cycle.
    active: AtomicUsize,
}

// The publish protocol above is the synchronization: the producer only
// writes the inactive cell, the consumer only reads the active one.
unsafe impl Sync for CommandExchange {}

impl CommandExchange {
    pub fn new() -> Self {
        Self {
            buffers: [
                UnsafeCell::new(CommandData::default()),
                UnsafeCell::new(CommandData::default()),
            ],
            active: AtomicUsize::new(0),
        }
    }

    /// Foreground side: store a new command and publish it.
    ///
    /// The command takes effect at the top of the next control cycle. A
    /// later call supersedes an earlier one that the control cycle has not
    /// picked up yet.
    pub fn write(&self, data: &CommandData) {
        // Only this side ever changes `active`, so a relaxed read is enough
        // to find the inactive cell.
        let next = 1 - self.active.load(Ordering::Relaxed);
        unsafe {
            *self.buffers[next].get() = *data;
        }
        self.active.store(next, Ordering::Release);
    }

    /// Control-cycle side: the cell holding the live command.
    ///
    /// The pointer stays valid for the whole cycle; the foreground never
    /// writes the published cell. The control cycle may write through it
    /// (to consume `set_position`).
    pub fn active(&self) -> *mut CommandData {
        let index = self.active.load(Ordering::Acquire);
        self.buffers[index].get()
    }
}

impl Default for CommandExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Mode;

    #[test]
    fn test_publish_swaps_cells() {
        let exchange = CommandExchange::new();
        let first = exchange.active();

        let mut data = CommandData::default();
        data.mode = Mode::Voltage;
        data.phase_v.a = 3.0;
        exchange.write(&data);

        let second = exchange.active();
        assert_ne!(first, second);

        let seen = unsafe { *second };
        assert_eq!(seen.mode, Mode::Voltage);
        assert_eq!(seen.phase_v.a, 3.0);
    }

    #[test]
    fn test_later_write_supersedes() {
        let exchange = CommandExchange::new();

        let mut data = CommandData::default();
        data.mode = Mode::Pwm;
        exchange.write(&data);
        data.mode = Mode::Current;
        data.i_q_amps = 1.25;
        exchange.write(&data);

        let seen = unsafe { *exchange.active() };
        assert_eq!(seen.mode, Mode::Current);
        assert_eq!(seen.i_q_amps, 1.25);
    }

    #[test]
    fn test_consumer_writes_persist_until_next_publish() {
        let exchange = CommandExchange::new();

        let mut data = CommandData::default();
        data.mode = Mode::Pwm;
        data.set_position = Some(1.0);
        exchange.write(&data);

        // The control cycle consumes the one-shot field in place.
        unsafe {
            (*exchange.active()).set_position = None;
        }
        let seen = unsafe { *exchange.active() };
        assert!(seen.set_position.is_none());
        assert_eq!(seen.mode, Mode::Pwm);
    }
}
