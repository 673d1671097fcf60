use core::cell::Cell;
use critical_section::Mutex;

/// Usage-counted clock gating for one DMA controller.
///
/// All channels of a controller share a single clock line. The ledger
/// tracks initialized channels in a bitmask and toggles the gate only on
/// the empty/non-empty transitions of that mask. Mask update and gate
/// toggle happen inside one critical section, so sibling channels may be
/// initialized and deinitialized concurrently from foreground and
/// interrupt context.
pub struct ClockLedger {
    users: Mutex<Cell<u8>>,
}

impl ClockLedger {
    pub const fn new() -> Self {
        Self {
            users: Mutex::new(Cell::new(0)),
        }
    }

    /// Marks `channel` as a clock user; opens the gate for the first one.
    pub fn acquire(&self, channel: u8, gate: impl FnOnce(bool)) {
        critical_section::with(|cs| {
            let users = self.users.borrow(cs);
            let prev = users.get();
            users.set(prev | 1 << channel);
            if prev == 0 {
                gate(true);
            }
        });
    }

    /// Removes `channel` from the clock users; closes the gate with the
    /// last one.
    pub fn release(&self, channel: u8, gate: impl FnOnce(bool)) {
        critical_section::with(|cs| {
            let users = self.users.borrow(cs);
            let prev = users.get();
            let mask = prev & !(1 << channel);
            users.set(mask);
            if prev != 0 && mask == 0 {
                gate(false);
            }
        });
    }

    /// Bitmask of channels currently holding the clock.
    pub fn users(&self) -> u8 {
        critical_section::with(|cs| self.users.borrow(cs).get())
    }
}

impl Default for ClockLedger {
    fn default() -> Self {
        Self::new()
    }
}
