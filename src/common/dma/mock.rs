//! Simulated channel hardware for transfer-engine tests.
//!
//! Register state lives in `Cell`s so the mock can be poked through the
//! shared references the engine hands out, and a thread-local tick counter
//! stands in for the monotonic timer: every observation of the clock moves
//! simulated time forward by one tick.

extern crate std;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::vec::Vec;

use super::*;
use crate::common::tick::TickInstant;

std::thread_local! {
    static NOW: Cell<u32> = const { Cell::new(0) };
}

/// Simulated monotonic clock; advances one tick per `now()`.
#[derive(Clone, Copy)]
pub struct TestTick(u32);

impl TickInstant for TestTick {
    fn now() -> Self {
        NOW.with(|now| {
            let tick = now.get();
            now.set(tick.wrapping_add(1));
            TestTick(tick)
        })
    }

    fn tick_since(self, earlier: Self) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }
}

pub fn current_tick() -> u32 {
    NOW.with(Cell::get)
}

pub fn set_tick(tick: u32) {
    NOW.with(|now| now.set(tick));
}

/// Records the clock shares a channel takes and returns.
#[derive(Default)]
pub struct ClockProbe {
    pub acquired: Cell<u32>,
    pub released: Cell<u32>,
}

/// In-memory register model of one DMA channel.
pub struct MockChannel {
    pub enabled: Cell<bool>,
    pub cpar: Cell<u32>,
    pub cmar: Cell<u32>,
    pub cndtr: Cell<u16>,
    pub config: Cell<Option<Config>>,
    pub clock: Rc<ClockProbe>,
    /// Ticks the enable bit keeps reading as set after a disable request.
    pub disable_delay: Cell<u32>,
    flags: [Cell<bool>; 3],
    listening: [Cell<bool>; 3],
    schedule: RefCell<Vec<(DmaEvent, u32)>>,
    disable_done_at: Cell<Option<u32>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::with_clock(Rc::new(ClockProbe::default()))
    }

    pub fn with_clock(clock: Rc<ClockProbe>) -> Self {
        Self {
            enabled: Cell::new(false),
            cpar: Cell::new(0),
            cmar: Cell::new(0),
            cndtr: Cell::new(0),
            config: Cell::new(None),
            clock,
            disable_delay: Cell::new(0),
            flags: Default::default(),
            listening: Default::default(),
            schedule: RefCell::new(Vec::new()),
            disable_done_at: Cell::new(None),
        }
    }

    fn idx(event: DmaEvent) -> usize {
        match event {
            DmaEvent::HalfTransfer => 0,
            DmaEvent::TransferComplete => 1,
            DmaEvent::TransferError => 2,
        }
    }

    /// Raises the event's flag immediately.
    pub fn raise(&self, event: DmaEvent) {
        self.flags[Self::idx(event)].set(true);
    }

    /// Raises the event's flag once simulated time reaches `tick`.
    pub fn raise_at(&self, event: DmaEvent, tick: u32) {
        self.schedule.borrow_mut().push((event, tick));
    }

    pub fn is_listening(&self, event: DmaEvent) -> bool {
        self.listening[Self::idx(event)].get()
    }

    /// Whether the channel would currently assert its interrupt line:
    /// some flag is raised while its source is unmasked.
    pub fn interrupt_pending(&self) -> bool {
        self.apply_schedule();
        self.flags
            .iter()
            .zip(self.listening.iter())
            .any(|(flag, listening)| flag.get() && listening.get())
    }

    fn apply_schedule(&self) {
        let now = current_tick();
        self.schedule.borrow_mut().retain(|&(event, at)| {
            if now >= at {
                self.flags[Self::idx(event)].set(true);
                false
            } else {
                true
            }
        });
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaChannel for MockChannel {
    fn clock_acquire(&self) {
        self.clock.acquired.set(self.clock.acquired.get() + 1);
    }

    fn clock_release(&self) {
        self.clock.released.set(self.clock.released.get() + 1);
    }

    fn enable(&mut self) {
        self.disable_done_at.set(None);
        self.enabled.set(true);
    }

    fn disable(&mut self) {
        if !self.enabled.get() {
            return;
        }
        let delay = self.disable_delay.get();
        if delay == 0 {
            self.enabled.set(false);
        } else if self.disable_done_at.get().is_none() {
            self.disable_done_at.set(Some(current_tick() + delay));
        }
    }

    fn is_enabled(&self) -> bool {
        if let Some(at) = self.disable_done_at.get() {
            if current_tick() >= at {
                self.enabled.set(false);
                self.disable_done_at.set(None);
            }
        }
        self.enabled.get()
    }

    fn apply_config(&mut self, config: &Config) {
        self.config.set(Some(*config));
    }

    fn reset(&mut self) {
        self.config.set(None);
        self.enabled.set(false);
        self.disable_done_at.set(None);
        self.cndtr.set(0);
        self.cpar.set(0);
        self.cmar.set(0);
    }

    fn set_direction(&mut self, direction: Direction) {
        if let Some(mut config) = self.config.get() {
            config.direction = direction;
            self.config.set(Some(config));
        }
    }

    fn set_peripheral_address(&mut self, address: u32) {
        self.cpar.set(address);
    }

    fn peripheral_address(&self) -> u32 {
        self.cpar.get()
    }

    fn set_memory_address(&mut self, address: u32) {
        self.cmar.set(address);
    }

    fn set_transfer_length(&mut self, len: u16) {
        self.cndtr.set(len);
    }

    fn remaining(&self) -> u16 {
        self.cndtr.get()
    }

    fn is_circular(&self) -> bool {
        self.config.get().is_some_and(|config| config.circular)
    }

    fn flag(&self, event: DmaEvent) -> bool {
        self.apply_schedule();
        self.flags[Self::idx(event)].get()
    }

    fn clear_flag(&mut self, event: DmaEvent) {
        self.flags[Self::idx(event)].set(false);
    }

    fn listen(&mut self, event: DmaEvent, enable: bool) {
        self.listening[Self::idx(event)].set(enable);
    }
}
