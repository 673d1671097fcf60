use alloc::boxed::Box;
use core::marker::PhantomData;

use super::*;
use crate::common::tick::TickInstant;

/// Ticks granted to [`DmaStream::stop`] for the enable bit to drain.
const ABORT_TIMEOUT: u32 = 1000;

/// Completion condition awaited by [`DmaStream::poll_status`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// The full programmed length has been transferred.
    Transfer,
    /// The midpoint of the programmed length has been passed.
    HalfTransfer,
}

type Callback = Box<dyn FnMut()>;

#[derive(Default)]
struct Callbacks {
    half_complete: Option<Callback>,
    complete: Option<Callback>,
    error: Option<Callback>,
}

/// One configurable, independently operable transfer channel.
///
/// Wraps a [`DmaChannel`] register capability with the transfer lifecycle:
/// clock bookkeeping, start/stop arbitration, sticky error state and
/// completion notification. `TICK` is the monotonic counter timing the
/// bounded waits of [`DmaStream::stop`] and [`DmaStream::poll_status`].
pub struct DmaStream<CH, TICK>
where
    CH: DmaChannel,
    TICK: TickInstant,
{
    ch: CH,
    errors: Errors,
    callbacks: Callbacks,
    _tick: PhantomData<TICK>,
}

impl<CH, TICK> DmaStream<CH, TICK>
where
    CH: DmaChannel,
    TICK: TickInstant,
{
    /// Initializes the stream using the setup configuration.
    ///
    /// Acquires the controller clock, programs the control register and
    /// zeroes the transfer length and peripheral address. The channel
    /// stays disabled until a transfer is started.
    pub fn init(mut ch: CH, config: &Config) -> Self {
        ch.clock_acquire();
        ch.apply_config(config);
        ch.set_transfer_length(0);
        ch.set_peripheral_address(0);

        Self {
            ch,
            errors: Errors::NONE,
            callbacks: Callbacks::default(),
            _tick: PhantomData,
        }
    }

    /// Deinitializes the stream and hands the channel back.
    ///
    /// Disables the channel, resets its registers to power-on defaults,
    /// clears pending flags and returns the controller clock share.
    pub fn deinit(mut self) -> CH {
        self.ch.disable();
        self.ch.reset();

        self.ch.clear_flag(DmaEvent::HalfTransfer);
        self.ch.clear_flag(DmaEvent::TransferComplete);
        self.ch.clear_flag(DmaEvent::TransferError);

        self.ch.clock_release();
        self.ch
    }

    /// Enables the channel.
    #[inline]
    pub fn enable(&mut self) {
        self.ch.enable();
    }

    /// Disables the channel. Data movement stops; the length and address
    /// registers keep their values until the next start overwrites them.
    #[inline]
    pub fn disable(&mut self) {
        self.ch.disable();
    }

    /// Rewrites the transfer direction of the configured channel.
    #[inline]
    pub fn set_direction(&mut self, direction: Direction) {
        self.ch.set_direction(direction);
    }

    /// Point-in-time check: enabled with transfers still outstanding.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.ch.is_enabled() && self.ch.remaining() > 0
    }

    /// Sets up a transfer and starts it.
    ///
    /// A peripheral address equal to the programmed one is treated as a
    /// restart by the same client and replaces the in-flight transfer
    /// without a busy check. A differing address retargets the channel and
    /// is refused while a transfer is in progress.
    pub fn start(&mut self, periph_address: u32, data: DataStream) -> Result<(), Error> {
        // Single user of the channel: the busy check and the register
        // programming must not interleave with a start from interrupt
        // context.
        critical_section::with(|_| {
            if periph_address != self.ch.peripheral_address() && self.is_busy() {
                return Err(Error::Busy);
            }

            self.ch.disable();

            self.ch.set_peripheral_address(periph_address);
            self.ch.set_transfer_length(data.length);
            self.ch.set_memory_address(data.address);

            self.errors = Errors::NONE;

            self.ch.enable();
            Ok(())
        })
    }

    /// [`DmaStream::start`], plus unmasking of the completion interrupt
    /// sources on success so [`DmaStream::handle_interrupt`] gets invoked.
    /// Interrupt sources are left untouched when the start is refused.
    pub fn start_notify(&mut self, periph_address: u32, data: DataStream) -> Result<(), Error> {
        self.start(periph_address, data)?;

        self.ch.listen(DmaEvent::HalfTransfer, true);
        self.ch.listen(DmaEvent::TransferComplete, true);
        #[cfg(feature = "error-detect")]
        self.ch.listen(DmaEvent::TransferError, true);

        Ok(())
    }

    /// Stops the transfer, waiting for the channel to drain.
    ///
    /// The controller finishes an in-flight bus transaction before the
    /// enable bit reads back as cleared; the wait is bounded at 1000 ticks.
    pub fn stop(&mut self) -> Result<(), Error> {
        self.ch.disable();

        let start = TICK::now();
        while self.ch.is_enabled() {
            if start.tick_elapsed() > ABORT_TIMEOUT {
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    /// Stops the transfer and masks all interrupt sources, without waiting
    /// for the channel to drain.
    pub fn stop_notify(&mut self) {
        self.ch.disable();

        self.ch.listen(DmaEvent::HalfTransfer, false);
        self.ch.listen(DmaEvent::TransferComplete, false);
        #[cfg(feature = "error-detect")]
        self.ch.listen(DmaEvent::TransferError, false);
    }

    /// Blocks until the awaited condition, a transfer error, or the tick
    /// timeout; `None` waits indefinitely.
    ///
    /// A transfer error observed while waiting is recorded sticky, its
    /// flag cleared, and reported immediately, ahead of the awaited
    /// condition.
    pub fn poll_status(&mut self, operation: Operation, timeout: Option<u32>) -> Result<(), Error> {
        let awaited = match operation {
            Operation::Transfer => DmaEvent::TransferComplete,
            Operation::HalfTransfer => DmaEvent::HalfTransfer,
        };

        let start = TICK::now();
        loop {
            if self.ch.flag(DmaEvent::TransferError) {
                self.errors |= Errors::TRANSFER;
                self.ch.clear_flag(DmaEvent::TransferError);
                return Err(Error::Transfer);
            }

            if self.ch.flag(awaited) {
                break;
            }

            if let Some(limit) = timeout {
                if start.tick_elapsed() > limit {
                    return Err(Error::Timeout);
                }
            }
        }

        if operation == Operation::Transfer {
            self.ch.clear_flag(DmaEvent::TransferComplete);
        }
        self.ch.clear_flag(DmaEvent::HalfTransfer);

        Ok(())
    }

    /// Accumulated errors; reset by the next accepted start.
    #[inline]
    pub fn errors(&self) -> Errors {
        self.errors
    }

    /// Callback invoked from [`DmaStream::handle_interrupt`] when a
    /// transfer reaches its midpoint.
    pub fn set_half_complete_callback(&mut self, callback: impl FnMut() + 'static) {
        self.callbacks.half_complete = Some(Box::new(callback));
    }

    /// Callback invoked from [`DmaStream::handle_interrupt`] when a
    /// transfer completes.
    pub fn set_complete_callback(&mut self, callback: impl FnMut() + 'static) {
        self.callbacks.complete = Some(Box::new(callback));
    }

    /// Callback invoked from [`DmaStream::handle_interrupt`] when the
    /// hardware reports a transfer error.
    pub fn set_error_callback(&mut self, callback: impl FnMut() + 'static) {
        self.callbacks.error = Some(Box::new(callback));
    }

    /// Services the channel's pending events; invoked by integration code
    /// from the controller's interrupt vector.
    ///
    /// Every flag raised since the last invocation is handled in one pass.
    /// Outside circular mode a serviced completion source is masked again:
    /// no further events are expected until a new transfer arms them.
    /// Unregistered callbacks are skipped.
    pub fn handle_interrupt(&mut self) {
        if self.ch.flag(DmaEvent::HalfTransfer) {
            self.ch.clear_flag(DmaEvent::HalfTransfer);

            if !self.ch.is_circular() {
                self.ch.listen(DmaEvent::HalfTransfer, false);
            }

            if let Some(callback) = self.callbacks.half_complete.as_mut() {
                callback();
            }
        }

        if self.ch.flag(DmaEvent::TransferComplete) {
            self.ch.clear_flag(DmaEvent::TransferComplete);

            if !self.ch.is_circular() {
                self.ch.listen(DmaEvent::TransferComplete, false);
            }

            if let Some(callback) = self.callbacks.complete.as_mut() {
                callback();
            }
        }

        #[cfg(feature = "error-detect")]
        if self.ch.flag(DmaEvent::TransferError) {
            self.ch.clear_flag(DmaEvent::TransferError);

            self.errors |= Errors::TRANSFER;

            if let Some(callback) = self.callbacks.error.as_mut() {
                callback();
            }
        }
    }

    /// Borrows the underlying channel capability.
    #[inline]
    pub fn channel(&self) -> &CH {
        &self.ch
    }

    /// Mutably borrows the underlying channel capability.
    #[inline]
    pub fn channel_mut(&mut self) -> &mut CH {
        &mut self.ch
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::*;
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    type Stream = DmaStream<MockChannel, TestTick>;

    fn stream() -> Stream {
        DmaStream::init(MockChannel::new(), &Config::default())
    }

    fn started(periph: u32) -> Stream {
        let mut stream = stream();
        let buf = [0u8; 4];
        stream.start(periph, DataStream::from_slice(&buf)).unwrap();
        stream
    }

    /// Models the interrupt dispatch: the vector fires only while some
    /// raised flag has its source unmasked.
    fn dispatch(stream: &mut Stream) {
        if stream.channel().interrupt_pending() {
            stream.handle_interrupt();
        }
    }

    #[test]
    fn init_leaves_channel_configured_and_disabled() {
        let probe = Rc::new(ClockProbe::default());
        let ch = MockChannel::with_clock(probe.clone());

        let stream: Stream = DmaStream::init(ch, &Config::default());

        assert_eq!(probe.acquired.get(), 1);
        let ch = stream.channel();
        assert_eq!(ch.config.get(), Some(Config::default()));
        assert_eq!(ch.cndtr.get(), 0);
        assert_eq!(ch.cpar.get(), 0);
        assert!(!ch.enabled.get());
    }

    #[test]
    fn deinit_resets_registers_and_releases_clock() {
        let probe = Rc::new(ClockProbe::default());
        let mut stream: Stream =
            DmaStream::init(MockChannel::with_clock(probe.clone()), &Config::default());

        let buf = [0u8; 16];
        stream.start(0x4000_0000, DataStream::from_slice(&buf)).unwrap();
        stream.channel().raise(DmaEvent::TransferComplete);
        stream.channel().raise(DmaEvent::TransferError);

        let ch = stream.deinit();
        assert!(!ch.enabled.get());
        assert_eq!(ch.config.get(), None);
        assert_eq!(ch.cndtr.get(), 0);
        assert_eq!(ch.cpar.get(), 0);
        assert_eq!(ch.cmar.get(), 0);
        assert!(!ch.flag(DmaEvent::HalfTransfer));
        assert!(!ch.flag(DmaEvent::TransferComplete));
        assert!(!ch.flag(DmaEvent::TransferError));
        assert_eq!(probe.released.get(), 1);
    }

    #[test]
    fn start_programs_transfer_and_enables() {
        let mut stream = stream();
        let buf = [0u32; 32];

        stream.start(0x4001_3804, DataStream::from_slice(&buf)).unwrap();

        let ch = stream.channel();
        assert_eq!(ch.cpar.get(), 0x4001_3804);
        assert_eq!(ch.cmar.get(), buf.as_ptr() as u32);
        assert_eq!(ch.cndtr.get(), 32);
        assert!(ch.enabled.get());
        assert!(stream.is_busy());
    }

    #[test]
    fn restart_for_same_target_takes_latest_parameters() {
        let mut stream = stream();
        let first = [0u8; 8];
        let second = [0u8; 24];

        stream.start(0x4000_4404, DataStream::from_slice(&first)).unwrap();
        // Channel went idle: everything moved, the count drained to zero.
        stream.channel().cndtr.set(0);

        stream.start(0x4000_4404, DataStream::from_slice(&second)).unwrap();
        assert_eq!(stream.channel().cmar.get(), second.as_ptr() as u32);
        assert_eq!(stream.channel().cndtr.get(), 24);
    }

    #[test]
    fn restart_for_same_target_skips_busy_check() {
        // An in-flight transfer for the same peripheral address is
        // replaced, not refused. Pinned deliberately: retargeting is the
        // only condition the busy check guards.
        let mut stream = started(0x4000_4404);
        assert!(stream.is_busy());

        let replacement = [0u8; 12];
        stream.start(0x4000_4404, DataStream::from_slice(&replacement)).unwrap();
        assert_eq!(stream.channel().cndtr.get(), 12);
        assert_eq!(stream.channel().cmar.get(), replacement.as_ptr() as u32);
    }

    #[test]
    fn retargeting_busy_channel_is_refused() {
        let mut stream = started(0x4000_4404);
        let cmar = stream.channel().cmar.get();
        let cndtr = stream.channel().cndtr.get();

        let other = [0u8; 64];
        let result = stream.start(0x4000_8004, DataStream::from_slice(&other));

        assert_eq!(result, Err(Error::Busy));
        // The in-flight transfer is untouched.
        assert_eq!(stream.channel().cpar.get(), 0x4000_4404);
        assert_eq!(stream.channel().cmar.get(), cmar);
        assert_eq!(stream.channel().cndtr.get(), cndtr);
        assert!(stream.channel().enabled.get());
    }

    #[test]
    fn retargeting_idle_channel_is_accepted() {
        let mut stream = started(0x4000_4404);
        stream.channel().cndtr.set(0);

        let other = [0u8; 6];
        stream.start(0x4000_8004, DataStream::from_slice(&other)).unwrap();
        assert_eq!(stream.channel().cpar.get(), 0x4000_8004);
    }

    #[test]
    fn direction_rewrite_keeps_other_settings() {
        let mut stream = stream();
        stream.set_direction(Direction::MemoryToPeriph);

        let config = stream.channel().config.get().unwrap();
        assert_eq!(config.direction, Direction::MemoryToPeriph);
        assert_eq!(config.priority, Config::default().priority);
    }

    #[test]
    fn start_notify_arms_interrupt_sources() {
        let mut stream = stream();
        let buf = [0u8; 4];

        stream.start_notify(0x4000_0000, DataStream::from_slice(&buf)).unwrap();

        assert!(stream.channel().is_listening(DmaEvent::HalfTransfer));
        assert!(stream.channel().is_listening(DmaEvent::TransferComplete));
        #[cfg(feature = "error-detect")]
        assert!(stream.channel().is_listening(DmaEvent::TransferError));
    }

    #[test]
    fn refused_start_notify_leaves_sources_masked() {
        let mut stream = started(0x4000_4404);

        let other = [0u8; 4];
        let result = stream.start_notify(0x4000_8004, DataStream::from_slice(&other));

        assert_eq!(result, Err(Error::Busy));
        assert!(!stream.channel().is_listening(DmaEvent::HalfTransfer));
        assert!(!stream.channel().is_listening(DmaEvent::TransferComplete));
    }

    #[test]
    fn stop_returns_once_enable_drains() {
        let mut stream = started(0x4000_0000);
        stream.channel().disable_delay.set(5);

        assert_eq!(stream.stop(), Ok(()));
        assert!(!stream.channel().enabled.get());
    }

    #[test]
    fn stop_times_out_when_enable_sticks() {
        let mut stream = started(0x4000_0000);
        stream.channel().disable_delay.set(2000);

        assert_eq!(stream.stop(), Err(Error::Timeout));
    }

    #[test]
    fn stop_of_idle_channel_is_immediate() {
        let mut stream = stream();
        assert_eq!(stream.stop(), Ok(()));
    }

    #[test]
    fn stop_notify_masks_sources_without_waiting() {
        let mut stream = stream();
        let buf = [0u8; 4];
        stream.start_notify(0x4000_0000, DataStream::from_slice(&buf)).unwrap();
        stream.channel().disable_delay.set(2000);

        stream.stop_notify();

        assert!(!stream.channel().is_listening(DmaEvent::HalfTransfer));
        assert!(!stream.channel().is_listening(DmaEvent::TransferComplete));
        #[cfg(feature = "error-detect")]
        assert!(!stream.channel().is_listening(DmaEvent::TransferError));
    }

    #[test]
    fn poll_succeeds_when_flag_raises_in_time() {
        let mut stream = started(0x4000_0000);
        stream
            .channel()
            .raise_at(DmaEvent::TransferComplete, current_tick() + 50);

        assert_eq!(stream.poll_status(Operation::Transfer, Some(100)), Ok(()));
        assert!(!stream.channel().flag(DmaEvent::TransferComplete));
    }

    #[test]
    fn poll_times_out_after_the_limit() {
        let mut stream = started(0x4000_0000);

        let before = current_tick();
        assert_eq!(
            stream.poll_status(Operation::Transfer, Some(100)),
            Err(Error::Timeout)
        );
        assert!(current_tick() - before >= 100);
    }

    #[test]
    fn poll_reports_error_ahead_of_completion() {
        let mut stream = started(0x4000_0000);
        stream.channel().raise(DmaEvent::TransferError);
        stream.channel().raise(DmaEvent::TransferComplete);

        assert_eq!(
            stream.poll_status(Operation::Transfer, Some(100)),
            Err(Error::Transfer)
        );
        // The error flag is consumed, the completion flag is not.
        assert!(!stream.channel().flag(DmaEvent::TransferError));
        assert!(stream.channel().flag(DmaEvent::TransferComplete));
    }

    #[test]
    fn poll_for_half_transfer_keeps_completion_flag() {
        let mut stream = started(0x4000_0000);
        stream.channel().raise(DmaEvent::HalfTransfer);
        stream.channel().raise(DmaEvent::TransferComplete);

        assert_eq!(stream.poll_status(Operation::HalfTransfer, None), Ok(()));
        assert!(!stream.channel().flag(DmaEvent::HalfTransfer));
        assert!(stream.channel().flag(DmaEvent::TransferComplete));
    }

    #[test]
    fn poll_for_transfer_clears_half_flag_too() {
        let mut stream = started(0x4000_0000);
        stream.channel().raise(DmaEvent::HalfTransfer);
        stream.channel().raise(DmaEvent::TransferComplete);

        assert_eq!(stream.poll_status(Operation::Transfer, None), Ok(()));
        assert!(!stream.channel().flag(DmaEvent::HalfTransfer));
        assert!(!stream.channel().flag(DmaEvent::TransferComplete));
    }

    #[test]
    fn poll_measures_time_across_counter_wrap() {
        set_tick(u32::MAX - 20);
        let mut stream = started(0x4000_0000);

        assert_eq!(
            stream.poll_status(Operation::Transfer, Some(100)),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn errors_stick_until_next_accepted_start() {
        let mut stream = started(0x4000_0000);
        stream.channel().raise(DmaEvent::TransferError);

        assert_eq!(
            stream.poll_status(Operation::Transfer, Some(10)),
            Err(Error::Transfer)
        );
        assert!(stream.errors().contains(Errors::TRANSFER));

        // Status checks and further polls leave the record alone.
        let _ = stream.is_busy();
        assert_eq!(
            stream.poll_status(Operation::Transfer, Some(10)),
            Err(Error::Timeout)
        );
        assert!(stream.errors().contains(Errors::TRANSFER));

        stream.channel().cndtr.set(0);
        let buf = [0u8; 4];
        stream.start(0x4000_0000, DataStream::from_slice(&buf)).unwrap();
        assert!(stream.errors().is_none());
    }

    #[test]
    fn refused_start_keeps_error_record() {
        let mut stream = started(0x4000_4404);
        stream.channel().raise(DmaEvent::TransferError);
        let _ = stream.poll_status(Operation::Transfer, Some(10));
        assert!(stream.errors().contains(Errors::TRANSFER));

        let other = [0u8; 4];
        let result = stream.start(0x4000_8004, DataStream::from_slice(&other));
        assert_eq!(result, Err(Error::Busy));
        assert!(stream.errors().contains(Errors::TRANSFER));
    }

    #[test]
    fn one_shot_completion_masks_its_source() {
        let mut stream = stream();
        let buf = [0u8; 4];
        stream.start_notify(0x4000_0000, DataStream::from_slice(&buf)).unwrap();

        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        stream.set_complete_callback(move || counter.set(counter.get() + 1));

        stream.channel().raise(DmaEvent::TransferComplete);
        dispatch(&mut stream);
        assert_eq!(fired.get(), 1);
        assert!(!stream.channel().is_listening(DmaEvent::TransferComplete));

        // A spurious flag no longer reaches the handler.
        stream.channel().raise(DmaEvent::TransferComplete);
        dispatch(&mut stream);
        assert_eq!(fired.get(), 1);

        // A new armed transfer does.
        stream.channel_mut().clear_flag(DmaEvent::TransferComplete);
        stream.channel().cndtr.set(0);
        stream.start_notify(0x4000_0000, DataStream::from_slice(&buf)).unwrap();
        stream.channel().raise(DmaEvent::TransferComplete);
        dispatch(&mut stream);
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn circular_completion_stays_armed() {
        let config = Config {
            circular: true,
            ..Config::default()
        };
        let mut stream: Stream = DmaStream::init(MockChannel::new(), &config);
        let buf = [0u8; 4];
        stream.start_notify(0x4000_0000, DataStream::from_slice(&buf)).unwrap();

        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        stream.set_complete_callback(move || counter.set(counter.get() + 1));

        for _ in 0..3 {
            stream.channel().raise(DmaEvent::TransferComplete);
            dispatch(&mut stream);
        }
        assert_eq!(fired.get(), 3);
        assert!(stream.channel().is_listening(DmaEvent::TransferComplete));
    }

    #[test]
    fn one_invocation_services_every_raised_flag() {
        let mut stream = stream();
        let buf = [0u8; 4];
        stream.start_notify(0x4000_0000, DataStream::from_slice(&buf)).unwrap();

        let half = Rc::new(Cell::new(0));
        let complete = Rc::new(Cell::new(0));
        let half_counter = half.clone();
        let complete_counter = complete.clone();
        stream.set_half_complete_callback(move || half_counter.set(half_counter.get() + 1));
        stream.set_complete_callback(move || complete_counter.set(complete_counter.get() + 1));

        stream.channel().raise(DmaEvent::HalfTransfer);
        stream.channel().raise(DmaEvent::TransferComplete);
        stream.handle_interrupt();

        assert_eq!(half.get(), 1);
        assert_eq!(complete.get(), 1);
        assert!(!stream.channel().flag(DmaEvent::HalfTransfer));
        assert!(!stream.channel().flag(DmaEvent::TransferComplete));
    }

    #[test]
    fn unregistered_callbacks_are_skipped() {
        let mut stream = started(0x4000_0000);
        stream.channel().raise(DmaEvent::HalfTransfer);
        stream.channel().raise(DmaEvent::TransferComplete);
        stream.channel().raise(DmaEvent::TransferError);

        stream.handle_interrupt();
    }

    #[cfg(feature = "error-detect")]
    #[test]
    fn error_interrupt_records_and_notifies() {
        let mut stream = started(0x4000_0000);

        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        stream.set_error_callback(move || counter.set(counter.get() + 1));

        stream.channel().raise(DmaEvent::TransferError);
        stream.handle_interrupt();

        assert_eq!(fired.get(), 1);
        assert!(stream.errors().contains(Errors::TRANSFER));
        assert!(!stream.channel().flag(DmaEvent::TransferError));
    }
}
