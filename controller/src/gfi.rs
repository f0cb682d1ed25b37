use crate::hal::{settle, InfallibleExt, Watchdog};
use core::convert::Infallible;
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};
use log::{debug, warn};
use portable_atomic::{AtomicBool, Ordering};

const SELF_TEST_CYCLES: usize = 60;
const SELF_TEST_PULSE_ON_US: u32 = 8_333;
const SELF_TEST_PULSE_OFF_US: u32 = 8_334;
const CLEAR_POLL_MS: u32 = 50;
const CLEAR_POLLS_BEFORE_TEST: usize = 20;
const CLEAR_POLLS_AFTER_TEST: usize = 40;
const SETTLE_AFTER_TEST_MS: u32 = 1_000;

/// State shared between the GFI edge interrupt and the control loop.
///
/// The interrupt only ever sets flags, the control loop reads and clears them. Each flag is a
/// single atomic so neither side can observe a partial update.
pub struct GroundFaultFlag {
    fault: AtomicBool,
    test_in_progress: AtomicBool,
    test_fired: AtomicBool,
}

impl Default for GroundFaultFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl GroundFaultFlag {
    pub const fn new() -> Self {
        Self {
            fault: AtomicBool::new(false),
            test_in_progress: AtomicBool::new(false),
            test_fired: AtomicBool::new(false),
        }
    }

    /// To be called from the rising edge interrupt of the GFI sense line, and nowhere else.
    pub fn on_rising_edge(&self) {
        if self.test_in_progress.load(Ordering::Acquire) {
            self.test_fired.store(true, Ordering::Release);
        } else {
            self.fault.store(true, Ordering::Release);
        }
    }

    pub fn is_set(&self) -> bool {
        self.fault.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.fault.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestResult {
    Passed,
    /// The sense line was still active before any pulses were injected.
    NeverCleared,
    /// Pulses were injected but the latch never fired.
    NoFaultDetected,
    /// The sense line stayed active after the pulses stopped.
    StillFaulted,
}

impl SelfTestResult {
    pub fn passed(self) -> bool {
        self == Self::Passed
    }
}

pub struct GroundFaultLatch<'a, S, T> {
    flag: &'a GroundFaultFlag,
    sense: S,
    test: T,
}

impl<'a, S, T> GroundFaultLatch<'a, S, T>
where
    S: InputPin<Error = Infallible>,
    T: OutputPin<Error = Infallible>,
{
    pub fn new(flag: &'a GroundFaultFlag, sense: S, mut test: T) -> Self {
        test.set_low().into_ok();

        let mut latch = Self { flag, sense, test };
        latch.reset();
        latch
    }

    pub fn fault(&self) -> bool {
        self.flag.is_set()
    }

    /// Clears the latch if the sense line has returned low, returns `true` if the latch is clear.
    pub fn reset(&mut self) -> bool {
        if self.sense.is_low().into_ok() {
            self.flag.clear();
        } else if self.flag.is_set() {
            debug!("GFI sense line still active, latch not cleared");
        }
        !self.flag.is_set()
    }

    /// Injects test pulses and checks the latch responds to them.
    ///
    /// Blocks for a bounded time, feeding the watchdog after every pulse and poll.
    pub fn self_test<D: DelayNs, W: Watchdog>(
        &mut self,
        delay: &mut D,
        watchdog: &mut W,
    ) -> SelfTestResult {
        if !self.wait_for_clear(delay, watchdog, CLEAR_POLLS_BEFORE_TEST) {
            warn!("GFI self test: sense line never cleared");
            return SelfTestResult::NeverCleared;
        }

        self.flag.test_fired.store(false, Ordering::Release);
        self.flag.test_in_progress.store(true, Ordering::Release);

        for _ in 0..SELF_TEST_CYCLES {
            self.test.set_high().into_ok();
            delay.delay_us(SELF_TEST_PULSE_ON_US);
            self.test.set_low().into_ok();
            delay.delay_us(SELF_TEST_PULSE_OFF_US);

            watchdog.feed();

            if self.flag.test_fired.load(Ordering::Acquire) {
                break;
            }
        }

        self.flag.test_in_progress.store(false, Ordering::Release);
        let fired = self.flag.test_fired.load(Ordering::Acquire);

        if !self.wait_for_clear(delay, watchdog, CLEAR_POLLS_AFTER_TEST) {
            warn!("GFI self test: sense line still active after test");
            return SelfTestResult::StillFaulted;
        }

        settle(delay, watchdog, SETTLE_AFTER_TEST_MS);
        self.flag.clear();

        if fired {
            debug!("GFI self test passed");
            SelfTestResult::Passed
        } else {
            warn!("GFI self test: no fault detected");
            SelfTestResult::NoFaultDetected
        }
    }

    fn wait_for_clear<D: DelayNs, W: Watchdog>(
        &mut self,
        delay: &mut D,
        watchdog: &mut W,
        polls: usize,
    ) -> bool {
        for _ in 0..polls {
            if self.sense.is_low().into_ok() {
                return true;
            }
            settle(delay, watchdog, CLEAR_POLL_MS);
        }
        self.sense.is_low().into_ok()
    }
}
