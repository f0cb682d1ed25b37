//! The hardware the control core drives, expressed as traits so that the same logic runs on the
//! target and against simulated hardware in tests.

use crate::TimeMillis;
use core::convert::Infallible;
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};
use evse_protocol::types::Temperatures;

/// Free running millisecond counter, expected to wrap.
pub trait Clock {
    fn now(&self) -> TimeMillis;
}

/// A single ADC channel, scaled to 10 bits (0 to 1023).
pub trait AnalogInput {
    fn read(&mut self) -> u16;
}

/// The timer generating the pilot waveform.
///
/// Implementations may touch several registers per call, callers are responsible for masking
/// interrupts around them.
pub trait PilotTimer {
    /// Hold the pilot at a constant level, `true` for +12V and `false` for -12V.
    fn set_constant(&mut self, high: bool);

    /// Run the 1kHz oscillator with the given duty cycle in tenths of a percent.
    fn set_pwm(&mut self, duty_permille: u16);
}

/// Longest the controller may go between watchdog feeds, stations must not time out sooner.
pub const WATCHDOG_TIMEOUT_MS: TimeMillis = 600;

pub trait Watchdog {
    fn feed(&mut self);
}

/// Byte addressed non-volatile storage, erased cells read as `0xff`.
///
/// Writes are fire and forget.
pub trait NonVolatileStorage {
    fn read(&mut self, offset: u16, buffer: &mut [u8]);
    fn write(&mut self, offset: u16, data: &[u8]);

    fn read_u8(&mut self, offset: u16) -> u8 {
        let mut buffer = [0u8; 1];
        self.read(offset, &mut buffer);
        buffer[0]
    }

    fn read_u16(&mut self, offset: u16) -> u16 {
        let mut buffer = [0u8; 2];
        self.read(offset, &mut buffer);
        u16::from_le_bytes(buffer)
    }

    fn read_u32(&mut self, offset: u16) -> u32 {
        let mut buffer = [0u8; 4];
        self.read(offset, &mut buffer);
        u32::from_le_bytes(buffer)
    }

    fn write_u8(&mut self, offset: u16, value: u8) {
        self.write(offset, &[value]);
    }

    fn write_u16(&mut self, offset: u16, value: u16) {
        self.write(offset, &value.to_le_bytes());
    }

    fn write_u32(&mut self, offset: u16, value: u32) {
        self.write(offset, &value.to_le_bytes());
    }
}

pub trait TemperatureSensors {
    fn read(&mut self) -> Temperatures;
}

/// The concrete peripheral types of a board.
pub trait Board {
    type Clock: Clock;
    type Delay: DelayNs;
    type Watchdog: Watchdog;

    type PilotTimer: PilotTimer;
    type PilotAdc: AnalogInput;
    type CurrentAdc: AnalogInput;
    type VoltageAdc: AnalogInput;
    type ProximityAdc: AnalogInput;

    type Relay: OutputPin<Error = Infallible>;
    type AcLine1: InputPin<Error = Infallible>;
    type AcLine2: InputPin<Error = Infallible>;

    type GfiSense: InputPin<Error = Infallible>;
    type GfiTest: OutputPin<Error = Infallible>;

    type Storage: NonVolatileStorage;
    type Temperatures: TemperatureSensors;
}

/// Every peripheral the controller owns, handed over once at startup.
pub struct Peripherals<B: Board> {
    pub clock: B::Clock,
    pub delay: B::Delay,
    pub watchdog: B::Watchdog,

    pub pilot_timer: B::PilotTimer,
    pub pilot_adc: B::PilotAdc,
    pub current_adc: B::CurrentAdc,
    pub voltage_adc: B::VoltageAdc,
    pub proximity_adc: B::ProximityAdc,

    pub relay: B::Relay,
    pub ac_line_1: B::AcLine1,
    pub ac_line_2: B::AcLine2,

    pub gfi_sense: B::GfiSense,
    pub gfi_test: B::GfiTest,

    pub storage: B::Storage,
    pub temperatures: B::Temperatures,
}

/// Unwrapping for digital IO on targets where it cannot fail.
pub(crate) trait InfallibleExt<T> {
    fn into_ok(self) -> T;
}

impl<T> InfallibleExt<T> for Result<T, Infallible> {
    fn into_ok(self) -> T {
        match self {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

/// Busy wait for `millis`, feeding the watchdog as it goes.
pub(crate) fn settle<D: DelayNs, W: Watchdog>(delay: &mut D, watchdog: &mut W, millis: u32) {
    const STEP: u32 = 10;

    let mut remaining = millis;
    while remaining > 0 {
        let step = core::cmp::min(STEP, remaining);
        delay.delay_ms(step);
        watchdog.feed();
        remaining -= step;
    }
}
