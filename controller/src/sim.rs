//! Simulated station hardware for host tests.
//!
//! Every fake shares its state through `Rc` handles so a test can keep poking at the hardware
//! after the peripherals have been handed to the controller.

use crate::{
    gfi::GroundFaultFlag,
    hal::{
        AnalogInput, Board, Clock, NonVolatileStorage, Peripherals, PilotTimer,
        TemperatureSensors, Watchdog,
    },
    TimeMillis,
};
use core::convert::Infallible;
use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, InputPin, OutputPin},
};
use evse_protocol::types::Temperatures;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

pub(crate) const PILOT_NEGATIVE_COUNTS: u16 = 20;

/// Peak high pilot readings a vehicle produces in each state, against the default thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Vehicle {
    Absent,
    Connected,
    Charging,
    VentilationRequired,
}

impl Vehicle {
    fn counts(self) -> u16 {
        match self {
            Self::Absent => 950,
            Self::Connected => 820,
            Self::Charging => 730,
            Self::VentilationRequired => 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SimPilotOutput {
    Constant(bool),
    Pwm(u16),
}

#[derive(Clone, Default)]
pub(crate) struct SimClock(Rc<Cell<TimeMillis>>);

impl SimClock {
    pub(crate) fn advance(&self, millis: TimeMillis) {
        self.0.set(self.0.get().wrapping_add(millis));
    }
}

impl Clock for SimClock {
    fn now(&self) -> TimeMillis {
        self.0.get()
    }
}

pub(crate) struct SimDelay {
    clock: SimClock,
    carry_ns: u32,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        let total = self.carry_ns as u64 + ns as u64;
        self.clock.advance((total / 1_000_000) as u32);
        self.carry_ns = (total % 1_000_000) as u32;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(ms);
    }
}

/// Counts feeds and records the longest stretch the watchdog went hungry.
#[derive(Default)]
pub(crate) struct FeedLog {
    clock: SimClock,
    feeds: Cell<u32>,
    last_feed: Cell<TimeMillis>,
    longest_gap: Cell<TimeMillis>,
}

impl FeedLog {
    fn gap(&self) -> TimeMillis {
        self.clock.now().wrapping_sub(self.last_feed.get())
    }
}

#[derive(Clone, Default)]
pub(crate) struct SimWatchdog(Rc<FeedLog>);

impl Watchdog for SimWatchdog {
    fn feed(&mut self) {
        let log = &self.0;
        log.longest_gap.set(log.longest_gap.get().max(log.gap()));
        log.last_feed.set(log.clock.now());
        log.feeds.set(log.feeds.get() + 1);
    }
}

pub(crate) struct SimPilotTimer(Rc<Cell<SimPilotOutput>>);

impl PilotTimer for SimPilotTimer {
    fn set_constant(&mut self, high: bool) {
        self.0.set(SimPilotOutput::Constant(high));
    }

    fn set_pwm(&mut self, duty_permille: u16) {
        self.0.set(SimPilotOutput::Pwm(duty_permille));
    }
}

/// The pilot line as seen by the ADC, driven by both the station output and the vehicle.
pub(crate) struct SimPilot {
    output: Rc<Cell<SimPilotOutput>>,
    high: Cell<u16>,
    low: Cell<u16>,
    phase: Cell<bool>,
}

impl SimPilot {
    /// Sets the raw peaks seen while the oscillator runs.
    pub(crate) fn set(&self, high: u16, low: u16) {
        self.high.set(high);
        self.low.set(low);
    }

    pub(crate) fn vehicle(&self, vehicle: Vehicle) {
        self.high.set(vehicle.counts());
    }

    /// Without the vehicle diode the negative half cycle is not clamped.
    pub(crate) fn diode_present(&self, present: bool) {
        self.low
            .set(if present { PILOT_NEGATIVE_COUNTS } else { 400 });
    }

    fn read(&self) -> u16 {
        match self.output.get() {
            SimPilotOutput::Constant(false) => PILOT_NEGATIVE_COUNTS,
            SimPilotOutput::Constant(true) => self.high.get(),
            SimPilotOutput::Pwm(_) => {
                let phase = !self.phase.get();
                self.phase.set(phase);
                if phase {
                    self.high.get()
                } else {
                    self.low.get()
                }
            }
        }
    }
}

pub(crate) struct SimPilotAdc(Rc<SimPilot>);

impl AnalogInput for SimPilotAdc {
    fn read(&mut self) -> u16 {
        self.0.read()
    }
}

/// Line current as a 60Hz sine around mid scale.
pub(crate) struct SimCurrent {
    clock: SimClock,
    amplitude: Cell<f32>,
    micros: Cell<u32>,
}

impl SimCurrent {
    /// Sets the sine amplitude that reads back as roughly `amps` with the default calibration.
    pub(crate) fn set_amps(&self, amps: u32) {
        let rms_counts = amps as f32 * 1000.0 / 184.0;
        self.amplitude.set(rms_counts * core::f32::consts::SQRT_2);
    }
}

pub(crate) struct SimCurrentAdc(Rc<SimCurrent>);

impl AnalogInput for SimCurrentAdc {
    fn read(&mut self) -> u16 {
        const STEP_US: u32 = 250;

        let current = &self.0;
        let micros = current.micros.get() + STEP_US;
        current.micros.set(micros);
        if micros % 1000 == 0 {
            current.clock.advance(1);
        }

        let angle = 2.0 * core::f32::consts::PI * 60.0 * micros as f32 / 1_000_000.0;
        (512.0 + current.amplitude.get() * angle.sin()).round() as u16
    }
}

#[derive(Clone)]
pub(crate) struct SimFixedAdc(Rc<Cell<u16>>);

impl SimFixedAdc {
    pub(crate) fn set(&self, value: u16) {
        self.0.set(value);
    }
}

impl AnalogInput for SimFixedAdc {
    fn read(&mut self) -> u16 {
        self.0.get()
    }
}

/// Contactor plus the two opto isolated AC sense inputs behind it.
pub(crate) struct SimMains {
    relay_closed: Cell<bool>,
    relay_welded: Cell<bool>,
    line_powered: [Cell<bool>; 2],
    grounded: Cell<bool>,
}

impl SimMains {
    pub(crate) fn relay_closed(&self) -> bool {
        self.relay_closed.get()
    }

    pub(crate) fn weld_relay(&self, welded: bool) {
        self.relay_welded.set(welded);
    }

    pub(crate) fn set_grounded(&self, grounded: bool) {
        self.grounded.set(grounded);
    }

    /// Only line 1 carries voltage, as on a 120V supply.
    pub(crate) fn wire_l1(&self) {
        self.line_powered[1].set(false);
    }

    fn line_live(&self, line: usize) -> bool {
        (self.relay_closed.get() || self.relay_welded.get())
            && self.line_powered[line].get()
            && self.grounded.get()
    }
}

pub(crate) struct SimRelay(Rc<SimMains>);

impl ErrorType for SimRelay {
    type Error = Infallible;
}

impl OutputPin for SimRelay {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.relay_closed.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.relay_closed.set(true);
        Ok(())
    }
}

/// Active low, as the opto isolators pull the input down while the line is live.
pub(crate) struct SimAcLine {
    mains: Rc<SimMains>,
    line: usize,
}

impl ErrorType for SimAcLine {
    type Error = Infallible;
}

impl InputPin for SimAcLine {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.mains.line_live(self.line))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.mains.line_live(self.line))
    }
}

/// The GFI current transformer and its test winding.
pub(crate) struct SimGfi {
    flag: &'static GroundFaultFlag,
    sense: Cell<bool>,
    raised_by_test: Cell<bool>,
    responds_to_test: Cell<bool>,
    sticks_after_test: Cell<bool>,
    test_pulses: Cell<usize>,
}

impl SimGfi {
    /// A real ground fault: the sense line goes high and the edge interrupt fires.
    pub(crate) fn trip(&self) {
        self.sense.set(true);
        self.flag.on_rising_edge();
    }

    pub(crate) fn release(&self) {
        self.sense.set(false);
        self.raised_by_test.set(false);
    }

    pub(crate) fn set_responds_to_test(&self, responds: bool) {
        self.responds_to_test.set(responds);
    }

    pub(crate) fn set_sticks_after_test(&self, sticks: bool) {
        self.sticks_after_test.set(sticks);
    }

    pub(crate) fn test_pulses(&self) -> usize {
        self.test_pulses.get()
    }
}

pub(crate) struct SimGfiSense(Rc<SimGfi>);

impl ErrorType for SimGfiSense {
    type Error = Infallible;
}

impl InputPin for SimGfiSense {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.sense.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.sense.get())
    }
}

pub(crate) struct SimGfiTest(Rc<SimGfi>);

impl ErrorType for SimGfiTest {
    type Error = Infallible;
}

impl OutputPin for SimGfiTest {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let gfi = &self.0;
        if gfi.raised_by_test.get() && !gfi.sticks_after_test.get() {
            gfi.sense.set(false);
            gfi.raised_by_test.set(false);
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let gfi = &self.0;
        gfi.test_pulses.set(gfi.test_pulses.get() + 1);
        if gfi.responds_to_test.get() {
            if !gfi.sense.get() {
                gfi.raised_by_test.set(true);
            }
            gfi.sense.set(true);
            gfi.flag.on_rising_edge();
        }
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct MemoryStorage(Rc<RefCell<[u8; 64]>>);

impl MemoryStorage {
    pub(crate) fn erased() -> Self {
        Self(Rc::new(RefCell::new([0xff; 64])))
    }
}

impl NonVolatileStorage for MemoryStorage {
    fn read(&mut self, offset: u16, buffer: &mut [u8]) {
        let offset = offset as usize;
        buffer.copy_from_slice(&self.0.borrow()[offset..offset + buffer.len()]);
    }

    fn write(&mut self, offset: u16, data: &[u8]) {
        let offset = offset as usize;
        self.0.borrow_mut()[offset..offset + data.len()].copy_from_slice(data);
    }
}

#[derive(Clone)]
pub(crate) struct SimTemperatures(Rc<RefCell<Temperatures>>);

impl SimTemperatures {
    pub(crate) fn set_ambient(&self, tenths: i16) {
        self.0.borrow_mut().ambient = Some(tenths);
    }

    pub(crate) fn set_infrared(&self, tenths: Option<i16>) {
        self.0.borrow_mut().infrared = tenths;
    }
}

impl TemperatureSensors for SimTemperatures {
    fn read(&mut self) -> Temperatures {
        self.0.borrow().clone()
    }
}

pub(crate) struct SimBoard;

impl Board for SimBoard {
    type Clock = SimClock;
    type Delay = SimDelay;
    type Watchdog = SimWatchdog;

    type PilotTimer = SimPilotTimer;
    type PilotAdc = SimPilotAdc;
    type CurrentAdc = SimCurrentAdc;
    type VoltageAdc = SimFixedAdc;
    type ProximityAdc = SimFixedAdc;

    type Relay = SimRelay;
    type AcLine1 = SimAcLine;
    type AcLine2 = SimAcLine;

    type GfiSense = SimGfiSense;
    type GfiTest = SimGfiTest;

    type Storage = MemoryStorage;
    type Temperatures = SimTemperatures;
}

pub(crate) struct Sim {
    pub(crate) clock: SimClock,
    pub(crate) gfi_flag: &'static GroundFaultFlag,
    pub(crate) pilot: Rc<SimPilot>,
    pub(crate) current: Rc<SimCurrent>,
    pub(crate) voltage: SimFixedAdc,
    pub(crate) proximity: SimFixedAdc,
    pub(crate) mains: Rc<SimMains>,
    pub(crate) gfi: Rc<SimGfi>,
    pub(crate) storage: MemoryStorage,
    pub(crate) temperatures: SimTemperatures,
    watchdog: SimWatchdog,
    pilot_output: Rc<Cell<SimPilotOutput>>,
}

impl Sim {
    pub(crate) fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let clock = SimClock::default();
        let gfi_flag: &'static GroundFaultFlag = Box::leak(Box::new(GroundFaultFlag::new()));
        let pilot_output = Rc::new(Cell::new(SimPilotOutput::Constant(true)));

        Self {
            gfi_flag,
            pilot: Rc::new(SimPilot {
                output: pilot_output.clone(),
                high: Cell::new(Vehicle::Absent.counts()),
                low: Cell::new(PILOT_NEGATIVE_COUNTS),
                phase: Cell::new(false),
            }),
            current: Rc::new(SimCurrent {
                clock: clock.clone(),
                amplitude: Cell::new(0.0),
                micros: Cell::new(0),
            }),
            voltage: SimFixedAdc(Rc::new(Cell::new(0))),
            proximity: SimFixedAdc(Rc::new(Cell::new(1023))),
            mains: Rc::new(SimMains {
                relay_closed: Cell::new(false),
                relay_welded: Cell::new(false),
                line_powered: [Cell::new(true), Cell::new(true)],
                grounded: Cell::new(true),
            }),
            gfi: Rc::new(SimGfi {
                flag: gfi_flag,
                sense: Cell::new(false),
                raised_by_test: Cell::new(false),
                responds_to_test: Cell::new(true),
                sticks_after_test: Cell::new(false),
                test_pulses: Cell::new(0),
            }),
            storage: MemoryStorage::erased(),
            temperatures: SimTemperatures(Rc::new(RefCell::new(Temperatures {
                ambient: Some(250),
                ambient_secondary: None,
                infrared: None,
            }))),
            watchdog: SimWatchdog(Rc::new(FeedLog {
                clock: clock.clone(),
                ..Default::default()
            })),
            clock,
            pilot_output,
        }
    }

    pub(crate) fn now(&self) -> TimeMillis {
        self.clock.now()
    }

    pub(crate) fn advance(&self, millis: TimeMillis) {
        self.clock.advance(millis);
    }

    pub(crate) fn set_time(&self, now: TimeMillis) {
        self.clock.0.set(now);
    }

    pub(crate) fn delay(&self) -> SimDelay {
        SimDelay {
            clock: self.clock.clone(),
            carry_ns: 0,
        }
    }

    pub(crate) fn watchdog(&self) -> SimWatchdog {
        self.watchdog.clone()
    }

    pub(crate) fn watchdog_feeds(&self) -> u32 {
        self.watchdog.0.feeds.get()
    }

    /// Starts measuring feed gaps from now.
    pub(crate) fn reset_feed_gap(&self) {
        self.watchdog.0.last_feed.set(self.now());
        self.watchdog.0.longest_gap.set(0);
    }

    /// Longest time between feeds since the last reset, including the time since the last feed.
    pub(crate) fn longest_feed_gap(&self) -> TimeMillis {
        self.watchdog.0.longest_gap.get().max(self.watchdog.0.gap())
    }

    pub(crate) fn pilot_timer(&self) -> SimPilotTimer {
        SimPilotTimer(self.pilot_output.clone())
    }

    pub(crate) fn pilot_output(&self) -> SimPilotOutput {
        self.pilot_output.get()
    }

    pub(crate) fn pilot_adc(&self) -> SimPilotAdc {
        SimPilotAdc(self.pilot.clone())
    }

    pub(crate) fn current_adc(&self) -> SimCurrentAdc {
        SimCurrentAdc(self.current.clone())
    }

    pub(crate) fn relay(&self) -> SimRelay {
        SimRelay(self.mains.clone())
    }

    pub(crate) fn ac_line(&self, line: usize) -> SimAcLine {
        SimAcLine {
            mains: self.mains.clone(),
            line,
        }
    }

    pub(crate) fn gfi_sense(&self) -> SimGfiSense {
        SimGfiSense(self.gfi.clone())
    }

    pub(crate) fn gfi_test(&self) -> SimGfiTest {
        SimGfiTest(self.gfi.clone())
    }

    pub(crate) fn peripherals(&self) -> Peripherals<SimBoard> {
        Peripherals {
            clock: self.clock.clone(),
            delay: self.delay(),
            watchdog: self.watchdog(),
            pilot_timer: self.pilot_timer(),
            pilot_adc: self.pilot_adc(),
            current_adc: self.current_adc(),
            voltage_adc: self.voltage.clone(),
            proximity_adc: self.proximity.clone(),
            relay: self.relay(),
            ac_line_1: self.ac_line(0),
            ac_line_2: self.ac_line(1),
            gfi_sense: self.gfi_sense(),
            gfi_test: self.gfi_test(),
            storage: self.storage.clone(),
            temperatures: self.temperatures.clone(),
        }
    }
}
