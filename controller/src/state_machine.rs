//! The J1772 protocol and safety state machine.

use crate::{
    capacity::CurrentCapacityArbiter,
    changed::{checked_set, Changed},
    config::{
        Config, MAX_CURRENT_CAPACITY_L2, MIN_CURRENT_CAPACITY, NOMINAL_MILLIVOLTS_L1,
        NOMINAL_MILLIVOLTS_L2,
    },
    debounce::Debouncer,
    elapsed,
    gfi::GroundFaultFlag,
    hal::{Board, Peripherals, Watchdog},
    heartbeat::HeartbeatSupervision,
    limits::{EnergyMeter, SessionLimits},
    nv::Trip,
    pilot::{update_connection, ConnectionEdge, PilotReading, SteadyLevel},
    post::PostResult,
    station::Station,
    TimeMillis,
};
use evse_protocol::{
    event::{Event, EventKind},
    event_queue::{EventQueue, EventStatistics},
    flags::{ConfigFlag, PersistentFlags, StatusFlag, VolatileFlags},
    rpc::CommandError,
    types::{
        CapacityOutcome, CapacityRange, EvseState, HeartbeatStatus,
        Persistence, PilotLevel, SafetyCheck, ServiceLevel, ServiceLevelSetting, Settings,
        StateSnapshot, TripCounters,
    },
};
use log::{debug, info, warn};

pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Result of one safety check.
enum Check {
    Pass,
    Fault(EvseState),
    /// The vehicle left while faulted, start again from `Unknown`.
    Reset,
    /// Retries are exhausted.
    Escalate,
}

/// The parts of the observable state whose change is worth announcing.
#[derive(Clone, Copy, PartialEq, Eq)]
struct PublishedKey {
    state: EvseState,
    pilot_state: EvseState,
    capacity: u8,
    flags: u16,
}

pub struct EvseController<'a, B: Board> {
    config: Config,
    station: Station<'a, B>,

    flags: PersistentFlags,
    vflags: VolatileFlags,

    state: EvseState,
    pilot_state: EvseState,
    state_debounce: Debouncer<EvseState>,
    pilot_debounce: Debouncer<EvseState>,
    last_reading: Option<PilotReading>,

    capacity: CurrentCapacityArbiter,
    heartbeat: HeartbeatSupervision,
    limits: SessionLimits,
    energy: EnergyMeter,

    charging_current_milliamps: u32,
    voltage_millivolts: u32,

    charge_on_at: TimeMillis,
    charge_off_at: TimeMillis,
    elapsed_charge_seconds: u32,
    accumulated_charge_seconds: u32,

    gfi_fault_at: TimeMillis,
    gfi_retries: u8,
    no_ground_at: TimeMillis,
    no_ground_retries: u8,
    stuck_relay_since: Option<TimeMillis>,
    over_current_since: Option<TimeMillis>,

    last_meter_read: TimeMillis,
    last_temperature_read: Option<TimeMillis>,

    /// Set while latched in a hard fault, holding whether a disconnect may clear it.
    hard_fault: Option<bool>,
    post_failed_at: Option<TimeMillis>,
    reboot_requested: bool,

    events: EventQueue<Event, EVENT_QUEUE_DEPTH>,
    published: Option<PublishedKey>,
}

impl<'a, B: Board> EvseController<'a, B> {
    pub fn new(peripherals: Peripherals<B>, gfi_flag: &'a GroundFaultFlag, config: Config) -> Self {
        let mut station = Station::new(peripherals, gfi_flag, &config);
        let now = station.now();

        let flags = station.store.flags();
        let capacity = CurrentCapacityArbiter::new(station.store.max_hardware_capacity());
        let (heartbeat_interval, heartbeat_fallback) = station.store.heartbeat();

        let mut vflags = VolatileFlags::default();
        if config.auth_lock_on_disconnect {
            vflags.insert(StatusFlag::AuthLocked);
        }

        Self {
            station,

            flags,
            vflags,

            state: EvseState::Unknown,
            pilot_state: EvseState::Unknown,
            state_debounce: Debouncer::new(EvseState::Unknown, now),
            pilot_debounce: Debouncer::new(EvseState::Unknown, now),
            last_reading: None,

            capacity,
            heartbeat: HeartbeatSupervision::new(heartbeat_interval, heartbeat_fallback, now),
            limits: SessionLimits::default(),
            energy: EnergyMeter::default(),

            charging_current_milliamps: 0,
            voltage_millivolts: if flags.is_l2() {
                NOMINAL_MILLIVOLTS_L2
            } else {
                NOMINAL_MILLIVOLTS_L1
            },

            charge_on_at: now,
            charge_off_at: now,
            elapsed_charge_seconds: 0,
            accumulated_charge_seconds: 0,

            gfi_fault_at: now,
            gfi_retries: 0,
            no_ground_at: now,
            no_ground_retries: 0,
            stuck_relay_since: None,
            over_current_since: None,

            last_meter_read: now,
            last_temperature_read: None,

            hard_fault: None,
            post_failed_at: None,
            reboot_requested: false,

            events: EventQueue::default(),
            published: None,

            config,
        }
    }

    /// Queues the boot event and runs the power on self test. Call once, before ticking.
    pub fn start(&mut self) {
        let now = self.station.now();
        self.events.push(Event {
            timestamp_milliseconds: now,
            kind: EventKind::Boot,
        });

        info!(
            "Starting, flags {:#06x}, trips {:?}",
            self.flags.bits(),
            self.station.store.trip_counters()
        );

        self.run_post();
        self.publish();
    }

    /// One pass of the control loop.
    pub fn tick(&mut self) {
        self.station.watchdog.feed();

        if let Some(recoverable) = self.hard_fault {
            self.service_hard_fault(recoverable);
        } else if let Some(failed_at) = self.post_failed_at {
            if elapsed(self.station.now(), failed_at) >= self.config.timing.post_retry {
                info!("Retrying self test");
                self.run_post();
            }
        } else {
            self.update(false);
        }

        self.publish();
    }

    fn run_post(&mut self) {
        self.post_failed_at = None;

        let flags = self.flags;
        match self.station.power_on_self_test(&self.config, &flags) {
            PostResult::Skipped => {
                self.vflags.insert(StatusFlag::AutoServiceLevelSkipped);
                self.apply_service_level(self.service_level(), false);
                self.state = EvseState::Unknown;
            }
            PostResult::Passed { service_level } => {
                let level = service_level.unwrap_or(self.service_level());
                self.apply_service_level(level, false);
                self.state = EvseState::Unknown;
            }
            PostResult::Failed(state) => {
                match state {
                    EvseState::StuckRelay => {
                        self.station.store.record_trip(Trip::StuckRelay);
                    }
                    EvseState::NoGround => {
                        self.station.store.record_trip(Trip::NoGround);
                    }
                    _ => {}
                }

                self.state = state;
                if self.config.capabilities.ul_compliance {
                    self.enter_hard_fault(false);
                } else {
                    self.post_failed_at = Some(self.station.now());
                }
            }
        }
    }

    /// While latched only the pilot is watched, for a disconnect that may clear the fault.
    fn service_hard_fault(&mut self, recoverable: bool) {
        let level = self.station.pilot.level();
        if level == PilotLevel::SteadyNeg12V {
            return;
        }

        let reading = self.station.sampler.sample();
        self.last_reading = Some(reading);
        update_connection(&mut self.vflags, level, reading, self.config.thresholds.a_b);

        if recoverable && !self.vflags.contains(StatusFlag::EvConnected) {
            info!("Vehicle disconnected, leaving hard fault");
            self.hard_fault = None;
            self.vflags.remove(StatusFlag::HardFault);
            if self.station.gfi.reset() {
                self.vflags.remove(StatusFlag::GfiTripped);
            }
            self.state = EvseState::Unknown;
        }
    }

    fn enter_hard_fault(&mut self, recoverable: bool) {
        let recoverable = self.hard_fault.map_or(recoverable, |r| r && recoverable);

        warn!(
            "Hard fault in {:?}, {}",
            self.state,
            if recoverable {
                "cleared by disconnect"
            } else {
                "power cycle required"
            }
        );

        self.hard_fault = Some(recoverable);
        self.vflags.insert(StatusFlag::HardFault);
        self.events.push(Event {
            timestamp_milliseconds: self.station.now(),
            kind: EventKind::HardFault { recoverable },
        });
    }

    fn update(&mut self, force: bool) {
        if self.state == EvseState::Disabled {
            return;
        }

        let now = self.station.now();
        let thresholds = self.config.thresholds.clone();
        let timing = self.config.timing.clone();
        let capabilities = self.config.capabilities.clone();

        let reading = self.station.sampler.sample();
        self.last_reading = Some(reading);
        if update_connection(
            &mut self.vflags,
            self.station.pilot.level(),
            reading,
            thresholds.a_b,
        ) == Some(ConnectionEdge::Connected)
        {
            info!("Vehicle connected");
            self.elapsed_charge_seconds = 0;
            self.accumulated_charge_seconds = 0;
            self.energy.reset();
        }
        let connected = self.vflags.contains(StatusFlag::EvConnected);

        self.read_meters(now);
        self.read_temperatures(now);

        if self.state == EvseState::Sleeping {
            if self.vflags.contains(StatusFlag::ChargingOn) {
                if reading.high >= thresholds.b_c
                    || self.charging_current_milliamps <= timing.sleep_release_milliamps
                    || elapsed(now, self.charge_off_at) >= timing.sleep_release_grace
                {
                    info!("Vehicle released current, going to sleep");
                    self.charging_off();
                }
                return;
            }

            if self.vflags.contains(StatusFlag::LimitSleep) && !connected {
                self.vflags.remove(StatusFlag::LimitSleep);
                self.state = EvseState::Unknown;
            } else {
                return;
            }
        }

        let mut previous = self.state;
        let mut candidate = previous;
        let mut fault = false;

        if capabilities.advanced_power {
            match self.check_power(now, previous, connected) {
                Check::Pass => {}
                Check::Fault(state) => {
                    candidate = state;
                    fault = true;
                }
                Check::Reset | Check::Escalate => {
                    self.state = EvseState::Unknown;
                    return;
                }
            }
        }

        if !fault && capabilities.gfi {
            match self.check_gfi(now, previous, connected) {
                Check::Pass => {}
                Check::Fault(state) => {
                    candidate = state;
                    fault = true;
                }
                Check::Reset => {
                    self.state = EvseState::Unknown;
                    return;
                }
                Check::Escalate => {
                    self.enter_hard_fault(true);
                    return;
                }
            }
        }

        if !fault && self.temperature_checks_active() && self.station.temperatures.panic() {
            warn!(
                "Temperature panic: {:?}",
                self.station.temperatures.latest()
            );
            candidate = EvseState::OverTemperature;
            fault = true;
        }

        if !fault && self.over_current(now, previous) {
            candidate = EvseState::OverCurrent;
            fault = true;
        }

        let mut pilot_candidate = candidate;

        if !fault {
            if previous.is_fault() {
                self.station.pilot.set_level(SteadyLevel::Positive);
                previous = EvseState::Unknown;
                self.state = EvseState::Unknown;
            }

            let pilot_level = self.station.pilot.level();
            (candidate, pilot_candidate) = if self.flags.diode_check_enabled()
                && pilot_level == PilotLevel::Pwm
                && reading.low >= thresholds.diode_check
            {
                (EvseState::DiodeCheckFailed, EvseState::DiodeCheckFailed)
            } else {
                self.classify(reading.high, pilot_level)
            };

            if candidate == EvseState::C && self.vflags.contains(StatusFlag::AuthLocked) {
                candidate = EvseState::B;
            }
        }

        let hold = if candidate == EvseState::A {
            timing.state_a_hold
        } else {
            timing.state_hold
        };
        let committed = self.state_debounce.update(candidate, now, hold);
        if let Some(pilot_state) = self
            .pilot_debounce
            .update(pilot_candidate, now, timing.state_hold)
        {
            self.pilot_state = pilot_state;
        }

        let next = if fault {
            candidate
        } else {
            committed.unwrap_or(self.state)
        };

        if next != previous || force {
            self.state = next;

            if capabilities.proximity_pilot
                && next != previous
                && matches!(next, EvseState::B | EvseState::C)
            {
                self.apply_proximity_limit();
            }

            self.enter_state(previous);

            if capabilities.ul_compliance
                && self.hard_fault != Some(false)
                && self.state.is_fault()
                && previous == EvseState::C
                && elapsed(now, self.charge_on_at) <= timing.early_fault_window
            {
                warn!("Fault within the early window after closing the contactor");
                self.enter_hard_fault(false);
            }
        }

        if self.hard_fault.is_some() {
            return;
        }

        self.supervise_heartbeat(now);
        self.restore_temperature();

        if self.state == EvseState::C {
            let elapsed_seconds = elapsed(now, self.charge_on_at) / 1000;
            if elapsed_seconds != self.elapsed_charge_seconds {
                self.elapsed_charge_seconds = elapsed_seconds;
                self.throttle_temperature();
                self.check_limits();
            }
        }
    }

    /// Raw classification of the pilot high peak, as (state candidate, pilot state).
    fn classify(&self, high: u16, pilot_level: PilotLevel) -> (EvseState, EvseState) {
        let thresholds = &self.config.thresholds;

        if high >= thresholds.a_b {
            (EvseState::A, EvseState::A)
        } else if high >= thresholds.b_c {
            (EvseState::B, EvseState::B)
        } else if high >= thresholds.c_d {
            // The vehicle may only draw once it has been offered current
            if pilot_level == PilotLevel::Pwm {
                (EvseState::C, EvseState::C)
            } else {
                (EvseState::B, EvseState::C)
            }
        } else if high > thresholds.d {
            if self.flags.vent_required_enabled() {
                (EvseState::D, EvseState::D)
            } else {
                (EvseState::C, EvseState::D)
            }
        } else {
            (EvseState::Unknown, EvseState::Unknown)
        }
    }

    fn check_power(&mut self, now: TimeMillis, previous: EvseState, connected: bool) -> Check {
        let timing = &self.config.timing;
        let ground_check_delay = timing.ground_check_delay;
        let retry_timeout = timing.fault_retry_timeout;
        let retry_count = timing.fault_retry_count;

        let lines = self.station.lines.read();
        let relay_closed = self.station.contactor.is_closed();
        let since_charge_on = elapsed(now, self.charge_on_at);

        if self.config.capabilities.ground_monitor {
            // Line 1 is the ground test, line 2 the relay test
            if self.flags.ground_check_enabled() && !lines.line_1 {
                return self.no_ground(now, previous);
            }
            if relay_closed {
                if since_charge_on > ground_check_delay && !lines.line_2 {
                    return Check::Fault(EvseState::RelayClosureFault);
                }
                return Check::Pass;
            }
            if self.flags.stuck_relay_check_enabled() {
                return self.check_stuck_relay(now, previous, lines.line_2);
            }
            return Check::Pass;
        }

        if relay_closed {
            if since_charge_on > ground_check_delay {
                if self.flags.ground_check_enabled() && lines.both_open() {
                    return self.no_ground(now, previous);
                }

                if self.vflags.contains(StatusFlag::AutoServiceLevelSkipped)
                    && previous == EvseState::C
                {
                    if lines.both_live() {
                        info!("Detected L2 supply while charging");
                        self.apply_service_level(ServiceLevel::L2, false);
                    }
                    self.vflags.remove(StatusFlag::AutoServiceLevelSkipped);
                }
            }
            Check::Pass
        } else if previous == EvseState::NoGround {
            if !connected {
                info!("Vehicle disconnected, clearing no ground");
                self.no_ground_retries = 0;
                self.vflags.remove(StatusFlag::NoGroundTripped);
                Check::Reset
            } else if self.no_ground_retries < retry_count
                && elapsed(now, self.no_ground_at) > retry_timeout
            {
                self.no_ground_retries += 1;
                info!("Retrying after no ground ({})", self.no_ground_retries);
                Check::Pass
            } else {
                Check::Fault(EvseState::NoGround)
            }
        } else if self.flags.stuck_relay_check_enabled() {
            self.check_stuck_relay(now, previous, lines.any_live())
        } else {
            Check::Pass
        }
    }

    fn no_ground(&mut self, now: TimeMillis, previous: EvseState) -> Check {
        if previous != EvseState::NoGround {
            warn!("No ground");
            self.station.store.record_trip(Trip::NoGround);
            self.no_ground_at = now;
            self.vflags.insert(StatusFlag::NoGroundTripped);
        }
        Check::Fault(EvseState::NoGround)
    }

    fn check_stuck_relay(&mut self, now: TimeMillis, previous: EvseState, live: bool) -> Check {
        if !live {
            self.stuck_relay_since = None;
            return Check::Pass;
        }

        let delay = self.config.timing.stuck_relay_delay;
        let since = *self.stuck_relay_since.get_or_insert(now);

        if previous == EvseState::StuckRelay
            || (elapsed(now, self.charge_off_at) > delay && elapsed(now, since) > delay)
        {
            if previous != EvseState::StuckRelay {
                warn!("AC present with contactor open");
                self.station.store.record_trip(Trip::StuckRelay);
            }
            Check::Fault(EvseState::StuckRelay)
        } else {
            Check::Pass
        }
    }

    fn check_gfi(&mut self, now: TimeMillis, previous: EvseState, connected: bool) -> Check {
        if !self.station.gfi.fault() {
            return Check::Pass;
        }

        let timing = &self.config.timing;
        let retry_timeout = timing.fault_retry_timeout;
        let retry_count = timing.fault_retry_count;

        if previous != EvseState::GfciFault {
            warn!("Ground fault");
            self.station.store.record_trip(Trip::Gfi);
            self.gfi_retries = 0;
            self.gfi_fault_at = now;
            self.vflags.insert(StatusFlag::GfiTripped);
        } else if !connected {
            if self.station.gfi.reset() {
                info!("Vehicle disconnected, clearing ground fault");
                self.vflags.remove(StatusFlag::GfiTripped);
                return Check::Reset;
            }
        } else if elapsed(now, self.gfi_fault_at) > retry_timeout {
            self.gfi_retries += 1;
            if self.gfi_retries > retry_count {
                warn!("Ground fault retries exhausted");
                return Check::Escalate;
            }

            info!("Retrying after ground fault ({})", self.gfi_retries);
            self.gfi_fault_at = now;
            if self.station.gfi.reset() {
                self.vflags.remove(StatusFlag::GfiTripped);
            }
        }

        Check::Fault(EvseState::GfciFault)
    }

    fn over_current(&mut self, now: TimeMillis, previous: EvseState) -> bool {
        let capabilities = &self.config.capabilities;
        if !(capabilities.over_current && capabilities.ammeter) || previous != EvseState::C {
            self.over_current_since = None;
            return false;
        }

        let timing = &self.config.timing;
        let limit =
            (self.capacity.current() as u32 + timing.over_current_margin_amps as u32) * 1000;

        if self.charging_current_milliamps >= limit {
            let since = *self.over_current_since.get_or_insert(now);
            if elapsed(now, since) >= timing.over_current_timeout {
                warn!(
                    "Over current: {}mA against {}A",
                    self.charging_current_milliamps,
                    self.capacity.current()
                );
                return true;
            }
        } else {
            self.over_current_since = None;
        }

        false
    }

    fn apply_proximity_limit(&mut self) {
        match self.station.proximity.read() {
            Some(amps) => {
                self.capacity.set_proximity_limit(Some(amps));
                if self.capacity.current() > amps {
                    self.set_capacity_internal(amps, Persistence::Volatile);
                }
            }
            None => {
                warn!("No valid cable detected");
                self.state = EvseState::A;
            }
        }
    }

    fn enter_state(&mut self, previous: EvseState) {
        info!("State {:?} -> {:?}", previous, self.state);

        let timing = &self.config.timing;
        let over_temperature_release = timing.over_temperature_release;
        let over_current_release = timing.over_current_release;

        match self.state {
            EvseState::A => {
                self.charging_off();
                self.station.pilot.set_level(SteadyLevel::Positive);
                if self.config.auth_lock_on_disconnect {
                    self.vflags.insert(StatusFlag::AuthLocked);
                }
                self.limits.clear();
                self.vflags.remove(StatusFlag::TimeLimit);
                self.vflags.remove(StatusFlag::ChargeLimit);
                self.vflags.insert(StatusFlag::SessionEnded);
                self.capacity.set_proximity_limit(None);
            }
            EvseState::B => {
                self.charging_off();
                if self.vflags.contains(StatusFlag::AuthLocked) {
                    self.station.pilot.set_level(SteadyLevel::Positive);
                } else {
                    self.offer_pilot();
                }
            }
            EvseState::C => {
                self.offer_pilot();

                let capabilities = &self.config.capabilities;
                if capabilities.gfi
                    && capabilities.gfi_self_test
                    && self.flags.gfi_self_test_enabled()
                {
                    let station = &mut self.station;
                    let result = station
                        .gfi
                        .self_test(&mut station.delay, &mut station.watchdog);
                    if !result.passed() {
                        warn!("GFI self test failed before charging: {result:?}");
                        self.state = EvseState::GfiTestFailed;
                        self.station.pilot.set_level(SteadyLevel::Positive);
                        self.enter_hard_fault(true);
                        return;
                    }
                }

                self.charging_on();
            }
            EvseState::D => {
                self.charging_off();
                self.station.pilot.set_level(SteadyLevel::Positive);
                self.enter_hard_fault(false);
            }
            EvseState::OverTemperature => {
                self.station.pilot.set_level(SteadyLevel::Positive);
                self.station.settle(over_temperature_release);
                self.charging_off();
                self.enter_hard_fault(true);
            }
            EvseState::OverCurrent => {
                self.station.pilot.set_level(SteadyLevel::Positive);
                self.station.settle(over_current_release);
                self.charging_off();
                self.enter_hard_fault(true);
            }
            EvseState::DiodeCheckFailed | EvseState::GfiTestFailed => {
                self.charging_off();
                self.station.pilot.set_level(SteadyLevel::Positive);
                self.enter_hard_fault(true);
            }
            EvseState::StuckRelay => {
                self.charging_off();
                self.station.pilot.set_level(SteadyLevel::Positive);
                if self.config.capabilities.ul_compliance {
                    self.enter_hard_fault(false);
                }
            }
            EvseState::Disabled => {
                self.station.pilot.set_level(SteadyLevel::Negative);
                self.charging_off();
            }
            EvseState::Unknown
            | EvseState::GfciFault
            | EvseState::NoGround
            | EvseState::RelayClosureFault
            | EvseState::Sleeping => {
                self.station.pilot.set_level(SteadyLevel::Positive);
                self.charging_off();
            }
        }
    }

    fn charging_on(&mut self) {
        let now = self.station.now();
        self.station.contactor.close();
        self.vflags.insert(StatusFlag::ChargingOn);

        if self.vflags.contains(StatusFlag::SessionEnded) {
            self.accumulated_charge_seconds = 0;
            self.vflags.remove(StatusFlag::SessionEnded);
        } else {
            self.accumulated_charge_seconds += self.elapsed_charge_seconds;
        }
        self.elapsed_charge_seconds = 0;

        self.charge_on_at = now;
        self.station.ammeter.reset();
        self.last_meter_read = now;
        self.over_current_since = None;
    }

    fn charging_off(&mut self) {
        self.station.contactor.open();
        self.vflags.remove(StatusFlag::ChargingOn);
        self.charge_off_at = self.station.now();
        self.charging_current_milliamps = 0;
        self.over_current_since = None;
    }

    fn offer_pilot(&mut self) {
        if let Err(e) = self.station.pilot.set_pwm(self.capacity.current()) {
            warn!("Cannot offer current: {e}");
        }
    }

    fn read_meters(&mut self, now: TimeMillis) {
        let capabilities = &self.config.capabilities;
        let measuring = self.state == EvseState::C
            || self.vflags.contains(StatusFlag::ChargingOn)
            || self.vflags.contains(StatusFlag::AmmeterCalibration);

        if !(capabilities.ammeter && measuring)
            || elapsed(now, self.last_meter_read) < self.config.timing.ammeter_period
        {
            return;
        }

        let period = elapsed(now, self.last_meter_read);
        self.last_meter_read = now;

        if capabilities.voltmeter {
            self.voltage_millivolts = self.station.voltmeter.read(&self.station.clock);
        }
        if let Some(milliamps) = self.station.ammeter.read(&self.station.clock) {
            self.charging_current_milliamps = milliamps;
        }

        self.energy
            .accumulate(self.charging_current_milliamps, self.voltage_millivolts, period);
    }

    fn read_temperatures(&mut self, now: TimeMillis) {
        if !self.config.capabilities.temperature_monitoring {
            return;
        }

        let due = self
            .last_temperature_read
            .map_or(true, |last| elapsed(now, last) >= self.config.timing.temperature_period);
        if due {
            self.station.temperatures.read();
            self.last_temperature_read = Some(now);
        }
    }

    fn temperature_checks_active(&self) -> bool {
        self.config.capabilities.temperature_monitoring && self.flags.temperature_check_enabled()
    }

    fn throttle_temperature(&mut self) {
        if !self.temperature_checks_active() {
            return;
        }

        let max = self.max_capacity();
        if let Some(amps) = self.station.temperatures.throttle(max) {
            let amps = self.heartbeat.limit(amps);
            self.set_capacity_internal(amps, Persistence::Volatile);
        }
    }

    fn restore_temperature(&mut self) {
        if !self.temperature_checks_active() {
            return;
        }

        let max = self.max_capacity();
        if let Some(amps) = self.station.temperatures.restore(max) {
            let amps = self.heartbeat.limit(amps);
            self.set_capacity_internal(amps, Persistence::Volatile);

            if matches!(self.state, EvseState::B | EvseState::C)
                && !self.vflags.contains(StatusFlag::AuthLocked)
                && self.station.pilot.level() != PilotLevel::Pwm
            {
                self.offer_pilot();
            }
        }
    }

    fn supervise_heartbeat(&mut self, now: TimeMillis) {
        if !self.config.capabilities.heartbeat_supervision {
            return;
        }

        if let Some(fallback) = self.heartbeat.check_expiry(now, self.capacity.current()) {
            self.set_capacity_internal(fallback, Persistence::Volatile);
        }
    }

    fn check_limits(&mut self) {
        if !self.config.capabilities.charge_limits {
            return;
        }

        if self
            .limits
            .check(self.elapsed_charge_seconds, self.energy.watt_seconds())
            .is_some()
        {
            self.vflags.remove(StatusFlag::TimeLimit);
            self.vflags.remove(StatusFlag::ChargeLimit);
            self.vflags.insert(StatusFlag::LimitSleep);
            self.sleep();
        }
    }

    fn publish(&mut self) {
        let key = PublishedKey {
            state: self.state,
            pilot_state: self.pilot_state,
            capacity: self.capacity.current(),
            flags: self.vflags.bits(),
        };
        if checked_set(&mut self.published, Some(key)) == Changed::No {
            return;
        }

        let connected = self.vflags.contains(StatusFlag::EvConnected);
        let inconsistent = match self.state {
            EvseState::Unknown => true,
            EvseState::A => connected,
            EvseState::B | EvseState::C => !connected,
            _ => false,
        };
        if inconsistent {
            debug!("Not publishing transient {:?}", self.state);
            return;
        }

        let snapshot = self.snapshot();
        self.events.push(Event {
            timestamp_milliseconds: self.station.now(),
            kind: EventKind::StateChanged(snapshot),
        });
    }

    fn service_level(&self) -> ServiceLevel {
        if self.flags.is_l2() {
            ServiceLevel::L2
        } else {
            ServiceLevel::L1
        }
    }

    fn apply_service_level(&mut self, level: ServiceLevel, persist: bool) {
        info!("Service level {level:?}");
        self.flags.set(ConfigFlag::L2, level == ServiceLevel::L2);
        if persist {
            self.station.store.set_flags(self.flags);
        }

        self.voltage_millivolts = match level {
            ServiceLevel::L1 => NOMINAL_MILLIVOLTS_L1,
            ServiceLevel::L2 => NOMINAL_MILLIVOLTS_L2,
        };

        let max = self.max_capacity();
        self.set_capacity_internal(max, Persistence::Volatile);
    }

    fn vehicle_in_range(&self) -> bool {
        matches!(self.state, EvseState::B | EvseState::C)
    }

    fn max_capacity(&mut self) -> u8 {
        let level = self.service_level();
        let in_range = self.vehicle_in_range();
        self.capacity
            .max_allowed(&mut self.station.store, level, in_range)
    }

    fn set_capacity_internal(&mut self, amps: u8, persistence: Persistence) -> CapacityOutcome {
        let level = self.service_level();
        let in_range = self.vehicle_in_range();
        self.capacity.set_capacity(
            &mut self.station.store,
            &mut self.station.pilot,
            level,
            amps,
            persistence,
            in_range,
        )
    }

    pub fn state(&self) -> EvseState {
        self.state
    }

    pub fn pilot_level(&self) -> PilotLevel {
        self.station.pilot.level()
    }

    pub fn volatile_flags(&self) -> VolatileFlags {
        self.vflags
    }

    /// `Some` while latched in a hard fault, holding whether a disconnect clears it.
    pub fn hard_fault(&self) -> Option<bool> {
        self.hard_fault
    }

    /// Milliseconds until a GFI or no ground fault is retried.
    pub fn fault_retry_countdown(&self) -> Option<u32> {
        let since = match self.state {
            EvseState::GfciFault => self.gfi_fault_at,
            EvseState::NoGround => self.no_ground_at,
            _ => return None,
        };
        Some(
            self.config
                .timing
                .fault_retry_timeout
                .saturating_sub(elapsed(self.station.now(), since)),
        )
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state,
            pilot_state: self.pilot_state,
            pilot_level: self.station.pilot.level(),
            current_capacity: self.capacity.current(),
            elapsed_charge_seconds: self.elapsed_charge_seconds,
            volatile_flags: self.vflags,
            charging_current_milliamps: self.charging_current_milliamps,
            voltage_millivolts: self.voltage_millivolts,
            fault_retry_countdown_milliseconds: self.fault_retry_countdown(),
            temperatures: self.station.temperatures.latest().clone(),
            heartbeat: self.heartbeat.triggered(),
        }
    }

    pub fn settings(&mut self) -> Settings {
        let heartbeat = self.heartbeat.status();
        Settings {
            current_capacity: self.capacity.current(),
            flags: self.flags,
            service_level: self.service_level(),
            max_hardware_capacity: self.station.store.max_hardware_capacity(),
            heartbeat_interval_seconds: heartbeat.interval_seconds,
            heartbeat_fallback_amps: heartbeat.fallback_amps,
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn event_statistics(&self) -> EventStatistics {
        self.events.statistics()
    }

    pub fn pop_event(&mut self) -> Option<Event> {
        self.events.pop_oldest()
    }

    pub fn enable(&mut self) {
        if matches!(self.state, EvseState::Disabled | EvseState::Sleeping) {
            info!("Enabled");
            self.vflags.remove(StatusFlag::LimitSleep);
            self.state = EvseState::Unknown;
            self.station.pilot.set_level(SteadyLevel::Positive);
        }
    }

    pub fn disable(&mut self) {
        if self.state != EvseState::Disabled {
            info!("Disabled");
            let previous = self.state;
            self.state = EvseState::Disabled;
            self.enter_state(previous);
        }
    }

    /// Stops offering current. The contactor opens once the vehicle releases its load.
    pub fn sleep(&mut self) {
        if self.state != EvseState::Sleeping {
            info!("Sleeping");
            self.station.pilot.set_level(SteadyLevel::Positive);
            self.state = EvseState::Sleeping;
            self.charge_off_at = self.station.now();
        }
    }

    /// Makes the station safe for a reset, the caller performs the reset itself.
    pub fn prepare_reboot(&mut self) {
        info!("Preparing to reboot");
        self.station.pilot.set_level(SteadyLevel::Positive);
        if self.vflags.contains(StatusFlag::ChargingOn) {
            self.station.settle(self.config.timing.reboot_release);
            self.charging_off();
        }
        self.reboot_requested = true;
    }

    pub fn reboot_requested(&self) -> bool {
        self.reboot_requested
    }

    pub fn current_capacity_range(&self) -> CapacityRange {
        self.capacity.range(self.service_level())
    }

    pub fn set_current_capacity(
        &mut self,
        amps: u8,
        persistence: Persistence,
    ) -> Result<CapacityOutcome, CommandError> {
        if self.station.temperatures.is_throttled() && amps > self.capacity.current() {
            return Err(CommandError::OverTemperature);
        }
        Ok(self.set_capacity_internal(amps, persistence))
    }

    /// Sets the hardware current ceiling, which may only be written once.
    pub fn set_max_hardware_capacity(&mut self, amps: u8) -> Result<(), CommandError> {
        if !(MIN_CURRENT_CAPACITY..=MAX_CURRENT_CAPACITY_L2).contains(&amps) {
            return Err(CommandError::InvalidArgument);
        }
        if self.station.store.max_hardware_capacity().is_some() {
            return Err(CommandError::NotPermitted);
        }

        info!("Hardware current ceiling {amps}A");
        self.station.store.set_max_hardware_capacity(amps);
        self.capacity.set_hardware_max(amps);
        if self.capacity.current() > amps {
            self.set_capacity_internal(amps, Persistence::Volatile);
        }
        Ok(())
    }

    pub fn set_service_level(&mut self, setting: ServiceLevelSetting) -> Result<(), CommandError> {
        let level = match setting {
            ServiceLevelSetting::Auto => {
                if !self.config.capabilities.advanced_power {
                    return Err(CommandError::NotPermitted);
                }
                self.flags.set(ConfigFlag::AutoServiceLevelDisabled, false);
                self.station.store.set_flags(self.flags);
                return Ok(());
            }
            ServiceLevelSetting::L1 => ServiceLevel::L1,
            ServiceLevelSetting::L2 => ServiceLevel::L2,
        };

        self.flags.set(ConfigFlag::AutoServiceLevelDisabled, true);
        self.apply_service_level(level, true);
        Ok(())
    }

    pub fn set_safety_check(&mut self, check: SafetyCheck, enabled: bool) {
        let mut flags = self.flags;
        let flag = match check {
            SafetyCheck::Diode => ConfigFlag::DiodeCheckDisabled,
            SafetyCheck::VentRequired => ConfigFlag::VentRequiredDisabled,
            SafetyCheck::Ground => ConfigFlag::GroundCheckDisabled,
            SafetyCheck::StuckRelay => ConfigFlag::StuckRelayCheckDisabled,
            SafetyCheck::GfiSelfTest => ConfigFlag::GfiTestDisabled,
            SafetyCheck::Temperature => ConfigFlag::TemperatureCheckDisabled,
        };

        flags.set(flag, !enabled);
        if checked_set(&mut self.flags, flags) == Changed::Yes {
            info!("{:?} check {}", check, if enabled { "on" } else { "off" });
            self.station.store.set_flags(self.flags);
        }

        if check == SafetyCheck::Ground && !enabled {
            self.no_ground_retries = 0;
            self.vflags.remove(StatusFlag::NoGroundTripped);
        }
    }

    pub fn set_auth_lock(&mut self, locked: bool) {
        self.vflags.set(StatusFlag::AuthLocked, locked);

        if !self.state.is_fault()
            && self.hard_fault.is_none()
            && self.post_failed_at.is_none()
            && !matches!(self.state, EvseState::Disabled | EvseState::Sleeping)
        {
            let force = self.state == EvseState::B;
            self.update(force);
        }
    }

    pub fn trip_counters(&mut self) -> TripCounters {
        self.station.store.trip_counters()
    }

    pub fn clear_trip_counters(&mut self) {
        self.station.store.clear_trip_counters();
    }

    /// Returns `true` while a missed pulse is waiting to be acknowledged.
    pub fn heartbeat_pulse(&mut self) -> bool {
        let now = self.station.now();
        self.heartbeat.pulse(now)
    }

    pub fn heartbeat_status(&self) -> HeartbeatStatus {
        self.heartbeat.status()
    }

    pub fn heartbeat_configure(
        &mut self,
        interval_seconds: u16,
        fallback_amps: u8,
    ) -> Result<(), CommandError> {
        if !self.config.capabilities.heartbeat_supervision {
            return Err(CommandError::NotPermitted);
        }

        let now = self.station.now();
        let restore = self.heartbeat.configure(
            &mut self.station.store,
            interval_seconds,
            fallback_amps,
            now,
        );

        if restore && !self.station.temperatures.is_throttled() {
            let max = self.max_capacity();
            self.set_capacity_internal(max, Persistence::Volatile);
        }
        Ok(())
    }

    pub fn heartbeat_acknowledge(&mut self, cookie: u8) -> Result<(), CommandError> {
        let throttled = self.station.temperatures.is_throttled();
        let level = self.service_level();
        let in_range = self.vehicle_in_range();
        let max = self.max_capacity();

        let capacity = &mut self.capacity;
        let store = &mut self.station.store;
        let pilot = &mut self.station.pilot;

        self.heartbeat.acknowledge(cookie, || {
            if throttled {
                return Err(CommandError::OverTemperature);
            }
            capacity.set_capacity(store, pilot, level, max, Persistence::Volatile, in_range);
            Ok(())
        })
    }

    pub fn set_time_limit(&mut self, units: u8) -> Result<(), CommandError> {
        if !self.config.capabilities.charge_limits {
            return Err(CommandError::NotPermitted);
        }
        self.limits.set_time_limit(units);
        self.vflags
            .set(StatusFlag::TimeLimit, self.limits.has_time_limit());
        Ok(())
    }

    pub fn set_charge_limit(&mut self, kwh: u8) -> Result<(), CommandError> {
        if !self.config.capabilities.charge_limits {
            return Err(CommandError::NotPermitted);
        }
        self.limits.set_charge_limit(kwh);
        self.vflags
            .set(StatusFlag::ChargeLimit, self.limits.has_charge_limit());
        Ok(())
    }
}
