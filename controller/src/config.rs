use crate::TimeMillis;

pub const MIN_CURRENT_CAPACITY: u8 = 6;
pub const MAX_CURRENT_CAPACITY_L1: u8 = 16;
pub const MAX_CURRENT_CAPACITY_L2: u8 = 80;
pub const DEFAULT_CURRENT_CAPACITY_L1: u8 = 12;
pub const DEFAULT_CURRENT_CAPACITY_L2: u8 = 32;

pub const NOMINAL_MILLIVOLTS_L1: u32 = 120_000;
pub const NOMINAL_MILLIVOLTS_L2: u32 = 240_000;

pub const HEARTBEAT_ACK_COOKIE: u8 = 0xa5;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u16 = 0;
pub const DEFAULT_HEARTBEAT_FALLBACK_AMPS: u8 = MIN_CURRENT_CAPACITY;

/// Trip counters stop counting here.
pub const TRIP_COUNTER_LIMIT: u8 = 254;

/// Which optional hardware and checks this station has.
///
/// Every check is always compiled in, this decides which ones run.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub gfi: bool,
    pub gfi_self_test: bool,
    /// AC line sensing for the ground and stuck relay checks.
    pub advanced_power: bool,
    /// The line sense inputs are wired to a dedicated ground monitor rather than the AC lines.
    pub ground_monitor: bool,
    pub temperature_monitoring: bool,
    pub heartbeat_supervision: bool,
    pub proximity_pilot: bool,
    pub ammeter: bool,
    pub voltmeter: bool,
    pub over_current: bool,
    pub charge_limits: bool,
    /// Treat faults shortly after closing the contactor, and stuck relays, as permanent.
    pub ul_compliance: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            gfi: true,
            gfi_self_test: true,
            advanced_power: true,
            ground_monitor: false,
            temperature_monitoring: true,
            heartbeat_supervision: true,
            proximity_pilot: false,
            ammeter: true,
            voltmeter: false,
            over_current: true,
            charge_limits: true,
            ul_compliance: true,
        }
    }
}

/// Pilot ADC boundaries, in 10 bit counts of the peak high reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdTable {
    pub a_b: u16,
    pub b_c: u16,
    pub c_d: u16,
    pub d: u16,
    /// Peak low at or above this while PWM is running means the vehicle diode is missing.
    pub diode_check: u16,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            a_b: 875,
            b_c: 780,
            c_d: 690,
            d: 0,
            diode_check: 260,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timing {
    pub pilot_samples_per_tick: usize,
    pub state_hold: TimeMillis,
    pub state_a_hold: TimeMillis,
    pub ground_check_delay: TimeMillis,
    pub stuck_relay_delay: TimeMillis,
    pub relay_settle: TimeMillis,
    pub fault_retry_timeout: TimeMillis,
    pub fault_retry_count: u8,
    /// Contactor closes within this of a fault in C are permanent under UL compliance.
    pub early_fault_window: TimeMillis,
    pub sleep_release_grace: TimeMillis,
    pub sleep_release_milliamps: u32,
    pub over_temperature_release: TimeMillis,
    pub over_current_release: TimeMillis,
    pub over_current_timeout: TimeMillis,
    pub over_current_margin_amps: u8,
    pub post_retry: TimeMillis,
    pub reboot_release: TimeMillis,
    pub ammeter_sample_window: TimeMillis,
    pub ammeter_period: TimeMillis,
    pub temperature_period: TimeMillis,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            pilot_samples_per_tick: 200,
            state_hold: 250,
            state_a_hold: 1000,
            ground_check_delay: 1000,
            stuck_relay_delay: 1000,
            relay_settle: 250,
            fault_retry_timeout: 15 * 60 * 1000,
            fault_retry_count: 3,
            early_fault_window: 2000,
            sleep_release_grace: 3000,
            sleep_release_milliamps: 1000,
            over_temperature_release: 5000,
            over_current_release: 1000,
            over_current_timeout: 5000,
            over_current_margin_amps: 5,
            post_retry: 2 * 60 * 1000,
            reboot_release: 3000,
            ammeter_sample_window: 35,
            ammeter_period: 100,
            temperature_period: 1000,
        }
    }
}

/// Temperature limits for one class of sensor, in tenths of a degree Celsius.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemperatureLimits {
    pub throttle: i16,
    pub restore: i16,
    pub shutdown: i16,
    pub panic: i16,
}

#[derive(Debug, Clone)]
pub struct TemperatureThresholds {
    pub ambient: TemperatureLimits,
    pub infrared: TemperatureLimits,
}

impl Default for TemperatureThresholds {
    fn default() -> Self {
        Self {
            ambient: TemperatureLimits {
                throttle: 650,
                restore: 600,
                shutdown: 700,
                panic: 750,
            },
            infrared: TemperatureLimits {
                throttle: 850,
                restore: 800,
                shutdown: 900,
                panic: 950,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub capabilities: Capabilities,
    pub thresholds: ThresholdTable,
    pub timing: Timing,
    pub temperatures: TemperatureThresholds,
    /// Whether the connector starts authorisation locked after each disconnect.
    pub auth_lock_on_disconnect: bool,
}
