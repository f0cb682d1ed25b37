use crate::flags::{PersistentFlags, VolatileFlags};
use heapless::String;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

pub type GitRevisionString = String<20>;

/// An enumeration representing the possible reasons for a system boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum BootReason {
    Normal,
    WatchdogTimeout,
    WatchdogForced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct SystemInformation {
    pub git_revision: GitRevisionString,
    pub last_boot_reason: BootReason,
    pub uptime_milliseconds: u64,
}

/// Externally visible state of the station.
///
/// The discriminants are the state codes reported on the command link and must not change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, IntoStaticStr,
)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
#[repr(u8)]
pub enum EvseState {
    Unknown = 0x00,

    /// Vehicle not connected.
    A = 0x01,
    /// Vehicle connected, not requesting charge.
    B = 0x02,
    /// Vehicle connected and charging.
    C = 0x03,
    /// Vehicle requests ventilation, which is not supported.
    D = 0x04,

    DiodeCheckFailed = 0x05,
    GfciFault = 0x06,
    NoGround = 0x07,
    StuckRelay = 0x08,
    GfiTestFailed = 0x09,
    OverTemperature = 0x0a,
    OverCurrent = 0x0b,
    RelayClosureFault = 0x0e,

    Sleeping = 0xfe,
    Disabled = 0xff,
}

impl EvseState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::iter().find(|state| state.code() == code)
    }

    /// One of the normal protocol states a vehicle can drive the station through.
    pub fn is_normal(self) -> bool {
        matches!(self, Self::A | Self::B | Self::C)
    }

    pub fn is_fault(self) -> bool {
        matches!(
            self,
            Self::DiodeCheckFailed
                | Self::GfciFault
                | Self::NoGround
                | Self::StuckRelay
                | Self::GfiTestFailed
                | Self::OverTemperature
                | Self::OverCurrent
                | Self::RelayClosureFault
        )
    }
}

/// What the pilot line is being driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum PilotLevel {
    Steady12V,
    SteadyNeg12V,
    Pwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum ServiceLevel {
    L1,
    L2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum ServiceLevelSetting {
    L1,
    L2,
    Auto,
}

/// How a current capacity request was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum CapacityOutcome {
    Accepted,
    /// The request was below the minimum and was raised to it.
    ClampedUp,
    /// The request was above the allowed maximum and was lowered to it.
    ClampedDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum Persistence {
    /// Written to non-volatile storage.
    Persistent,
    /// Lost at the next reboot.
    Volatile,
}

/// The individually switchable safety checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum SafetyCheck {
    Diode,
    VentRequired,
    Ground,
    StuckRelay,
    GfiSelfTest,
    Temperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum HeartbeatTrigger {
    #[default]
    None,
    MissedUnacknowledged,
    MissedAcknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct HeartbeatStatus {
    /// Zero when supervision is disabled.
    pub interval_seconds: u16,
    pub fallback_amps: u8,
    pub triggered: HeartbeatTrigger,
}

/// Temperatures in tenths of a degree Celsius, `None` when the sensor is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct Temperatures {
    pub ambient: Option<i16>,
    pub ambient_secondary: Option<i16>,
    pub infrared: Option<i16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct TripCounters {
    pub gfi: u8,
    pub no_ground: u8,
    pub stuck_relay: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct CapacityRange {
    pub min_amps: u8,
    pub max_amps: u8,
    pub current_amps: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct Settings {
    pub current_capacity: u8,
    pub flags: PersistentFlags,
    pub service_level: ServiceLevel,
    pub max_hardware_capacity: Option<u8>,
    pub heartbeat_interval_seconds: u16,
    pub heartbeat_fallback_amps: u8,
}

/// Everything the display and remote collaborators may observe about the station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct StateSnapshot {
    pub state: EvseState,
    /// Debounced classification of the raw pilot voltage.
    pub pilot_state: EvseState,
    pub pilot_level: PilotLevel,
    pub current_capacity: u8,
    pub elapsed_charge_seconds: u32,
    pub volatile_flags: VolatileFlags,
    pub charging_current_milliamps: u32,
    pub voltage_millivolts: u32,
    /// Time until an automatic fault retry, if one is pending.
    pub fault_retry_countdown_milliseconds: Option<u32>,
    pub temperatures: Temperatures,
    pub heartbeat: HeartbeatTrigger,
}
