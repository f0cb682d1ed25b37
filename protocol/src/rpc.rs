use crate::{
    event::Event,
    event_queue::EventStatistics,
    types::{
        CapacityOutcome, CapacityRange, HeartbeatStatus, Persistence, SafetyCheck,
        ServiceLevelSetting, Settings, StateSnapshot, SystemInformation, TripCounters,
    },
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum Request {
    Ping(u32),
    GetSystemInformation,
    GetEventCount,
    GetEventStatistics,
    GetOldestEvent,

    GetState,
    GetSettings,

    Enable,
    Disable,
    Sleep,
    Reboot,

    GetCurrentCapacity,
    SetCurrentCapacity { amps: u8, persistence: Persistence },
    SetMaxHardwareCapacity(u8),
    SetServiceLevel(ServiceLevelSetting),
    SetSafetyCheck { check: SafetyCheck, enabled: bool },
    SetAuthLock(bool),

    GetTripCounters,
    ClearTripCounters,

    HeartbeatPulse,
    HeartbeatConfigure { interval_seconds: u16, fallback_amps: u8 },
    HeartbeatAcknowledge { cookie: u8 },
    GetHeartbeat,

    /// Limit the session duration, in 15 minute units. Zero clears the limit.
    SetTimeLimit(u8),
    /// Limit the session energy, in kWh. Zero clears the limit.
    SetChargeLimit(u8),
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum Response {
    Ping(u32),
    GetSystemInformation(SystemInformation),
    GetEventCount(usize),
    GetEventStatistics(EventStatistics),
    GetOldestEvent(Option<Event>),

    GetState(StateSnapshot),
    GetSettings(Settings),

    Enable,
    Disable,
    Sleep,
    Reboot,

    GetCurrentCapacity(CapacityRange),
    SetCurrentCapacity(Result<CapacityOutcome, CommandError>),
    SetMaxHardwareCapacity(Result<(), CommandError>),
    SetServiceLevel(Result<(), CommandError>),
    SetSafetyCheck,
    SetAuthLock,

    GetTripCounters(TripCounters),
    ClearTripCounters,

    /// `true` when a missed pulse has not yet been acknowledged.
    HeartbeatPulse(bool),
    HeartbeatConfigure(Result<(), CommandError>),
    HeartbeatAcknowledge(Result<(), CommandError>),
    GetHeartbeat(HeartbeatStatus),

    SetTimeLimit(Result<(), CommandError>),
    SetChargeLimit(Result<(), CommandError>),
}

/// Reasons a command is refused.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum CommandError {
    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Capacity cannot be raised while over temperature")]
    OverTemperature,

    #[error("Operation not permitted in the current state")]
    NotPermitted,

    #[error("Incorrect acknowledgement cookie")]
    InvalidCookie,
}
