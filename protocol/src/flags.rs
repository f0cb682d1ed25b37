use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};

/// Configuration bits stored in the persisted flags word.
///
/// Discriminants are bit positions in that word.
#[derive(Debug, EnumSetType)]
pub enum ConfigFlag {
    L2 = 0,
    DiodeCheckDisabled = 1,
    VentRequiredDisabled = 2,
    GroundCheckDisabled = 3,
    StuckRelayCheckDisabled = 4,
    AutoServiceLevelDisabled = 5,
    AutoStartDisabled = 6,
    SerialDebug = 7,
    MonoLcd = 8,
    GfiTestDisabled = 9,
    TemperatureCheckDisabled = 10,
    ButtonDisabled = 15,
}

/// Runtime status bits, reset on every boot.
///
/// Discriminants are bit positions in the reported flags word.
#[derive(Debug, EnumSetType)]
pub enum StatusFlag {
    AutoServiceLevelSkipped = 0,
    HardFault = 1,
    LimitSleep = 2,
    AuthLocked = 3,
    AmmeterCalibration = 4,
    NoGroundTripped = 5,
    ChargingOn = 6,
    GfiTripped = 7,
    EvConnected = 8,
    SessionEnded = 9,
    EvConnectedPrevious = 10,
    UiInMenu = 11,
    TimeLimit = 12,
    ChargeLimit = 13,
    BootLock = 14,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentFlags(EnumSet<ConfigFlag>);

impl Default for PersistentFlags {
    fn default() -> Self {
        Self(ConfigFlag::L2.into())
    }
}

impl PersistentFlags {
    /// The value an erased flags word reads as.
    pub const ERASED: u16 = 0xffff;

    pub fn from_bits(bits: u16) -> Self {
        if bits == Self::ERASED {
            Self::default()
        } else {
            Self(EnumSet::from_u16_truncated(bits))
        }
    }

    pub fn bits(&self) -> u16 {
        self.0.as_u16()
    }

    pub fn contains(&self, flag: ConfigFlag) -> bool {
        self.0.contains(flag)
    }

    pub fn set(&mut self, flag: ConfigFlag, value: bool) {
        if value {
            self.0.insert(flag);
        } else {
            self.0.remove(flag);
        }
    }

    pub fn is_l2(&self) -> bool {
        self.contains(ConfigFlag::L2)
    }

    pub fn diode_check_enabled(&self) -> bool {
        !self.contains(ConfigFlag::DiodeCheckDisabled)
    }

    pub fn vent_required_enabled(&self) -> bool {
        !self.contains(ConfigFlag::VentRequiredDisabled)
    }

    pub fn ground_check_enabled(&self) -> bool {
        !self.contains(ConfigFlag::GroundCheckDisabled)
    }

    pub fn stuck_relay_check_enabled(&self) -> bool {
        !self.contains(ConfigFlag::StuckRelayCheckDisabled)
    }

    pub fn auto_service_level_enabled(&self) -> bool {
        !self.contains(ConfigFlag::AutoServiceLevelDisabled)
    }

    pub fn gfi_self_test_enabled(&self) -> bool {
        !self.contains(ConfigFlag::GfiTestDisabled)
    }

    pub fn temperature_check_enabled(&self) -> bool {
        !self.contains(ConfigFlag::TemperatureCheckDisabled)
    }
}

#[cfg(feature = "no-std")]
impl defmt::Format for PersistentFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "PersistentFlags({=u16:#06x})", self.bits())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolatileFlags(EnumSet<StatusFlag>);

impl Default for VolatileFlags {
    fn default() -> Self {
        Self(StatusFlag::SessionEnded.into())
    }
}

impl VolatileFlags {
    pub fn bits(&self) -> u16 {
        self.0.as_u16()
    }

    pub fn contains(&self, flag: StatusFlag) -> bool {
        self.0.contains(flag)
    }

    pub fn set(&mut self, flag: StatusFlag, value: bool) {
        if value {
            self.0.insert(flag);
        } else {
            self.0.remove(flag);
        }
    }

    pub fn insert(&mut self, flag: StatusFlag) {
        self.0.insert(flag);
    }

    pub fn remove(&mut self, flag: StatusFlag) {
        self.0.remove(flag);
    }
}

#[cfg(feature = "no-std")]
impl defmt::Format for VolatileFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "VolatileFlags({=u16:#06x})", self.bits())
    }
}
