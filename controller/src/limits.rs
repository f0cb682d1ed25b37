//! Per session time and energy limits.

use crate::TimeMillis;
use log::info;

const TIME_LIMIT_UNIT_SECONDS: u32 = 15 * 60;
const WATT_SECONDS_PER_KWH: u64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReached {
    Time,
    Charge,
}

/// Energy delivered in the current session, integrated from current and voltage readings.
#[derive(Debug, Default, Clone)]
pub struct EnergyMeter {
    milliwatt_milliseconds: u64,
}

impl EnergyMeter {
    pub fn accumulate(&mut self, milliamps: u32, millivolts: u32, period: TimeMillis) {
        let milliwatts = milliamps as u64 * millivolts as u64 / 1_000;
        self.milliwatt_milliseconds += milliwatts * period as u64;
    }

    pub fn watt_seconds(&self) -> u64 {
        self.milliwatt_milliseconds / 1_000_000
    }

    pub fn reset(&mut self) {
        self.milliwatt_milliseconds = 0;
    }
}

#[derive(Debug, Default, Clone)]
pub struct SessionLimits {
    time_limit_seconds: Option<u32>,
    charge_limit_watt_seconds: Option<u64>,
}

impl SessionLimits {
    /// Limits charging time, in 15 minute units. Zero clears the limit.
    pub fn set_time_limit(&mut self, units: u8) {
        self.time_limit_seconds = (units != 0).then(|| units as u32 * TIME_LIMIT_UNIT_SECONDS);
        info!("Time limit: {:?}s", self.time_limit_seconds);
    }

    /// Limits energy delivered, in kWh. Zero clears the limit.
    pub fn set_charge_limit(&mut self, kwh: u8) {
        self.charge_limit_watt_seconds = (kwh != 0).then(|| kwh as u64 * WATT_SECONDS_PER_KWH);
        info!("Charge limit: {:?}Ws", self.charge_limit_watt_seconds);
    }

    pub fn has_time_limit(&self) -> bool {
        self.time_limit_seconds.is_some()
    }

    pub fn has_charge_limit(&self) -> bool {
        self.charge_limit_watt_seconds.is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Checks both limits, clearing them once either is reached.
    pub fn check(&mut self, elapsed_seconds: u32, watt_seconds: u64) -> Option<LimitReached> {
        let reached = if self
            .charge_limit_watt_seconds
            .is_some_and(|limit| watt_seconds >= limit)
        {
            Some(LimitReached::Charge)
        } else if self
            .time_limit_seconds
            .is_some_and(|limit| elapsed_seconds >= limit)
        {
            Some(LimitReached::Time)
        } else {
            None
        };

        if let Some(limit) = reached {
            info!("Session limit reached: {limit:?}");
            self.clear();
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_limits_never_trip() {
        let mut limits = SessionLimits::default();
        assert_eq!(limits.check(u32::MAX, u64::MAX), None);
    }

    #[test]
    fn time_limit_in_quarter_hours() {
        let mut limits = SessionLimits::default();
        limits.set_time_limit(2);
        assert!(limits.has_time_limit());
        assert_eq!(limits.check(1_799, 0), None);
        assert_eq!(limits.check(1_800, 0), Some(LimitReached::Time));
        assert!(!limits.has_time_limit());
        assert_eq!(limits.check(1_800, 0), None);
    }

    #[test]
    fn charge_limit_clears_both() {
        let mut limits = SessionLimits::default();
        limits.set_time_limit(4);
        limits.set_charge_limit(1);
        assert_eq!(limits.check(10, 3_600_000), Some(LimitReached::Charge));
        assert!(!limits.has_time_limit());
        assert!(!limits.has_charge_limit());
    }

    #[test]
    fn zero_clears_limit() {
        let mut limits = SessionLimits::default();
        limits.set_charge_limit(5);
        limits.set_charge_limit(0);
        assert!(!limits.has_charge_limit());
    }

    #[test]
    fn energy_integrates_power() {
        let mut meter = EnergyMeter::default();
        // 32A at 240V for one hour is 7.68kWh.
        for _ in 0..3_600 {
            meter.accumulate(32_000, 240_000, 1_000);
        }
        assert_eq!(meter.watt_seconds(), 7_680 * 3_600);

        meter.reset();
        assert_eq!(meter.watt_seconds(), 0);
    }
}
