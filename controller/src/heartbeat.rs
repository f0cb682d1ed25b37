//! Supervision of a remote controller that must keep pulsing to hold full capacity.

use crate::{
    changed::checked_set, config::HEARTBEAT_ACK_COOKIE, elapsed, hal::NonVolatileStorage,
    nv::SettingsStore, TimeMillis,
};
use evse_protocol::{
    rpc::CommandError,
    types::{HeartbeatStatus, HeartbeatTrigger},
};
use log::{info, warn};

pub struct HeartbeatSupervision {
    interval_seconds: u16,
    fallback_amps: u8,
    last_pulse: TimeMillis,
    triggered: HeartbeatTrigger,
}

impl HeartbeatSupervision {
    pub fn new(interval_seconds: u16, fallback_amps: u8, now: TimeMillis) -> Self {
        Self {
            interval_seconds,
            fallback_amps,
            last_pulse: now,
            triggered: HeartbeatTrigger::None,
        }
    }

    pub fn status(&self) -> HeartbeatStatus {
        HeartbeatStatus {
            interval_seconds: self.interval_seconds,
            fallback_amps: self.fallback_amps,
            triggered: self.triggered,
        }
    }

    pub fn triggered(&self) -> HeartbeatTrigger {
        self.triggered
    }

    /// Caps `amps` at the fallback while a missed pulse is unacknowledged.
    pub fn limit(&self, amps: u8) -> u8 {
        match self.triggered {
            HeartbeatTrigger::MissedUnacknowledged => amps.min(self.fallback_amps),
            _ => amps,
        }
    }

    /// Records a pulse, returns `true` if a missed pulse is still waiting to be acknowledged.
    pub fn pulse(&mut self, now: TimeMillis) -> bool {
        self.last_pulse = now;
        self.triggered == HeartbeatTrigger::MissedUnacknowledged
    }

    /// Checks for a missed pulse, returning the capacity to fall back to if it must be lowered.
    pub fn check_expiry(&mut self, now: TimeMillis, current_capacity: u8) -> Option<u8> {
        if self.interval_seconds == 0 {
            return None;
        }

        if elapsed(now, self.last_pulse) <= self.interval_seconds as TimeMillis * 1000 {
            return None;
        }

        warn!(
            "Heartbeat missed, falling back to {}A",
            self.fallback_amps
        );
        self.triggered = HeartbeatTrigger::MissedUnacknowledged;
        self.last_pulse = now;

        (self.fallback_amps < current_capacity).then_some(self.fallback_amps)
    }

    /// Applies a new interval and fallback, persisting only what changed.
    ///
    /// Returns `true` when supervision was switched off and full capacity should be restored.
    pub fn configure<S: NonVolatileStorage>(
        &mut self,
        store: &mut SettingsStore<S>,
        interval_seconds: u16,
        fallback_amps: u8,
        now: TimeMillis,
    ) -> bool {
        self.triggered = HeartbeatTrigger::None;
        self.last_pulse = now;

        checked_set(&mut self.interval_seconds, interval_seconds)
            .then(|| store.set_heartbeat_interval(interval_seconds));
        checked_set(&mut self.fallback_amps, fallback_amps)
            .then(|| store.set_heartbeat_fallback(fallback_amps));

        info!("Heartbeat configured: {interval_seconds}s, fallback {fallback_amps}A");
        interval_seconds == 0
    }

    /// Acknowledges a missed pulse.
    ///
    /// `restore` is run to lift the fallback capacity, the trigger is only advanced if it succeeds.
    pub fn acknowledge<F>(&mut self, cookie: u8, restore: F) -> Result<(), CommandError>
    where
        F: FnOnce() -> Result<(), CommandError>,
    {
        if cookie != HEARTBEAT_ACK_COOKIE {
            return Err(CommandError::InvalidCookie);
        }

        if self.triggered == HeartbeatTrigger::MissedUnacknowledged {
            restore()?;
            self.triggered = HeartbeatTrigger::MissedAcknowledged;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemoryStorage;

    #[test]
    fn disabled_never_expires() {
        let mut heartbeat = HeartbeatSupervision::new(0, 6, 0);
        assert_eq!(heartbeat.check_expiry(1_000_000, 32), None);
        assert_eq!(heartbeat.triggered(), HeartbeatTrigger::None);
    }

    #[test]
    fn missed_pulse_falls_back() {
        let mut heartbeat = HeartbeatSupervision::new(10, 6, 0);
        assert_eq!(heartbeat.check_expiry(10_000, 32), None);
        assert_eq!(heartbeat.check_expiry(10_001, 32), Some(6));
        assert_eq!(
            heartbeat.triggered(),
            HeartbeatTrigger::MissedUnacknowledged
        );

        assert!(heartbeat.pulse(12_000));
        assert_eq!(heartbeat.check_expiry(20_000, 6), None);
    }

    #[test]
    fn limit_applies_only_until_acknowledged() {
        let mut heartbeat = HeartbeatSupervision::new(10, 6, 0);
        assert_eq!(heartbeat.limit(16), 16);

        heartbeat.check_expiry(11_000, 32);
        assert_eq!(heartbeat.limit(16), 6);
        assert_eq!(heartbeat.limit(4), 4);

        assert_eq!(heartbeat.acknowledge(HEARTBEAT_ACK_COOKIE, || Ok(())), Ok(()));
        assert_eq!(heartbeat.limit(16), 16);
    }

    #[test]
    fn fallback_above_capacity_leaves_it_alone() {
        let mut heartbeat = HeartbeatSupervision::new(10, 20, 0);
        assert_eq!(heartbeat.check_expiry(11_000, 16), None);
        assert_eq!(
            heartbeat.triggered(),
            HeartbeatTrigger::MissedUnacknowledged
        );
    }

    #[test]
    fn acknowledge_requires_cookie() {
        let mut heartbeat = HeartbeatSupervision::new(10, 6, 0);
        heartbeat.check_expiry(11_000, 32);

        assert_eq!(
            heartbeat.acknowledge(0x00, || Ok(())),
            Err(CommandError::InvalidCookie)
        );
        assert_eq!(
            heartbeat.acknowledge(HEARTBEAT_ACK_COOKIE, || Err(CommandError::OverTemperature)),
            Err(CommandError::OverTemperature)
        );
        assert_eq!(
            heartbeat.triggered(),
            HeartbeatTrigger::MissedUnacknowledged
        );

        let mut restored = false;
        assert_eq!(
            heartbeat.acknowledge(HEARTBEAT_ACK_COOKIE, || {
                restored = true;
                Ok(())
            }),
            Ok(())
        );
        assert!(restored);
        assert_eq!(heartbeat.triggered(), HeartbeatTrigger::MissedAcknowledged);
        assert!(!heartbeat.pulse(12_000));
    }

    #[test]
    fn configure_persists_changes() {
        let storage = MemoryStorage::erased();
        let mut store = SettingsStore::new(storage.clone());
        let mut heartbeat = HeartbeatSupervision::new(0, 6, 0);
        heartbeat.check_expiry(11_000, 32);

        assert!(!heartbeat.configure(&mut store, 30, 8, 5_000));
        assert_eq!(heartbeat.triggered(), HeartbeatTrigger::None);
        assert_eq!(store.heartbeat(), (30, 8));
        assert_eq!(heartbeat.check_expiry(35_000, 32), None);
        assert_eq!(heartbeat.check_expiry(35_001, 32), Some(8));

        assert!(heartbeat.configure(&mut store, 0, 8, 40_000));
        assert_eq!(SettingsStore::new(storage).heartbeat(), (0, 8));
    }
}
