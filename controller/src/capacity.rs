//! Arbitration of the single current the station offers.

use crate::{
    config::{
        DEFAULT_CURRENT_CAPACITY_L1, DEFAULT_CURRENT_CAPACITY_L2, MAX_CURRENT_CAPACITY_L1,
        MAX_CURRENT_CAPACITY_L2, MIN_CURRENT_CAPACITY,
    },
    hal::{AnalogInput, NonVolatileStorage, PilotTimer},
    nv::SettingsStore,
    pilot::PilotSignalDriver,
};
use evse_protocol::types::{CapacityOutcome, CapacityRange, Persistence, PilotLevel, ServiceLevel};
use log::{debug, warn};

pub struct CurrentCapacityArbiter {
    current: u8,
    hardware_max: u8,
    proximity_limit: Option<u8>,
}

impl CurrentCapacityArbiter {
    /// `hardware_max` is the stored ceiling, `None` when it was never written.
    pub fn new(hardware_max: Option<u8>) -> Self {
        Self {
            current: MIN_CURRENT_CAPACITY,
            hardware_max: hardware_max.unwrap_or(MAX_CURRENT_CAPACITY_L2),
            proximity_limit: None,
        }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn set_hardware_max(&mut self, amps: u8) {
        self.hardware_max = amps;
    }

    /// Limit imposed by the cable in the connector, only applied while a vehicle is connected.
    pub fn set_proximity_limit(&mut self, amps: Option<u8>) {
        self.proximity_limit = amps;
    }

    fn level_ceiling(&self, level: ServiceLevel) -> u8 {
        match level {
            ServiceLevel::L1 => MAX_CURRENT_CAPACITY_L1,
            ServiceLevel::L2 => self.hardware_max,
        }
    }

    fn apply_proximity_limit(&self, amps: u8, vehicle_connected: bool) -> u8 {
        match self.proximity_limit {
            Some(limit) if vehicle_connected => amps.min(limit),
            _ => amps,
        }
    }

    /// The current the user has asked for at this service level, within every ceiling.
    pub fn max_allowed<S: NonVolatileStorage>(
        &self,
        store: &mut SettingsStore<S>,
        level: ServiceLevel,
        vehicle_connected: bool,
    ) -> u8 {
        let stored = store.capacity(level).unwrap_or(match level {
            ServiceLevel::L1 => DEFAULT_CURRENT_CAPACITY_L1,
            ServiceLevel::L2 => DEFAULT_CURRENT_CAPACITY_L2,
        });

        self.apply_proximity_limit(stored, vehicle_connected)
            .max(MIN_CURRENT_CAPACITY)
            .min(self.level_ceiling(level))
    }

    pub fn range(&self, level: ServiceLevel) -> CapacityRange {
        CapacityRange {
            min_amps: MIN_CURRENT_CAPACITY,
            max_amps: self.level_ceiling(level),
            current_amps: self.current,
        }
    }

    /// Clamps and applies a new capacity, re-encoding the pilot if it is currently offering.
    ///
    /// A volatile change may not exceed the persisted setting, a persistent one may go up to the
    /// service level ceiling.
    pub fn set_capacity<S: NonVolatileStorage, T: PilotTimer>(
        &mut self,
        store: &mut SettingsStore<S>,
        pilot: &mut PilotSignalDriver<T>,
        level: ServiceLevel,
        amps: u8,
        persistence: Persistence,
        vehicle_connected: bool,
    ) -> CapacityOutcome {
        let max = match persistence {
            Persistence::Persistent => {
                self.apply_proximity_limit(self.level_ceiling(level), vehicle_connected)
            }
            Persistence::Volatile => self.max_allowed(store, level, vehicle_connected),
        }
        .max(MIN_CURRENT_CAPACITY);

        let (amps, outcome) = if amps < MIN_CURRENT_CAPACITY {
            (MIN_CURRENT_CAPACITY, CapacityOutcome::ClampedUp)
        } else if amps > max {
            (max, CapacityOutcome::ClampedDown)
        } else {
            (amps, CapacityOutcome::Accepted)
        };

        if persistence == Persistence::Persistent {
            store.set_capacity(level, amps);
        }

        if self.current != amps {
            debug!("Current capacity {}A -> {}A ({:?})", self.current, amps, persistence);
        }
        self.current = amps;

        if pilot.level() == PilotLevel::Pwm {
            if let Err(e) = pilot.set_pwm(amps) {
                warn!("Failed to re-encode pilot: {e}");
            }
        }

        outcome
    }
}

/// Cable rating encoded by the resistor between proximity and ground.
///
/// Each entry is an ADC reading and the rating it implies, a reading belongs to the nearest entry.
const PROXIMITY_TABLE: [(u16, u8); 6] = [
    (0, 0),
    (93, 63),
    (185, 32),
    (415, 20),
    (615, 13),
    (1023, 0),
];

/// Cable rating from a proximity ADC reading, `None` when no valid cable is detected.
pub fn proximity_rating(reading: u16) -> Option<u8> {
    PROXIMITY_TABLE
        .windows(2)
        .find(|pair| {
            let (lower, _) = pair[0];
            let (upper, _) = pair[1];
            reading <= upper - (upper - lower) / 2
        })
        .map(|pair| pair[0].1)
        .filter(|amps| *amps > 0)
}

pub struct ProximityPilot<A> {
    adc: A,
}

impl<A: AnalogInput> ProximityPilot<A> {
    pub fn new(adc: A) -> Self {
        Self { adc }
    }

    pub fn read(&mut self) -> Option<u8> {
        let reading = self.adc.read();
        let rating = proximity_rating(reading);
        debug!("Proximity reading {reading} -> {rating:?}");
        rating
    }
}
