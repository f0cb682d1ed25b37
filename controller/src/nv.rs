//! Fixed layout of the persisted settings.
//!
//! An erased field reads as all ones and is replaced by its compiled in default.

use crate::{
    config::{
        DEFAULT_HEARTBEAT_FALLBACK_AMPS, DEFAULT_HEARTBEAT_INTERVAL_SECONDS, TRIP_COUNTER_LIMIT,
    },
    hal::NonVolatileStorage,
};
use evse_protocol::{
    flags::PersistentFlags,
    types::{ServiceLevel, TripCounters},
};

mod offset {
    pub(super) const FLAGS: u16 = 0x00;
    pub(super) const CURRENT_CAPACITY_L1: u16 = 0x02;
    pub(super) const CURRENT_CAPACITY_L2: u16 = 0x03;
    pub(super) const MAX_HW_CURRENT_CAPACITY: u16 = 0x04;
    pub(super) const GFI_TRIP_COUNT: u16 = 0x05;
    pub(super) const NO_GROUND_TRIP_COUNT: u16 = 0x06;
    pub(super) const STUCK_RELAY_TRIP_COUNT: u16 = 0x07;
    pub(super) const CURRENT_SCALE_FACTOR: u16 = 0x08;
    pub(super) const AMMETER_CURRENT_OFFSET: u16 = 0x0a;
    pub(super) const VOLT_SCALE_FACTOR: u16 = 0x0c;
    pub(super) const VOLT_OFFSET: u16 = 0x0e;
    pub(super) const HEARTBEAT_INTERVAL: u16 = 0x12;
    pub(super) const HEARTBEAT_FALLBACK: u16 = 0x14;
}

const ERASED_U8: u8 = 0xff;
const ERASED_U16: u16 = 0xffff;
const ERASED_U32: u32 = 0xffff_ffff;

const DEFAULT_CURRENT_SCALE_FACTOR: u16 = 184;
const DEFAULT_AMMETER_CURRENT_OFFSET: i16 = 0;
const DEFAULT_VOLT_SCALE_FACTOR: u16 = 1;
const DEFAULT_VOLT_OFFSET: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trip {
    Gfi,
    NoGround,
    StuckRelay,
}

impl Trip {
    fn offset(self) -> u16 {
        match self {
            Self::Gfi => offset::GFI_TRIP_COUNT,
            Self::NoGround => offset::NO_GROUND_TRIP_COUNT,
            Self::StuckRelay => offset::STUCK_RELAY_TRIP_COUNT,
        }
    }
}

/// Linear calibration applied to a raw reading: `raw * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration<O> {
    pub scale: u16,
    pub offset: O,
}

pub struct SettingsStore<S> {
    storage: S,
}

impl<S: NonVolatileStorage> SettingsStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn flags(&mut self) -> PersistentFlags {
        PersistentFlags::from_bits(self.storage.read_u16(offset::FLAGS))
    }

    pub fn set_flags(&mut self, flags: PersistentFlags) {
        self.storage.write_u16(offset::FLAGS, flags.bits());
    }

    /// The stored capacity for a service level, `None` if never set.
    pub fn capacity(&mut self, level: ServiceLevel) -> Option<u8> {
        match self.storage.read_u8(capacity_offset(level)) {
            0 | ERASED_U8 => None,
            amps => Some(amps),
        }
    }

    pub fn set_capacity(&mut self, level: ServiceLevel, amps: u8) {
        self.storage.write_u8(capacity_offset(level), amps);
    }

    /// The hardware ceiling, `None` if never written.
    pub fn max_hardware_capacity(&mut self) -> Option<u8> {
        match self.storage.read_u8(offset::MAX_HW_CURRENT_CAPACITY) {
            0 | ERASED_U8 => None,
            amps => Some(amps),
        }
    }

    pub fn set_max_hardware_capacity(&mut self, amps: u8) {
        self.storage.write_u8(offset::MAX_HW_CURRENT_CAPACITY, amps);
    }

    pub fn trip_count(&mut self, trip: Trip) -> u8 {
        match self.storage.read_u8(trip.offset()) {
            ERASED_U8 => 0,
            count => count,
        }
    }

    /// Counts a trip, saturating just below the erased value.
    pub fn record_trip(&mut self, trip: Trip) -> u8 {
        let count = self.trip_count(trip);
        if count.saturating_add(1) < TRIP_COUNTER_LIMIT {
            self.storage.write_u8(trip.offset(), count + 1);
            count + 1
        } else {
            count
        }
    }

    pub fn trip_counters(&mut self) -> TripCounters {
        TripCounters {
            gfi: self.trip_count(Trip::Gfi),
            no_ground: self.trip_count(Trip::NoGround),
            stuck_relay: self.trip_count(Trip::StuckRelay),
        }
    }

    pub fn clear_trip_counters(&mut self) {
        for trip in [Trip::Gfi, Trip::NoGround, Trip::StuckRelay] {
            self.storage.write_u8(trip.offset(), 0);
        }
    }

    /// Interval in seconds and fallback current.
    pub fn heartbeat(&mut self) -> (u16, u8) {
        let interval = self.storage.read_u16(offset::HEARTBEAT_INTERVAL);
        if interval == ERASED_U16 {
            (
                DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
                DEFAULT_HEARTBEAT_FALLBACK_AMPS,
            )
        } else {
            (interval, self.storage.read_u8(offset::HEARTBEAT_FALLBACK))
        }
    }

    pub fn set_heartbeat_interval(&mut self, seconds: u16) {
        self.storage.write_u16(offset::HEARTBEAT_INTERVAL, seconds);
    }

    pub fn set_heartbeat_fallback(&mut self, amps: u8) {
        self.storage.write_u8(offset::HEARTBEAT_FALLBACK, amps);
    }

    /// Milliamps per RMS count and offset in milliamps.
    pub fn ammeter_calibration(&mut self) -> Calibration<i16> {
        let scale = match self.storage.read_u16(offset::CURRENT_SCALE_FACTOR) {
            ERASED_U16 => DEFAULT_CURRENT_SCALE_FACTOR,
            scale => scale,
        };
        let offset = match self.storage.read_u16(offset::AMMETER_CURRENT_OFFSET) {
            ERASED_U16 => DEFAULT_AMMETER_CURRENT_OFFSET,
            offset => offset as i16,
        };
        Calibration { scale, offset }
    }

    /// Millivolts per peak count and offset in millivolts.
    pub fn voltmeter_calibration(&mut self) -> Calibration<u32> {
        let scale = match self.storage.read_u16(offset::VOLT_SCALE_FACTOR) {
            ERASED_U16 => DEFAULT_VOLT_SCALE_FACTOR,
            scale => scale,
        };
        let offset = match self.storage.read_u32(offset::VOLT_OFFSET) {
            ERASED_U32 => DEFAULT_VOLT_OFFSET,
            offset => offset,
        };
        Calibration { scale, offset }
    }
}

fn capacity_offset(level: ServiceLevel) -> u16 {
    match level {
        ServiceLevel::L1 => offset::CURRENT_CAPACITY_L1,
        ServiceLevel::L2 => offset::CURRENT_CAPACITY_L2,
    }
}
