use crate::{
    config::{TemperatureLimits, TemperatureThresholds},
    hal::TemperatureSensors,
};
use evse_protocol::types::Temperatures;
use log::{info, warn};

pub struct TemperatureMonitor<T> {
    sensors: T,
    thresholds: TemperatureThresholds,
    latest: Temperatures,
    throttled: bool,
    shutdown: bool,
}

impl<T: TemperatureSensors> TemperatureMonitor<T> {
    pub fn new(sensors: T, thresholds: TemperatureThresholds) -> Self {
        Self {
            sensors,
            thresholds,
            latest: Temperatures::default(),
            throttled: false,
            shutdown: false,
        }
    }

    pub fn read(&mut self) -> &Temperatures {
        self.latest = self.sensors.read();
        &self.latest
    }

    pub fn latest(&self) -> &Temperatures {
        &self.latest
    }

    /// Whether capacity is currently reduced because of temperature.
    pub fn is_throttled(&self) -> bool {
        self.throttled || self.shutdown
    }

    fn readings(&self) -> impl Iterator<Item = (i16, &TemperatureLimits)> {
        let ambient = &self.thresholds.ambient;
        let infrared = &self.thresholds.infrared;
        [
            (self.latest.ambient, ambient),
            (self.latest.ambient_secondary, ambient),
            (self.latest.infrared, infrared),
        ]
        .into_iter()
        .filter_map(|(reading, limits)| reading.map(|r| (r, limits)))
    }

    fn any_at_or_above(&self, limit: fn(&TemperatureLimits) -> i16) -> bool {
        self.readings().any(|(reading, limits)| reading >= limit(limits))
    }

    fn all_at_or_below(&self, limit: fn(&TemperatureLimits) -> i16) -> bool {
        self.readings().all(|(reading, limits)| reading <= limit(limits))
    }

    /// Any sensor at its panic limit.
    pub fn panic(&self) -> bool {
        self.any_at_or_above(|limits| limits.panic)
    }

    /// Steps capacity down as temperatures climb, returning the new volatile capacity if any.
    pub fn throttle(&mut self, max_capacity: u8) -> Option<u8> {
        if !self.throttled && self.any_at_or_above(|limits| limits.throttle) {
            self.throttled = true;
            warn!("Over temperature, throttling to half capacity: {:?}", self.latest);
            Some(max_capacity / 2)
        } else if !self.shutdown && self.any_at_or_above(|limits| limits.shutdown) {
            self.shutdown = true;
            warn!("Over temperature, throttling to quarter capacity: {:?}", self.latest);
            Some(max_capacity / 4)
        } else {
            None
        }
    }

    /// Steps capacity back up once temperatures fall far enough.
    pub fn restore(&mut self, max_capacity: u8) -> Option<u8> {
        let mut capacity = None;

        if self.shutdown && self.all_at_or_below(|limits| limits.throttle) {
            self.shutdown = false;
            capacity = Some(max_capacity / 2);
        }

        if self.throttled && !self.shutdown && self.all_at_or_below(|limits| limits.restore) {
            self.throttled = false;
            capacity = Some(max_capacity);
        }

        if let Some(amps) = capacity {
            info!("Temperature falling, capacity back to {amps}A");
        }
        capacity
    }
}
