//! Driving and sampling the J1772 control pilot.

use crate::{
    config::{MAX_CURRENT_CAPACITY_L2, MIN_CURRENT_CAPACITY},
    hal::{AnalogInput, PilotTimer},
};
use evse_protocol::{
    flags::{StatusFlag, VolatileFlags},
    types::PilotLevel,
};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PilotError {
    #[error("{amps}A cannot be offered on the pilot")]
    InvalidAmperage { amps: u8 },
}

/// Duty cycle in tenths of a percent that offers `amps` to the vehicle.
///
/// Up to 51A the offered current is `duty% * 0.6`, above that it is `(duty% - 64) * 2.5`.
pub fn duty_permille(amps: u8) -> Result<u16, PilotError> {
    let amps_wide = amps as u16;
    match amps {
        MIN_CURRENT_CAPACITY..=51 => Ok(amps_wide * 1000 / 60),
        52..=MAX_CURRENT_CAPACITY_L2 => Ok(640 + amps_wide * 4),
        _ => Err(PilotError::InvalidAmperage { amps }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteadyLevel {
    Positive,
    Negative,
}

impl From<SteadyLevel> for PilotLevel {
    fn from(level: SteadyLevel) -> Self {
        match level {
            SteadyLevel::Positive => PilotLevel::Steady12V,
            SteadyLevel::Negative => PilotLevel::SteadyNeg12V,
        }
    }
}

pub struct PilotSignalDriver<T> {
    timer: T,
    level: PilotLevel,
}

impl<T: PilotTimer> PilotSignalDriver<T> {
    pub fn new(timer: T) -> Self {
        let mut driver = Self {
            timer,
            level: PilotLevel::Steady12V,
        };
        driver.set_level(SteadyLevel::Positive);
        driver
    }

    pub fn level(&self) -> PilotLevel {
        self.level
    }

    pub fn set_level(&mut self, level: SteadyLevel) {
        critical_section::with(|_| {
            self.timer.set_constant(level == SteadyLevel::Positive);
        });
        self.level = level.into();
    }

    /// Offer `amps` to the vehicle.
    ///
    /// An amperage that cannot be encoded leaves the pilot at steady +12V.
    pub fn set_pwm(&mut self, amps: u8) -> Result<(), PilotError> {
        match duty_permille(amps) {
            Ok(duty) => {
                critical_section::with(|_| {
                    self.timer.set_pwm(duty);
                });
                debug!("Pilot offering {amps}A ({duty} permille)");
                self.level = PilotLevel::Pwm;
                Ok(())
            }
            Err(e) => {
                self.set_level(SteadyLevel::Positive);
                Err(e)
            }
        }
    }
}

/// Extremes of the pilot voltage seen over one sampling window, in ADC counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PilotReading {
    pub low: u16,
    pub high: u16,
}

pub struct PilotVoltageSampler<A> {
    adc: A,
    samples: usize,
}

impl<A: AnalogInput> PilotVoltageSampler<A> {
    pub fn new(adc: A, samples: usize) -> Self {
        Self {
            adc,
            samples: samples.max(1),
        }
    }

    pub fn sample(&mut self) -> PilotReading {
        let mut reading = PilotReading {
            low: u16::MAX,
            high: u16::MIN,
        };

        for _ in 0..self.samples {
            let value = self.adc.read();
            reading.low = reading.low.min(value);
            reading.high = reading.high.max(value);
        }

        reading
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEdge {
    Connected,
    Disconnected,
}

/// Tracks vehicle presence in the volatile flags from a fresh pilot reading.
///
/// Nothing can be inferred while the pilot is held at -12V, the flags are left alone.
pub fn update_connection(
    flags: &mut VolatileFlags,
    level: PilotLevel,
    reading: PilotReading,
    a_b_threshold: u16,
) -> Option<ConnectionEdge> {
    if level == PilotLevel::SteadyNeg12V {
        return None;
    }

    let was_connected = flags.contains(StatusFlag::EvConnected);
    let connected = reading.high < a_b_threshold;

    flags.set(StatusFlag::EvConnectedPrevious, was_connected);
    flags.set(StatusFlag::EvConnected, connected);

    match (was_connected, connected) {
        (false, true) => {
            flags.remove(StatusFlag::SessionEnded);
            Some(ConnectionEdge::Connected)
        }
        (true, false) => Some(ConnectionEdge::Disconnected),
        _ => None,
    }
}
