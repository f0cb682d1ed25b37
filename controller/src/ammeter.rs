//! Line current and voltage measurement.

use crate::{
    elapsed,
    hal::{AnalogInput, Clock},
    nv::Calibration,
    TimeMillis,
};
use log::debug;

const ADC_MIDPOINT: i32 = 512;
const ZERO_CROSSING_DEBOUNCE_MS: TimeMillis = 5;
const MAX_SAMPLES_PER_READING: usize = 4096;
const AVERAGE_WINDOW: usize = 32;

/// Integer square root, rounded down.
pub fn isqrt(value: u32) -> u32 {
    let mut remainder = value;
    let mut root = 0u32;
    let mut bit = 1u32 << 30;

    while bit > value {
        bit >>= 2;
    }

    while bit != 0 {
        if remainder >= root + bit {
            remainder -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }

    root
}

/// RMS of one half cycle of the current waveform, in ADC counts about the midpoint.
///
/// The half cycle is the one between the first and second zero crossings, the reading completes
/// at the third. Returns zero if the waveform never crosses within `window`.
pub fn sample_rms<A: AnalogInput, C: Clock>(adc: &mut A, clock: &C, window: TimeMillis) -> u32 {
    let start = clock.now();
    let mut last_crossing = start;
    let mut crossings = 0u8;
    let mut previous_positive = None;
    let mut sum_of_squares = 0u64;
    let mut count = 0u64;

    for _ in 0..MAX_SAMPLES_PER_READING {
        let now = clock.now();
        if elapsed(now, start) >= window {
            break;
        }

        let sample = adc.read() as i32 - ADC_MIDPOINT;
        let positive = sample >= 0;

        if let Some(previous) = previous_positive {
            if previous != positive
                && (crossings == 0 || elapsed(now, last_crossing) >= ZERO_CROSSING_DEBOUNCE_MS)
            {
                crossings += 1;
                last_crossing = now;

                if crossings == 3 {
                    return match count {
                        0 => 0,
                        n => isqrt((sum_of_squares / n) as u32),
                    };
                }
            }
        }
        previous_positive = Some(positive);

        if crossings == 1 {
            sum_of_squares += (sample * sample) as u64;
            count += 1;
        }
    }

    0
}

/// Mean of the last `N` values, `None` until `N` values have been seen.
pub struct MovingAverage<const N: usize> {
    samples: [u32; N],
    next: usize,
    filled: bool,
}

impl<const N: usize> Default for MovingAverage<N> {
    fn default() -> Self {
        Self {
            samples: [0; N],
            next: 0,
            filled: false,
        }
    }
}

impl<const N: usize> MovingAverage<N> {
    pub fn push(&mut self, value: u32) -> Option<u32> {
        self.samples[self.next] = value;
        self.next = (self.next + 1) % N;
        if self.next == 0 {
            self.filled = true;
        }

        self.filled
            .then(|| (self.samples.iter().map(|s| *s as u64).sum::<u64>() / N as u64) as u32)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub struct Ammeter<A> {
    adc: A,
    calibration: Calibration<i16>,
    window: TimeMillis,
    average: MovingAverage<AVERAGE_WINDOW>,
}

impl<A: AnalogInput> Ammeter<A> {
    pub fn new(adc: A, calibration: Calibration<i16>, window: TimeMillis) -> Self {
        Self {
            adc,
            calibration,
            window,
            average: MovingAverage::default(),
        }
    }

    /// Takes one RMS sample, returning milliamps once the averaging window has filled.
    pub fn read<C: Clock>(&mut self, clock: &C) -> Option<u32> {
        let rms = sample_rms(&mut self.adc, clock, self.window);
        let average = self.average.push(rms)?;

        let milliamps = average as i64 * self.calibration.scale as i64
            - self.calibration.offset as i64;
        let milliamps = milliamps.max(0) as u32;
        debug!("Current: {rms} counts RMS, {milliamps}mA averaged");
        Some(milliamps)
    }

    /// Discards the averaging window, done at the start of each charge.
    pub fn reset(&mut self) {
        self.average.reset();
    }
}

pub struct Voltmeter<A> {
    adc: A,
    calibration: Calibration<u32>,
    window: TimeMillis,
}

impl<A: AnalogInput> Voltmeter<A> {
    pub fn new(adc: A, calibration: Calibration<u32>, window: TimeMillis) -> Self {
        Self {
            adc,
            calibration,
            window,
        }
    }

    /// Peak over one window scaled to millivolts.
    pub fn read<C: Clock>(&mut self, clock: &C) -> u32 {
        let start = clock.now();
        let mut peak = 0u16;

        for _ in 0..MAX_SAMPLES_PER_READING {
            if elapsed(clock.now(), start) >= self.window {
                break;
            }
            peak = peak.max(self.adc.read());
        }

        peak as u32 * self.calibration.scale as u32 + self.calibration.offset
    }
}
