use crate::{
    ac_sense::{AcLineSense, Contactor},
    ammeter::{Ammeter, Voltmeter},
    capacity::ProximityPilot,
    config::Config,
    gfi::{GroundFaultFlag, GroundFaultLatch},
    hal::{settle, Board, Clock, Peripherals},
    nv::SettingsStore,
    pilot::{PilotSignalDriver, PilotVoltageSampler},
    temperature::TemperatureMonitor,
    TimeMillis,
};

/// The station hardware, wrapped in the drivers the state machine works through.
pub struct Station<'a, B: Board> {
    pub(crate) clock: B::Clock,
    pub(crate) delay: B::Delay,
    pub(crate) watchdog: B::Watchdog,

    pub(crate) pilot: PilotSignalDriver<B::PilotTimer>,
    pub(crate) sampler: PilotVoltageSampler<B::PilotAdc>,
    pub(crate) contactor: Contactor<B::Relay>,
    pub(crate) lines: AcLineSense<B::AcLine1, B::AcLine2>,
    pub(crate) gfi: GroundFaultLatch<'a, B::GfiSense, B::GfiTest>,

    pub(crate) ammeter: Ammeter<B::CurrentAdc>,
    pub(crate) voltmeter: Voltmeter<B::VoltageAdc>,
    pub(crate) proximity: ProximityPilot<B::ProximityAdc>,
    pub(crate) temperatures: TemperatureMonitor<B::Temperatures>,

    pub(crate) store: SettingsStore<B::Storage>,
}

impl<'a, B: Board> Station<'a, B> {
    pub fn new(peripherals: Peripherals<B>, gfi_flag: &'a GroundFaultFlag, config: &Config) -> Self {
        let mut store = SettingsStore::new(peripherals.storage);
        let ammeter_calibration = store.ammeter_calibration();
        let voltmeter_calibration = store.voltmeter_calibration();
        let window = config.timing.ammeter_sample_window;

        Self {
            clock: peripherals.clock,
            delay: peripherals.delay,
            watchdog: peripherals.watchdog,

            pilot: PilotSignalDriver::new(peripherals.pilot_timer),
            sampler: PilotVoltageSampler::new(
                peripherals.pilot_adc,
                config.timing.pilot_samples_per_tick,
            ),
            contactor: Contactor::new(peripherals.relay),
            lines: AcLineSense::new(peripherals.ac_line_1, peripherals.ac_line_2),
            gfi: GroundFaultLatch::new(gfi_flag, peripherals.gfi_sense, peripherals.gfi_test),

            ammeter: Ammeter::new(peripherals.current_adc, ammeter_calibration, window),
            voltmeter: Voltmeter::new(peripherals.voltage_adc, voltmeter_calibration, window),
            proximity: ProximityPilot::new(peripherals.proximity_adc),
            temperatures: TemperatureMonitor::new(
                peripherals.temperatures,
                config.temperatures.clone(),
            ),

            store,
        }
    }

    pub fn now(&self) -> TimeMillis {
        self.clock.now()
    }

    /// Busy waits, still feeding the watchdog.
    pub(crate) fn settle(&mut self, millis: TimeMillis) {
        settle(&mut self.delay, &mut self.watchdog, millis);
    }
}
