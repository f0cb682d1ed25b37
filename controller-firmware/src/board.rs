use crate::{
    AdcResources, ContactorResources, GfiTestResources, PilotResources, StatusResources,
    StorageResources,
};
use core::{cell::RefCell, convert::Infallible};
use defmt::warn;
use embassy_rp::{
    adc::{Adc, Blocking as AdcBlocking, Channel, Config as AdcConfig},
    flash::{Blocking as FlashBlocking, Flash, ERASE_SIZE},
    gpio::{Input, Level, Output, Pull},
    peripherals::FLASH,
    pwm::{Config as PwmConfig, Pwm},
};
use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embassy_time::{Delay, Duration, Instant};
use embedded_hal::digital::{ErrorType, InputPin};
use evse_controller::{
    hal::{self, AnalogInput, Board, NonVolatileStorage, Peripherals, PilotTimer, TemperatureSensors},
    TimeMillis,
};
use evse_protocol::types::Temperatures;
use static_cell::StaticCell;

const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// Settings live in the last sector of flash, clear of the program image.
const SETTINGS_OFFSET: u32 = (FLASH_SIZE - ERASE_SIZE) as u32;
const SETTINGS_SIZE: usize = 256;

pub(crate) const WATCHDOG_TIMEOUT: Duration = Duration::from_millis(hal::WATCHDOG_TIMEOUT_MS as u64);

/// GPIO the GFI sense line is wired to, read directly by core 0 while core 1 owns the pin.
const GFI_SENSE_GPIO: u32 = 18;

const PILOT_FREQUENCY_HZ: u32 = 1_000;
const PILOT_DIVIDER: u8 = 125;

pub(crate) struct StationBoard;

impl Board for StationBoard {
    type Clock = SystemClock;
    type Delay = Delay;
    type Watchdog = Watchdog;

    type PilotTimer = PilotPwm;
    type PilotAdc = AdcInput;
    type CurrentAdc = AdcInput;
    type VoltageAdc = AdcInput;
    type ProximityAdc = AdcInput;

    type Relay = Output<'static>;
    type AcLine1 = Input<'static>;
    type AcLine2 = Input<'static>;

    type GfiSense = GfiSenseLevel;
    type GfiTest = Output<'static>;

    type Storage = SettingsFlash;
    type Temperatures = InternalTemperature;
}

pub(crate) fn peripherals(
    status: StatusResources,
    pilot: PilotResources,
    adc: AdcResources,
    contactor: ContactorResources,
    gfi: GfiTestResources,
    storage: StorageResources,
) -> Peripherals<StationBoard> {
    static ADC: StaticCell<SharedAdc> = StaticCell::new();
    let shared = &*ADC.init(Mutex::new(RefCell::new(Adc::new_blocking(
        adc.adc,
        AdcConfig::default(),
    ))));

    let mut watchdog = embassy_rp::watchdog::Watchdog::new(status.watchdog);
    watchdog.start(WATCHDOG_TIMEOUT);

    Peripherals {
        clock: SystemClock,
        delay: Delay,
        watchdog: Watchdog(watchdog),

        pilot_timer: PilotPwm::new(pilot),
        pilot_adc: AdcInput::new(shared, Channel::new_pin(adc.pilot, Pull::None)),
        current_adc: AdcInput::new(shared, Channel::new_pin(adc.current, Pull::None)),
        voltage_adc: AdcInput::new(shared, Channel::new_pin(adc.voltage, Pull::None)),
        proximity_adc: AdcInput::new(shared, Channel::new_pin(adc.proximity, Pull::None)),

        relay: Output::new(contactor.relay, Level::Low),
        ac_line_1: Input::new(contactor.ac_line_1, Pull::Up),
        ac_line_2: Input::new(contactor.ac_line_2, Pull::Up),

        gfi_sense: GfiSenseLevel,
        gfi_test: Output::new(gfi.test, Level::Low),

        storage: SettingsFlash::new(storage),
        temperatures: InternalTemperature {
            adc: shared,
            channel: Channel::new_temp_sensor(adc.temperature),
        },
    }
}

pub(crate) struct SystemClock;

impl hal::Clock for SystemClock {
    fn now(&self) -> TimeMillis {
        Instant::now().as_millis() as TimeMillis
    }
}

pub(crate) struct Watchdog(embassy_rp::watchdog::Watchdog);

impl hal::Watchdog for Watchdog {
    fn feed(&mut self) {
        self.0.feed();
    }
}

/// The pilot oscillator on PWM slice 0, channel A.
pub(crate) struct PilotPwm {
    pwm: Pwm<'static>,
    config: PwmConfig,
}

impl PilotPwm {
    fn new(r: PilotResources) -> Self {
        let clock_hz = embassy_rp::clocks::clk_sys_freq();
        let top = (clock_hz / (PILOT_FREQUENCY_HZ * PILOT_DIVIDER as u32)) as u16 - 1;

        let mut config = PwmConfig::default();
        config.divider = PILOT_DIVIDER.into();
        config.top = top;
        config.compare_a = top + 1;

        let pwm = Pwm::new_output_a(r.slice, r.pin, config.clone());
        Self { pwm, config }
    }

    fn apply(&mut self, compare: u16) {
        self.config.compare_a = compare;
        self.pwm.set_config(&self.config);
    }
}

impl PilotTimer for PilotPwm {
    fn set_constant(&mut self, high: bool) {
        let compare = if high { self.config.top + 1 } else { 0 };
        self.apply(compare);
    }

    fn set_pwm(&mut self, duty_permille: u16) {
        let period = self.config.top as u32 + 1;
        let compare = period * duty_permille.min(1000) as u32 / 1000;
        self.apply(compare as u16);
    }
}

type SharedAdc = Mutex<CriticalSectionRawMutex, RefCell<Adc<'static, AdcBlocking>>>;

/// One channel of the ADC, which is shared between every analog input.
pub(crate) struct AdcInput {
    adc: &'static SharedAdc,
    channel: Channel<'static>,
}

impl AdcInput {
    fn new(adc: &'static SharedAdc, channel: Channel<'static>) -> Self {
        Self { adc, channel }
    }
}

impl AnalogInput for AdcInput {
    fn read(&mut self) -> u16 {
        let channel = &mut self.channel;
        self.adc.lock(|adc| match adc.borrow_mut().blocking_read(channel) {
            // 12 bit conversion
            Ok(value) => value >> 2,
            Err(e) => {
                warn!("ADC read failed: {}", e);
                0
            }
        })
    }
}

/// RP2040 on die temperature sensor, reported as the ambient reading.
pub(crate) struct InternalTemperature {
    adc: &'static SharedAdc,
    channel: Channel<'static>,
}

impl TemperatureSensors for InternalTemperature {
    fn read(&mut self) -> Temperatures {
        let channel = &mut self.channel;
        let raw = self
            .adc
            .lock(|adc| adc.borrow_mut().blocking_read(channel).ok());

        Temperatures {
            ambient: raw.map(|raw| {
                let millivolts = raw as i32 * 3300 / 4096;
                (270 - (millivolts - 706) * 10_000 / 1721) as i16
            }),
            ambient_secondary: None,
            infrared: None,
        }
    }
}

/// Level of the GFI sense line.
///
/// The pin itself belongs to the edge task on core 1, so this reads the SIO input register.
pub(crate) struct GfiSenseLevel;

impl ErrorType for GfiSenseLevel {
    type Error = Infallible;
}

impl InputPin for GfiSenseLevel {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let levels = embassy_rp::pac::SIO.gpio_in(0).read();
        Ok(levels & (1 << GFI_SENSE_GPIO) != 0)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Settings mirrored in RAM, with each write rewriting the settings sector.
pub(crate) struct SettingsFlash {
    flash: Flash<'static, FLASH, FlashBlocking, FLASH_SIZE>,
    mirror: [u8; SETTINGS_SIZE],
}

impl SettingsFlash {
    fn new(r: StorageResources) -> Self {
        let mut flash = Flash::<_, FlashBlocking, FLASH_SIZE>::new_blocking(r.flash);

        let mut mirror = [0xff; SETTINGS_SIZE];
        if let Err(e) = flash.blocking_read(SETTINGS_OFFSET, &mut mirror) {
            warn!("Failed to read settings, using defaults: {}", e);
            mirror = [0xff; SETTINGS_SIZE];
        }

        Self { flash, mirror }
    }

    fn commit(&mut self) {
        if let Err(e) = self
            .flash
            .blocking_erase(SETTINGS_OFFSET, SETTINGS_OFFSET + ERASE_SIZE as u32)
        {
            warn!("Failed to erase settings sector: {}", e);
            return;
        }
        if let Err(e) = self.flash.blocking_write(SETTINGS_OFFSET, &self.mirror) {
            warn!("Failed to write settings: {}", e);
        }
    }
}

impl NonVolatileStorage for SettingsFlash {
    fn read(&mut self, offset: u16, buffer: &mut [u8]) {
        let start = offset as usize;
        match self.mirror.get(start..start + buffer.len()) {
            Some(stored) => buffer.copy_from_slice(stored),
            None => buffer.fill(0xff),
        }
    }

    fn write(&mut self, offset: u16, data: &[u8]) {
        let start = offset as usize;
        let Some(stored) = self.mirror.get_mut(start..start + data.len()) else {
            warn!("Settings write out of range at {=u16:#x}", offset);
            return;
        };

        if stored != data {
            stored.copy_from_slice(data);
            self.commit();
        }
    }
}
