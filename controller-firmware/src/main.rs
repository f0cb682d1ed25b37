#![no_std]
#![no_main]

mod board;
mod control;
mod ground_fault;
mod logger;
mod rpc;

use assign_resources::assign_resources;
use defmt::{info, unwrap};
use defmt_rtt as _;
use embassy_executor::Executor;
use embassy_rp::multicore::{spawn_core1, Stack};
use embassy_time::Instant;
use evse_controller::gfi::GroundFaultFlag;
use evse_protocol::types::{BootReason, SystemInformation};
#[cfg(feature = "panic-probe")]
use panic_probe as _;
use static_cell::StaticCell;

assign_resources! {
    status: StatusResources {
        watchdog: WATCHDOG,
    },
    pilot: PilotResources {
        slice: PWM_SLICE0,
        pin: PIN_16,
    },
    adc: AdcResources {
        adc: ADC,
        pilot: PIN_26,
        current: PIN_27,
        proximity: PIN_28,
        voltage: PIN_29,
        temperature: ADC_TEMP_SENSOR,
    },
    contactor: ContactorResources {
        relay: PIN_20,
        ac_line_1: PIN_21,
        ac_line_2: PIN_22,
    },
    gfi_sense: GfiSenseResources {
        sense: PIN_18,
    },
    gfi_test: GfiTestResources {
        test: PIN_19,
    },
    storage: StorageResources {
        flash: FLASH,
    },
    command: CommandResources {
        uart: UART0,
        tx_pin: PIN_0,
        rx_pin: PIN_1,
    },
}

#[cfg(not(feature = "panic-probe"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    use embassy_rp::{
        gpio::{Level, Output},
        watchdog::Watchdog,
    };
    use embassy_time::Duration;

    let p = unsafe { embassy_rp::Peripherals::steal() };
    let r = split_resources!(p);

    // Open the contactor and hold the pilot at +12V, the vehicle sees no supply on offer
    let mut relay = Output::new(r.contactor.relay, Level::Low);
    let mut pilot = Output::new(r.pilot.pin, Level::High);

    let mut watchdog = Watchdog::new(r.status.watchdog);

    loop {
        // Keep feeding the watchdog so that we do not quickly reset.
        // Panics should be properly investigated.
        watchdog.feed();

        relay.set_low();
        pilot.set_high();

        embassy_time::block_for(Duration::from_millis(50));
    }
}

static mut CORE_1_STACK: Stack<4096> = Stack::new();

static EXECUTOR_0: StaticCell<Executor> = StaticCell::new();
static EXECUTOR_1: StaticCell<Executor> = StaticCell::new();

/// Set from core 1 on each rising edge of the GFI sense line, consumed by the control loop.
static GFI_FLAG: GroundFaultFlag = GroundFaultFlag::new();

#[cortex_m_rt::entry]
fn main() -> ! {
    logger::init();

    let p = embassy_rp::init(Default::default());
    let r = split_resources!(p);

    info!("Version: {}", git_version::git_version!());
    info!("Boot reason: {}", boot_reason());

    // The GFI edge is serviced on core 1 so that the blocking waits of the control loop never
    // delay it
    spawn_core1(
        p.CORE1,
        unsafe { &mut *core::ptr::addr_of_mut!(CORE_1_STACK) },
        move || {
            let executor_1 = EXECUTOR_1.init(Executor::new());
            executor_1.run(|spawner| {
                unwrap!(spawner.spawn(ground_fault::task(r.gfi_sense, &GFI_FLAG)));

                #[cfg(feature = "test-panic-on-core-1")]
                unwrap!(spawner.spawn(dummy_panic()));
            });
        },
    );

    let peripherals = board::peripherals(
        r.status,
        r.pilot,
        r.adc,
        r.contactor,
        r.gfi_test,
        r.storage,
    );

    let executor_0 = EXECUTOR_0.init(Executor::new());
    executor_0.run(|spawner| {
        unwrap!(spawner.spawn(control::task(peripherals, &GFI_FLAG)));
        unwrap!(spawner.spawn(rpc::task(r.command)));

        #[cfg(feature = "test-panic-on-core-0")]
        unwrap!(spawner.spawn(dummy_panic()));
    });
}

#[cfg(any(feature = "test-panic-on-core-0", feature = "test-panic-on-core-1"))]
#[embassy_executor::task]
async fn dummy_panic() {
    embassy_time::Timer::after_secs(5).await;
    panic!("oh dear, how sad. nevermind...");
}

fn system_information() -> SystemInformation {
    SystemInformation {
        git_revision: git_version::git_version!().try_into().unwrap(),
        last_boot_reason: boot_reason(),
        uptime_milliseconds: Instant::now().as_millis(),
    }
}

fn boot_reason() -> BootReason {
    let reason = embassy_rp::pac::WATCHDOG.reason().read();

    if reason.force() {
        BootReason::WatchdogForced
    } else if reason.timer() {
        BootReason::WatchdogTimeout
    } else {
        BootReason::Normal
    }
}
