use crate::board::StationBoard;
use defmt::info;
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Ticker};
use evse_controller::{
    config::Config, gfi::GroundFaultFlag, hal::Peripherals, state_machine::EvseController,
};
use evse_protocol::rpc::{Request, Response};

const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Requests from the command link that only the control loop may act on.
pub(crate) static REQUESTS: Channel<CriticalSectionRawMutex, Request, 1> = Channel::new();

/// Replies to [`REQUESTS`], in order.
pub(crate) static RESPONSES: Channel<CriticalSectionRawMutex, Option<Response>, 1> =
    Channel::new();

#[embassy_executor::task]
pub(crate) async fn task(
    peripherals: Peripherals<StationBoard>,
    gfi_flag: &'static GroundFaultFlag,
) {
    let mut controller = EvseController::new(peripherals, gfi_flag, Config::default());
    controller.start();

    let mut ticker = Ticker::every(TICK_INTERVAL);

    loop {
        match select(ticker.next(), REQUESTS.receive()).await {
            Either::First(_) => {
                // Once a reboot is requested the watchdog is left to starve
                if !controller.reboot_requested() {
                    controller.tick();
                }
            }
            Either::Second(request) => {
                let response = controller.handle_request(request);
                if controller.reboot_requested() {
                    info!("Control loop halted for reboot");
                }
                RESPONSES.send(response).await;
            }
        }
    }
}
