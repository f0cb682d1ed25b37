use crate::GfiSenseResources;
use defmt::warn;
use embassy_rp::gpio::{Input, Pull};
use evse_controller::gfi::GroundFaultFlag;

#[embassy_executor::task]
pub(crate) async fn task(r: GfiSenseResources, flag: &'static GroundFaultFlag) {
    let mut sense = Input::new(r.sense, Pull::Down);

    loop {
        sense.wait_for_rising_edge().await;
        flag.on_rising_edge();

        if flag.is_set() {
            warn!("GFI sense line tripped");
        }
    }
}
