use crate::{
    control::{REQUESTS, RESPONSES},
    CommandResources,
};
use core::time::Duration as CoreDuration;
use defmt::{debug, info, warn};
use embassy_rp::{
    bind_interrupts,
    peripherals::UART0,
    uart::{BufferedInterruptHandler, BufferedUart, Config as UartConfig},
};
use embassy_time::Timer;
use evse_protocol::rpc::{Request, Response};
use static_cell::StaticCell;
use teeny_rpc::{server::Server, transport::embedded::EioTransport};

bind_interrupts!(struct Irqs {
    UART0_IRQ  => BufferedInterruptHandler<UART0>;
});

#[embassy_executor::task]
pub(crate) async fn task(r: CommandResources) {
    const TX_BUFFER_SIZE: usize = 256;
    static TX_BUFFER: StaticCell<[u8; TX_BUFFER_SIZE]> = StaticCell::new();
    let tx_buffer = &mut TX_BUFFER.init([0; TX_BUFFER_SIZE])[..];

    const RX_BUFFER_SIZE: usize = 256;
    static RX_BUFFER: StaticCell<[u8; RX_BUFFER_SIZE]> = StaticCell::new();
    let rx_buffer = &mut RX_BUFFER.init([0; RX_BUFFER_SIZE])[..];

    let mut config = UartConfig::default();
    config.baudrate = evse_protocol::SERIAL_BAUD;

    let uart = BufferedUart::new(
        r.uart, r.tx_pin, r.rx_pin, Irqs, tx_buffer, rx_buffer, config,
    );

    // Setup RPC server
    let transport = EioTransport::<_, 512>::new(uart);
    let mut server = Server::<_, Request, Response>::new(transport, CoreDuration::from_millis(100));

    loop {
        match server.wait_for_request(CoreDuration::from_secs(5)).await {
            Ok(request) => {
                let response = match request {
                    Request::Ping(i) => Response::Ping(i),
                    Request::GetSystemInformation => {
                        Response::GetSystemInformation(crate::system_information())
                    }
                    request => {
                        REQUESTS.send(request).await;
                        let Some(response) = RESPONSES.receive().await else {
                            warn!("Control loop did not answer request");
                            continue;
                        };
                        response
                    }
                };

                let reboot = matches!(response, Response::Reboot);

                if let Err(e) = server.send_response(response).await {
                    warn!("Server failed sending response: {}", e);
                }

                if reboot {
                    // Give the response time to leave the UART
                    Timer::after_millis(50).await;
                    info!("Rebooting");
                    embassy_rp::pac::WATCHDOG.ctrl().write(|w| w.set_trigger(true));
                }
            }
            Err(teeny_rpc::Error::Timeout) => {
                debug!("Timeout when waiting for request");
            }
            Err(e) => {
                warn!("Server failed waiting for request: {}", e);
            }
        }
    }
}
