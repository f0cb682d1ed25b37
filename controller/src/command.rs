//! Dispatch of remote requests onto the controller.

use crate::{hal::Board, state_machine::EvseController};
use evse_protocol::rpc::{Request, Response};
use log::debug;

impl<B: Board> EvseController<'_, B> {
    /// Handles a request from the command link.
    ///
    /// Returns `None` for requests answered by the firmware itself, which knows about uptime,
    /// the build and how to reset the chip.
    pub fn handle_request(&mut self, request: Request) -> Option<Response> {
        debug!("Request: {request:?}");

        let response = match request {
            Request::Ping(_) | Request::GetSystemInformation => return None,

            Request::GetEventCount => Response::GetEventCount(self.event_count()),
            Request::GetEventStatistics => Response::GetEventStatistics(self.event_statistics()),
            Request::GetOldestEvent => Response::GetOldestEvent(self.pop_event()),

            Request::GetState => Response::GetState(self.snapshot()),
            Request::GetSettings => Response::GetSettings(self.settings()),

            Request::Enable => {
                self.enable();
                Response::Enable
            }
            Request::Disable => {
                self.disable();
                Response::Disable
            }
            Request::Sleep => {
                self.sleep();
                Response::Sleep
            }
            Request::Reboot => {
                self.prepare_reboot();
                Response::Reboot
            }

            Request::GetCurrentCapacity => {
                Response::GetCurrentCapacity(self.current_capacity_range())
            }
            Request::SetCurrentCapacity { amps, persistence } => {
                Response::SetCurrentCapacity(self.set_current_capacity(amps, persistence))
            }
            Request::SetMaxHardwareCapacity(amps) => {
                Response::SetMaxHardwareCapacity(self.set_max_hardware_capacity(amps))
            }
            Request::SetServiceLevel(setting) => {
                Response::SetServiceLevel(self.set_service_level(setting))
            }
            Request::SetSafetyCheck { check, enabled } => {
                self.set_safety_check(check, enabled);
                Response::SetSafetyCheck
            }
            Request::SetAuthLock(locked) => {
                self.set_auth_lock(locked);
                Response::SetAuthLock
            }

            Request::GetTripCounters => Response::GetTripCounters(self.trip_counters()),
            Request::ClearTripCounters => {
                self.clear_trip_counters();
                Response::ClearTripCounters
            }

            Request::HeartbeatPulse => Response::HeartbeatPulse(self.heartbeat_pulse()),
            Request::HeartbeatConfigure {
                interval_seconds,
                fallback_amps,
            } => Response::HeartbeatConfigure(
                self.heartbeat_configure(interval_seconds, fallback_amps),
            ),
            Request::HeartbeatAcknowledge { cookie } => {
                Response::HeartbeatAcknowledge(self.heartbeat_acknowledge(cookie))
            }
            Request::GetHeartbeat => Response::GetHeartbeat(self.heartbeat_status()),

            Request::SetTimeLimit(units) => Response::SetTimeLimit(self.set_time_limit(units)),
            Request::SetChargeLimit(kwh) => Response::SetChargeLimit(self.set_charge_limit(kwh)),
        };

        Some(response)
    }
}
