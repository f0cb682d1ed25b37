//! Power on self test.

use crate::{config::Config, hal::Board, pilot::SteadyLevel, station::Station};
use evse_protocol::{
    flags::PersistentFlags,
    types::{EvseState, ServiceLevel},
};
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostResult {
    /// A vehicle was already connected, nothing that would disturb it was tested.
    Skipped,
    /// All enabled checks passed, with the supply type if it was detected.
    Passed { service_level: Option<ServiceLevel> },
    Failed(EvseState),
}

impl<'a, B: Board> Station<'a, B> {
    pub fn power_on_self_test(&mut self, config: &Config, flags: &PersistentFlags) -> PostResult {
        let capabilities = &config.capabilities;

        self.pilot.set_level(SteadyLevel::Positive);
        self.contactor.open();

        if self.sampler.sample().high < config.thresholds.a_b {
            info!("Vehicle connected at power on, skipping self test");
            return PostResult::Skipped;
        }

        if capabilities.advanced_power && flags.stuck_relay_check_enabled() {
            self.settle(config.timing.relay_settle);

            let lines = self.lines.read();
            let stuck = if capabilities.ground_monitor {
                lines.line_2
            } else {
                lines.any_live()
            };
            if stuck {
                warn!("Self test: AC present with contactor open");
                return PostResult::Failed(EvseState::StuckRelay);
            }
        }

        if capabilities.gfi && capabilities.gfi_self_test && flags.gfi_self_test_enabled() {
            let result = self.gfi.self_test(&mut self.delay, &mut self.watchdog);
            if !result.passed() {
                warn!("Self test: GFI self test failed, {result:?}");
                return PostResult::Failed(EvseState::GfiTestFailed);
            }
        }

        let mut service_level = None;

        if capabilities.advanced_power
            && !capabilities.ground_monitor
            && flags.auto_service_level_enabled()
        {
            self.contactor.close();
            self.settle(config.timing.relay_settle);
            let lines = self.lines.read();
            self.contactor.open();

            service_level = lines.service_level();
            match service_level {
                Some(level) => info!("Self test: detected {level:?} supply"),
                None if flags.ground_check_enabled() => {
                    warn!("Self test: no AC sensed, assuming no ground");
                    return PostResult::Failed(EvseState::NoGround);
                }
                None => {}
            }
        }

        info!("Self test passed");
        PostResult::Passed { service_level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gfi::GroundFaultFlag,
        sim::{Sim, SimBoard, Vehicle},
    };

    fn station(sim: &Sim, config: &Config) -> Station<'static, SimBoard> {
        let flag: &'static GroundFaultFlag = sim.gfi_flag;
        Station::new(sim.peripherals(), flag, config)
    }

    #[test]
    fn clean_l2_supply() {
        let sim = Sim::new();
        let config = Config::default();
        let mut station = station(&sim, &config);

        let result = station.power_on_self_test(&config, &PersistentFlags::default());
        assert_eq!(
            result,
            PostResult::Passed {
                service_level: Some(ServiceLevel::L2)
            }
        );
        assert!(!sim.mains.relay_closed());
        assert_eq!(sim.gfi.test_pulses(), 1);
    }

    #[test]
    fn l1_supply() {
        let sim = Sim::new();
        sim.mains.wire_l1();
        let config = Config::default();
        let mut station = station(&sim, &config);

        let result = station.power_on_self_test(&config, &PersistentFlags::default());
        assert_eq!(
            result,
            PostResult::Passed {
                service_level: Some(ServiceLevel::L1)
            }
        );
    }

    #[test]
    fn connected_vehicle_skips() {
        let sim = Sim::new();
        sim.pilot.vehicle(Vehicle::Connected);
        let config = Config::default();
        let mut station = station(&sim, &config);

        let result = station.power_on_self_test(&config, &PersistentFlags::default());
        assert_eq!(result, PostResult::Skipped);
        assert_eq!(sim.gfi.test_pulses(), 0);
    }

    #[test]
    fn welded_relay() {
        let sim = Sim::new();
        sim.mains.weld_relay(true);
        let config = Config::default();
        let mut station = station(&sim, &config);

        let result = station.power_on_self_test(&config, &PersistentFlags::default());
        assert_eq!(result, PostResult::Failed(EvseState::StuckRelay));
    }

    #[test]
    fn dead_gfi() {
        let sim = Sim::new();
        sim.gfi.set_responds_to_test(false);
        let config = Config::default();
        let mut station = station(&sim, &config);

        let result = station.power_on_self_test(&config, &PersistentFlags::default());
        assert_eq!(result, PostResult::Failed(EvseState::GfiTestFailed));
    }

    #[test]
    fn no_ground() {
        let sim = Sim::new();
        sim.mains.set_grounded(false);
        let config = Config::default();
        let mut station = station(&sim, &config);

        let result = station.power_on_self_test(&config, &PersistentFlags::default());
        assert_eq!(result, PostResult::Failed(EvseState::NoGround));

        let mut flags = PersistentFlags::default();
        flags.set(evse_protocol::flags::ConfigFlag::GroundCheckDisabled, true);
        let result = station.power_on_self_test(&config, &flags);
        assert_eq!(
            result,
            PostResult::Passed {
                service_level: None
            }
        );
    }
}
