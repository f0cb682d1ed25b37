//! The contactor and the AC sense inputs on its load side.

use crate::hal::InfallibleExt;
use core::convert::Infallible;
use embedded_hal::digital::{InputPin, OutputPin};
use evse_protocol::types::ServiceLevel;
use log::info;

pub struct Contactor<R> {
    relay: R,
    closed: bool,
}

impl<R: OutputPin<Error = Infallible>> Contactor<R> {
    /// Takes the relay and opens it.
    pub fn new(mut relay: R) -> Self {
        relay.set_low().into_ok();
        Self {
            relay,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if !self.closed {
            info!("Closing contactor");
        }
        self.relay.set_high().into_ok();
        self.closed = true;
    }

    pub fn open(&mut self) {
        if self.closed {
            info!("Opening contactor");
        }
        self.relay.set_low().into_ok();
        self.closed = false;
    }
}

/// Which AC lines currently read as live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineStatus {
    pub line_1: bool,
    pub line_2: bool,
}

impl LineStatus {
    pub fn any_live(&self) -> bool {
        self.line_1 || self.line_2
    }

    pub fn both_open(&self) -> bool {
        !self.any_live()
    }

    pub fn both_live(&self) -> bool {
        self.line_1 && self.line_2
    }

    /// Supply type implied by the live lines with the contactor closed, `None` if neither is live.
    pub fn service_level(&self) -> Option<ServiceLevel> {
        match (self.line_1, self.line_2) {
            (false, false) => None,
            (true, true) => Some(ServiceLevel::L2),
            _ => Some(ServiceLevel::L1),
        }
    }
}

/// Opto isolated sense inputs, pulled low while their line is live.
///
/// With a ground monitor fitted the first input is the ground test and the second the relay test.
pub struct AcLineSense<L1, L2> {
    line_1: L1,
    line_2: L2,
}

impl<L1, L2> AcLineSense<L1, L2>
where
    L1: InputPin<Error = Infallible>,
    L2: InputPin<Error = Infallible>,
{
    pub fn new(line_1: L1, line_2: L2) -> Self {
        Self { line_1, line_2 }
    }

    pub fn read(&mut self) -> LineStatus {
        LineStatus {
            line_1: self.line_1.is_low().into_ok(),
            line_2: self.line_2.is_low().into_ok(),
        }
    }
}
