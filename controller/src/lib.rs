#![cfg_attr(not(test), no_std)]

pub mod ac_sense;
pub mod ammeter;
pub mod capacity;
mod changed;
pub mod command;
pub mod config;
pub mod debounce;
pub mod gfi;
pub mod hal;
pub mod heartbeat;
pub mod limits;
pub mod nv;
pub mod pilot;
pub mod post;
pub mod state_machine;
pub mod station;
pub mod temperature;

#[cfg(test)]
mod sim;

pub use evse_protocol::TimeMillis;

/// Milliseconds from `since` to `now` on a wrapping clock.
pub fn elapsed(now: TimeMillis, since: TimeMillis) -> TimeMillis {
    now.wrapping_sub(since)
}
