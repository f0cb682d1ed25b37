#![cfg_attr(feature = "no-std", no_std)]

pub mod event;
pub mod event_queue;
pub mod flags;
pub mod rpc;
pub mod types;

/// Baud rate of the remote command link.
pub const SERIAL_BAUD: u32 = 115_200;

/// Milliseconds on the free running, wrapping system clock.
pub type TimeMillis = u32;
