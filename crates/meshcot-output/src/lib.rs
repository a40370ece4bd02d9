//! meshcot output - CoT delivery
//!
//! This crate owns the outbound half of the gateway:
//! - Transport senders (UDP unicast, UDP broadcast/multicast, TCP)
//! - The periodic dispatch loop that drains the node cache

pub mod dispatch;
pub mod sender;

pub use dispatch::{run_dispatch, DispatchConfig};
pub use sender::{CotSender, Protocol, SendError};
