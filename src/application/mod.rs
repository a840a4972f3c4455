//! Application layer orchestrating the purchase flow.
//!
//! `state_machine` drives one purchase through the gateway's 3DS2 handshake;
//! `webhooks` records the out-of-band ACS callbacks that handshake waits on.

pub mod state_machine;
pub mod webhooks;
