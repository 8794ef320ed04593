//! Client side of the relay socket and everything it drives.

pub mod connection;
pub mod dispatcher;
pub mod journal;
pub mod monitor;
pub mod protocol;
pub mod state;
