//! Control engine for a chain of ST-series smart serial servos: bus
//! arbitration, per-servo motion patterns, a supervisory repair loop and
//! an HTTP control surface over the whole thing.

pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod group_sync;
pub mod http;
pub mod motion;
pub mod register;
pub mod servo;
pub mod stats;
pub mod supervisor;
pub mod transport;
pub mod wire;
