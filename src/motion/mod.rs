//! Motion Engine: the per-servo worker algorithm, its pure setpoint
//! math, and the recovery ladder it falls back on.

pub mod recovery;
pub mod setpoint;
mod worker;

pub use recovery::{run_ladder, RecoveryStep};
pub use worker::spawn;
