//! Controller property table, device facade and an in-process simulator.

pub mod buchi;
pub mod mock;
pub mod parameters;

pub use buchi::BuchiController;
pub use parameters::{Command, Parameter, Value};
