//! Virtual gamepad bus engine.
//!
//! Claims generic game controllers, translates their state into the Xbox 360
//! wire report and forwards it to a virtual bus driver, one slot per device.

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod mapping;
pub mod protocol;

pub use config::EngineConfig;
pub use engine::{Engine, EngineOptions, EngineStatus, ReconcileSummary, SlotStatus};
pub use error::{EngineError, Result};
