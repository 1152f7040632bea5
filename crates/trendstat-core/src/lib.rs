pub mod config;
pub mod engine;
pub mod io;
pub mod projector;
pub mod records;
pub mod rolling;
pub mod sequencer;

pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineError, EngineOutput, RollingStatsEngine};
pub use records::{DropReport, Record};
