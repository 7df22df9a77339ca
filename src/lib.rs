pub mod config;
pub mod dispense;
pub mod error;
pub mod experiment;
pub mod geometry;
pub mod measure;
pub mod objective;
pub mod operator;
pub mod optimizer;
pub mod store;

pub use error::{OptResult, OptobotError};
pub use experiment::{ExperimentState, LoopBuildParams, OptimisationLoop};
