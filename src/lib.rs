//! Projection of fixed-product market-maker events into pool curves, volume
//! ledgers and weighted-average-cost positions.

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod math;
pub mod reliability;
pub mod storage;
