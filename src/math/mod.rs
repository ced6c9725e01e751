//! Integer and fixed-point arithmetic. No floating point crosses this boundary.

pub mod decimal;
pub mod int;
pub mod serde_big;

pub use decimal::Decimal;
