//! Event-driven projection engine with deterministic replay semantics.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Event Log   │────►│   Reducer    │────►│  Transition  │
//! │  (ordered)   │     │  (pure fn)   │     │   (staged)   │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                             │                    │ commit
//!                             ▼                    ▼
//!                      ┌──────────────┐     ┌──────────────┐
//!                      │ Pool / Curve │     │    State     │
//!                      │  Positions   │     │  (digested)  │
//!                      └──────────────┘     └──────────────┘
//! ```

pub mod events;
pub mod pool;
pub mod position;
pub mod reducer;
pub mod state;
pub mod volume;
