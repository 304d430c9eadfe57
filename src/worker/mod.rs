//! Worker loop, the top-level state machine.
//!
//! - `state`: loop states (Idle → Electing → Holding → Searching → ...)
//! - `runner`: `WorkerLoop`, composing coordinator, job store and environment
//!
//! Each worker is one sequential flow. The only cross-process
//! synchronization is the coordinator's election; the flag is released
//! right after a claim so other workers can claim while this one executes.

pub mod runner;
pub mod state;

pub use runner::{StepOutcome, WorkerLoop};
pub use state::LoopState;
