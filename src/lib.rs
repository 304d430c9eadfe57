//! Queue Runner: filesystem-coordinated job workers.

pub mod config;
pub mod coordinator;
pub mod environment;
pub mod error;
pub mod identity;
pub mod logging;
pub mod shutdown;
pub mod store;
pub mod worker;
pub mod workspace;
