//! SQLite sessions whose virtual tables are backed by host callbacks.
//!
//! [`Session`] owns a rusqlite connection and the flags its generator
//! tables share. Tables are registered with [`Session::register_table`];
//! queries run through [`Statement`]. Errors raised by host callbacks while
//! the engine is stepping come back to the caller unchanged.

pub mod config;
mod convert;
pub mod error_bridge;
mod module;
pub mod registry;
pub mod session;
pub mod statement;

pub use config::SessionConfig;
pub use error_bridge::raise_engine_error;
pub use registry::{close_all_sessions, open_session_count};
pub use session::Session;
pub use statement::{Row, RunResult, Statement};
