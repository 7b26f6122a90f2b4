//! Public API facade for gentab.
//!
//! Open a [`Session`], register host tables with
//! [`Session::register_table`], and query them like any other table:
//!
//! ```
//! use gentab::{HostError, HostValue, RowIterator, Session, TableBuilder, rows};
//!
//! fn countdown(args: &[HostValue]) -> Result<Box<dyn RowIterator>, HostError> {
//!     let from = args[0].as_i64().unwrap_or(0);
//!     Ok(rows((0..=from).rev().map(|n| vec![HostValue::from(n)]).collect::<Vec<_>>()))
//! }
//!
//! let session = Session::open_in_memory()?;
//! session.register_table(
//!     "countdown",
//!     TableBuilder::new(["n"], countdown).parameters(["start"]),
//!     true,
//! )?;
//! let rows = session.query("SELECT n FROM countdown(3)", &[])?;
//! assert_eq!(rows.len(), 4);
//! # Ok::<(), gentab::GentabError>(())
//! ```

pub use gentab_core::{
    Row, RunResult, Session, SessionConfig, Statement, close_all_sessions, open_session_count,
    raise_engine_error,
};
pub use gentab_error::{
    EngineError, ErrorCode, GentabError, HostError, MarshalError, ResourceState, Result,
};
pub use gentab_types::{HostValue, IntegerMode, SqliteValue};
pub use gentab_vtab::{
    ConnectArgs, RowGenerator, RowIterator, Step, TableBuilder, TableDefinition, TableFactory,
    rows, try_rows,
};

/// Build a `&[HostValue]` parameter list.
///
/// ```
/// let p = gentab::params![1, "two", 3.5];
/// assert_eq!(p.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        &[] as &[$crate::HostValue]
    };
    ($($val:expr),+ $(,)?) => {
        &[$($crate::HostValue::from($val)),+] as &[$crate::HostValue]
    };
}
