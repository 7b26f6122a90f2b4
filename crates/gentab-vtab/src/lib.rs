//! The generator-backed virtual-table bridge.
//!
//! Nothing in this crate talks to an engine binding: [`protocol`] describes
//! the xBestIndex/xFilter/xNext surface in plain Rust, [`table`] implements
//! it on top of the host callbacks from [`contract`], and [`state`] holds the
//! session flags every table shares.

pub mod builder;
pub mod contract;
pub mod plan;
pub mod protocol;
pub mod state;
pub mod table;

pub use builder::TableBuilder;
pub use contract::{
    ConnectArgs, RowGenerator, RowIterator, Step, TableDefinition, TableFactory, rows, try_rows,
};
pub use plan::{BoundParameter, MAX_PARAMETERS, Plan, plan, unpack_arguments};
pub use protocol::{
    ColumnSink, ConstraintOp, ConstraintUsage, IndexConstraint, IndexInfo, VirtualTable,
    VirtualTableCursor,
};
pub use state::{BusyGuard, IterationGuard, SessionState};
pub use table::{Connected, GeneratorCursor, GeneratorModule, GeneratorTable};
