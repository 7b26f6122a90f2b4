//! The virtual-table calling convention, free of any engine binding.
//!
//! Engine glue copies SQLite's `sqlite3_index_info` into [`IndexInfo`],
//! lets the table fill in its half, and copies the answer back. Scans go
//! through [`VirtualTableCursor`] in the order SQLite drives them:
//! `filter`, then `eof`/`column`/`rowid`/`next` until `eof` holds.

use gentab_error::Result;
use gentab_types::SqliteValue;

/// `SQLITE_INDEX_CONSTRAINT_*`, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintOp {
    Eq,
    Gt,
    Le,
    Lt,
    Ge,
    Match,
    Like,
    Glob,
    Regexp,
    Ne,
    IsNot,
    IsNotNull,
    IsNull,
    Is,
    Limit,
    Offset,
    /// An overloaded function (codes from 150) or a code this crate does
    /// not know.
    Function(u8),
}

impl ConstraintOp {
    pub const fn from_sqlite(op: u8) -> Self {
        match op {
            2 => Self::Eq,
            4 => Self::Gt,
            8 => Self::Le,
            16 => Self::Lt,
            32 => Self::Ge,
            64 => Self::Match,
            65 => Self::Like,
            66 => Self::Glob,
            67 => Self::Regexp,
            68 => Self::Ne,
            69 => Self::IsNot,
            70 => Self::IsNotNull,
            71 => Self::IsNull,
            72 => Self::Is,
            73 => Self::Limit,
            74 => Self::Offset,
            other => Self::Function(other),
        }
    }

    /// `LIMIT` and `OFFSET` arrive as constraints but constrain no column.
    pub const fn is_pseudo(self) -> bool {
        matches!(self, Self::Limit | Self::Offset)
    }
}

#[derive(Debug, Clone)]
pub struct IndexConstraint {
    /// Declared column position; `-1` is the rowid.
    pub column: i32,
    pub op: ConstraintOp,
    /// False when the right-hand side depends on a table the planner has
    /// not placed yet.
    pub usable: bool,
}

/// The table's answer for one constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintUsage {
    /// Position of the constraint's value in `filter`'s arguments, from 1.
    /// Zero leaves the constraint to the engine.
    pub argv_index: i32,
    /// Skip the engine's own re-check of the constraint.
    pub omit: bool,
}

/// One round of planning.
///
/// `constraints` is input; every other field is the table's output and
/// `constraint_usage` runs parallel to `constraints`.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub constraints: Vec<IndexConstraint>,
    pub constraint_usage: Vec<ConstraintUsage>,
    /// Handed back to `filter` unchanged.
    pub idx_num: i32,
    pub estimated_cost: f64,
    pub estimated_rows: i64,
}

impl IndexInfo {
    #[must_use]
    pub fn new(constraints: Vec<IndexConstraint>) -> Self {
        let constraint_usage = constraints.iter().map(|_| ConstraintUsage::default()).collect();
        Self {
            constraints,
            constraint_usage,
            idx_num: 0,
            estimated_cost: f64::MAX,
            estimated_rows: i64::MAX,
        }
    }
}

/// Where [`VirtualTableCursor::column`] leaves its value. Nothing written
/// reads back as NULL.
#[derive(Debug, Default)]
pub struct ColumnSink(Option<SqliteValue>);

impl ColumnSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, value: SqliteValue) {
        self.0 = Some(value);
    }

    pub fn take(&mut self) -> Option<SqliteValue> {
        self.0.take()
    }
}

/// A table instance as the planner sees it.
pub trait VirtualTable: Send + Sync {
    type Cursor: VirtualTableCursor;

    /// Fill in the output half of `info`. An error aborts planning.
    fn best_index(&self, info: &mut IndexInfo) -> Result<()>;

    fn open(&self) -> Result<Self::Cursor>;

    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One scan. `filter` may be called again to restart it with new
/// arguments.
pub trait VirtualTableCursor: Send {
    /// `args` holds the values of the constraints `best_index` gave an
    /// `argv_index`, in that order.
    fn filter(&mut self, idx_num: i32, idx_str: Option<&str>, args: &[SqliteValue])
    -> Result<()>;

    fn next(&mut self) -> Result<()>;

    fn eof(&self) -> bool;

    fn column(&self, sink: &mut ColumnSink, col: i32) -> Result<()>;

    fn rowid(&self) -> Result<i64>;
}
