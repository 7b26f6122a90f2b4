//! Prepared statements and result rows.

use std::ops::ControlFlow;
use std::sync::Arc;

use gentab_error::{GentabError, ResourceState, Result};
use gentab_types::{HostValue, IntegerMode, SqliteValue, to_host};
use rusqlite::params_from_iter;
use tracing::trace;

use crate::convert::{bind_values, from_value_ref};
use crate::error_bridge::raise_engine_error;
use crate::session::Session;

/// Outcome of [`Statement::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// Rows modified by the statement.
    pub changes: usize,
    pub last_insert_rowid: HostValue,
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<HostValue>,
}

impl Row {
    pub fn get(&self, index: usize) -> Option<&HostValue> {
        self.values.get(index)
    }

    /// Value of the first column called `name`.
    pub fn get_named(&self, name: &str) -> Option<&HostValue> {
        let index = self.columns.iter().position(|c| c == name)?;
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[HostValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<HostValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A compiled SQL statement bound to its session.
///
/// The engine-side statement lives in the connection's statement cache;
/// each call checks it out for the duration of one execution.
#[derive(Debug)]
pub struct Statement<'s> {
    session: &'s Session,
    sql: String,
    reader: bool,
    readonly: bool,
    integer_mode: IntegerMode,
}

impl<'s> Statement<'s> {
    pub(crate) fn new(
        session: &'s Session,
        sql: String,
        reader: bool,
        readonly: bool,
        integer_mode: IntegerMode,
    ) -> Self {
        Self {
            session,
            sql,
            reader,
            readonly,
            integer_mode,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Whether the statement returns rows.
    pub fn is_reader(&self) -> bool {
        self.reader
    }

    /// Whether the statement leaves the database unchanged.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn integer_mode(&self) -> IntegerMode {
        self.integer_mode
    }

    /// Override the session's integer mode for this statement.
    #[must_use]
    pub fn with_integer_mode(mut self, mode: IntegerMode) -> Self {
        self.integer_mode = mode;
        self
    }

    /// Execute a statement that returns no rows.
    pub fn run(&self, params: &[HostValue]) -> Result<RunResult> {
        if self.reader {
            return Err(GentabError::invalid_argument(
                "This statement returns data. Use get(), all(), or iterate() instead",
            ));
        }
        let state = self.session.state();
        state.require_open()?;
        state.require_not_busy()?;
        if !self.readonly {
            state.require_no_iterators_unless_unsafe()?;
        }
        let values = bind_values(params)?;
        let _busy = state.mark_busy()?;
        let mode = self.integer_mode;
        self.session.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(&self.sql)?;
            let changes = stmt.execute(params_from_iter(values.iter()))?;
            let rowid = SqliteValue::Integer(conn.last_insert_rowid());
            Ok(RunResult {
                changes,
                last_insert_rowid: to_host(&rowid, mode),
            })
        })
    }

    /// First row, or `None` if there are no rows.
    pub fn get(&self, params: &[HostValue]) -> Result<Option<Row>> {
        let values = self.begin_read(params)?;
        let _busy = self.session.state().mark_busy()?;
        let mode = self.integer_mode;
        self.session.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(&self.sql)?;
            let columns = column_names(&stmt);
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            match rows.next()? {
                Some(row) => read_row(row, &columns, mode).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Every row.
    pub fn all(&self, params: &[HostValue]) -> Result<Vec<Row>> {
        let values = self.begin_read(params)?;
        let _busy = self.session.state().mark_busy()?;
        let mode = self.integer_mode;
        self.session.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(&self.sql)?;
            let columns = column_names(&stmt);
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_row(row, &columns, mode)?);
            }
            Ok(out)
        })
    }

    /// Hand rows to `f` one at a time until the rows run out or `f` breaks.
    ///
    /// The session is busy only while a row is being produced, so `f` may
    /// run further reads on the same session. Closing the session or
    /// registering tables from `f` fails until the iteration ends.
    pub fn iterate<F>(&self, params: &[HostValue], mut f: F) -> Result<()>
    where
        F: FnMut(Row) -> Result<ControlFlow<()>>,
    {
        let values = self.begin_read(params)?;
        let state = self.session.state();
        let _iteration = state.enter_iteration();
        let raise = |err: rusqlite::Error| raise_engine_error(state, err);

        let guard = self.session.connection().lock();
        let slot = guard
            .try_borrow()
            .map_err(|_| GentabError::internal("connection is being released"))?;
        let conn = slot.as_ref().ok_or(ResourceState::NotOpen)?;
        state.discard_stale_error();

        let mut stmt = {
            let _busy = state.mark_busy()?;
            conn.prepare_cached(&self.sql).map_err(raise)?
        };
        let columns = column_names(&stmt);
        let mut rows = {
            let _busy = state.mark_busy()?;
            stmt.query(params_from_iter(values.iter())).map_err(raise)?
        };
        let mut delivered = 0_usize;
        loop {
            // close_all_sessions may have run from inside `f`.
            state.require_open()?;
            let row = {
                let _busy = state.mark_busy()?;
                match rows.next().map_err(raise)? {
                    Some(row) => read_row(row, &columns, self.integer_mode).map_err(raise)?,
                    None => break,
                }
            };
            delivered += 1;
            if f(row)?.is_break() {
                break;
            }
        }
        trace!(target: "gentab.session", sql = %self.sql, delivered, "iteration finished");
        Ok(())
    }

    fn begin_read(&self, params: &[HostValue]) -> Result<Vec<rusqlite::types::Value>> {
        if !self.reader {
            return Err(GentabError::invalid_argument(
                "This statement does not return data. Use run() instead",
            ));
        }
        let state = self.session.state();
        state.require_open()?;
        state.require_not_busy()?;
        bind_values(params)
    }
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Arc<[String]> {
    stmt.column_names()
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>()
        .into()
}

fn read_row(
    row: &rusqlite::Row<'_>,
    columns: &Arc<[String]>,
    mode: IntegerMode,
) -> rusqlite::Result<Row> {
    let mut values = Vec::with_capacity(columns.len());
    for index in 0..columns.len() {
        let value = from_value_ref(row.get_ref(index)?);
        values.push(to_host(&value, mode));
    }
    Ok(Row {
        columns: Arc::clone(columns),
        values,
    })
}
