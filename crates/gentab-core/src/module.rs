//! rusqlite virtual-table glue.
//!
//! rusqlite owns the engine-facing structs; each one wraps a bridge type
//! from `gentab-vtab` and forwards to it. Errors that must reach the caller
//! intact are parked on the session before the engine sees a generic
//! failure.

use std::marker::PhantomData;
use std::os::raw::c_int;
use std::sync::Arc;

use gentab_error::GentabError;
use gentab_vtab::{
    ColumnSink, ConstraintOp, GeneratorCursor, GeneratorModule, GeneratorTable,
    IndexConstraint, IndexInfo, SessionState, VirtualTable, VirtualTableCursor,
};
use rusqlite::types::Value;
use rusqlite::vtab::{
    self, Context, CreateVTab, Filters, VTab, VTabConfig, VTabConnection, VTabCursor, VTabKind,
    sqlite3_vtab, sqlite3_vtab_cursor,
};
use rusqlite::{Connection, ffi};
use tracing::{debug, warn};

use crate::convert::{from_value_ref, to_engine_value};

/// Register `module` with `conn`.
///
/// Eponymous tables exist as soon as the module is registered and cannot be
/// created with `CREATE VIRTUAL TABLE`; the others must be.
pub(crate) fn create_module(
    conn: &Connection,
    module: GeneratorModule,
    eponymous: bool,
) -> rusqlite::Result<()> {
    let name = module.name().to_owned();
    if eponymous {
        conn.create_module(
            name.as_str(),
            vtab::eponymous_only_module::<GeneratorVTab>(),
            Some(module),
        )
    } else {
        conn.create_module(
            name.as_str(),
            vtab::read_only_module::<GeneratorVTab>(),
            Some(module),
        )
    }
}

/// Hand a bridge error to the engine.
///
/// An unusable plan is reported as `SQLITE_CONSTRAINT` so the planner can try
/// another join order; it is never parked, only noted. Everything else is
/// parked on the session and the engine gets the message only.
/// Raw `SQLITE_INDEX_CONSTRAINT_*` code; inverse of rusqlite's `From<u8>`.
fn op_code(op: vtab::IndexConstraintOp) -> u8 {
    use vtab::IndexConstraintOp as Op;
    match op {
        Op::SQLITE_INDEX_CONSTRAINT_EQ => 2,
        Op::SQLITE_INDEX_CONSTRAINT_GT => 4,
        Op::SQLITE_INDEX_CONSTRAINT_LE => 8,
        Op::SQLITE_INDEX_CONSTRAINT_LT => 16,
        Op::SQLITE_INDEX_CONSTRAINT_GE => 32,
        Op::SQLITE_INDEX_CONSTRAINT_MATCH => 64,
        Op::SQLITE_INDEX_CONSTRAINT_LIKE => 65,
        Op::SQLITE_INDEX_CONSTRAINT_GLOB => 66,
        Op::SQLITE_INDEX_CONSTRAINT_REGEXP => 67,
        Op::SQLITE_INDEX_CONSTRAINT_NE => 68,
        Op::SQLITE_INDEX_CONSTRAINT_ISNOT => 69,
        Op::SQLITE_INDEX_CONSTRAINT_ISNOTNULL => 70,
        Op::SQLITE_INDEX_CONSTRAINT_ISNULL => 71,
        Op::SQLITE_INDEX_CONSTRAINT_IS => 72,
        Op::SQLITE_INDEX_CONSTRAINT_LIMIT => 73,
        Op::SQLITE_INDEX_CONSTRAINT_OFFSET => 74,
        Op::SQLITE_INDEX_CONSTRAINT_FUNCTION(v) => v,
    }
}

fn defer(state: &SessionState, err: GentabError) -> rusqlite::Error {
    if matches!(err, GentabError::UnusablePlanConstraint) {
        state.note_plan_rejected();
        return rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_CONSTRAINT), None);
    }
    let message = err.to_string();
    state.defer_error(err);
    rusqlite::Error::ModuleError(message)
}

/// Check a declared schema against a scratch database so a bad one is
/// reported with the table's name.
///
/// The schema is first run as a plain `CREATE TABLE` for a precise syntax
/// message, then declared through a throwaway virtual table, since
/// `sqlite3_declare_vtab` rejects more than `CREATE TABLE` does.
fn validate_schema(table: &str, schema_sql: &str) -> Result<(), GentabError> {
    let declare_error = |detail: String| GentabError::DeclareSchema {
        table: table.to_owned(),
        detail,
    };
    let is_create_table = schema_sql
        .trim_start()
        .get(..12)
        .is_some_and(|head| head.eq_ignore_ascii_case("CREATE TABLE"));
    if !is_create_table {
        return Err(declare_error("schema must be a CREATE TABLE statement".to_owned()));
    }
    let scratch = Connection::open_in_memory().map_err(|e| declare_error(e.to_string()))?;
    scratch
        .execute(schema_sql, [])
        .map_err(|e| declare_error(e.to_string()))?;
    scratch
        .create_module(
            SCHEMA_CHECK_MODULE,
            vtab::eponymous_only_module::<SchemaCheckVTab>(),
            Some(schema_sql.to_owned()),
        )
        .map_err(|e| declare_error(e.to_string()))?;
    scratch
        .prepare(&format!("SELECT * FROM {SCHEMA_CHECK_MODULE}"))
        .map(|_| ())
        .map_err(|e| {
            debug!(target: "gentab.vtab", table, error = %e, "virtual table schema rejected");
            declare_error(format!("not a valid virtual table schema: {e}"))
        })
}

const SCHEMA_CHECK_MODULE: &str = "gentab_schema_check";

/// Declares its schema and nothing else. Never scanned.
#[repr(C)]
struct SchemaCheckVTab {
    base: sqlite3_vtab,
}

unsafe impl<'vtab> VTab<'vtab> for SchemaCheckVTab {
    type Aux = String;
    type Cursor = EmptyCursor;

    fn connect(
        _db: &mut VTabConnection,
        aux: Option<&String>,
        _args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        let schema_sql = aux
            .cloned()
            .ok_or_else(|| rusqlite::Error::ModuleError("no schema to check".to_owned()))?;
        Ok((
            schema_sql,
            Self {
                base: sqlite3_vtab::default(),
            },
        ))
    }

    fn best_index(&self, info: &mut vtab::IndexInfo) -> rusqlite::Result<()> {
        info.set_estimated_cost(1.0);
        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<EmptyCursor> {
        Ok(EmptyCursor {
            base: sqlite3_vtab_cursor::default(),
        })
    }
}

#[repr(C)]
struct EmptyCursor {
    base: sqlite3_vtab_cursor,
}

unsafe impl VTabCursor for EmptyCursor {
    fn filter(&mut self, _: c_int, _: Option<&str>, _: &Filters<'_>) -> rusqlite::Result<()> {
        Ok(())
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        Ok(())
    }

    fn eof(&self) -> bool {
        true
    }

    fn column(&self, ctx: &mut Context, _: c_int) -> rusqlite::Result<()> {
        ctx.set_result(&Value::Null)
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        Ok(0)
    }
}

#[repr(C)]
pub(crate) struct GeneratorVTab {
    /// Base class. Must be first.
    base: sqlite3_vtab,
    table: GeneratorTable,
}

unsafe impl<'vtab> VTab<'vtab> for GeneratorVTab {
    type Aux = GeneratorModule;
    type Cursor = GeneratorVTabCursor<'vtab>;

    fn connect(
        db: &mut VTabConnection,
        aux: Option<&GeneratorModule>,
        args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        let module = aux.ok_or_else(|| {
            rusqlite::Error::ModuleError("virtual table module has no factory".to_owned())
        })?;
        let state = module.state();
        let args: Vec<String> = args
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();

        let connected = module.connect(&args).map_err(|e| defer(state, e))?;
        validate_schema(&connected.table_name, &connected.schema_sql)
            .map_err(|e| defer(state, e))?;
        if connected.direct_only {
            db.config(VTabConfig::DirectOnly).map_err(|e| {
                debug!(target: "gentab.vtab", error = %e, "SQLITE_VTAB_DIRECTONLY rejected");
                defer(
                    state,
                    GentabError::ConfigureTable {
                        table: connected.table_name.clone(),
                    },
                )
            })?;
        }
        Ok((
            connected.schema_sql,
            Self {
                base: sqlite3_vtab::default(),
                table: connected.table,
            },
        ))
    }

    fn best_index(&self, info: &mut vtab::IndexInfo) -> rusqlite::Result<()> {
        let constraints = info
            .constraints()
            .map(|c| IndexConstraint {
                column: c.column(),
                op: ConstraintOp::from_sqlite(op_code(c.operator())),
                usable: c.is_usable(),
            })
            .collect();
        let mut plan = IndexInfo::new(constraints);
        self.table
            .best_index(&mut plan)
            .map_err(|e| defer(self.table.state(), e))?;

        for (i, usage) in plan.constraint_usage.iter().enumerate() {
            if usage.argv_index > 0 {
                let mut engine_usage = info.constraint_usage(i);
                engine_usage.set_argv_index(usage.argv_index);
                engine_usage.set_omit(usage.omit);
            }
        }
        info.set_idx_num(plan.idx_num);
        info.set_estimated_cost(plan.estimated_cost);
        info.set_estimated_rows(plan.estimated_rows);
        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<GeneratorVTabCursor<'vtab>> {
        let cursor = self
            .table
            .open()
            .map_err(|e| defer(self.table.state(), e))?;
        Ok(GeneratorVTabCursor {
            base: sqlite3_vtab_cursor::default(),
            cursor,
            phantom: PhantomData,
        })
    }
}

impl CreateVTab<'_> for GeneratorVTab {
    const KIND: VTabKind = VTabKind::Default;
}

impl Drop for GeneratorVTab {
    fn drop(&mut self) {
        if let Err(err) = self.table.disconnect() {
            warn!(
                target: "gentab.vtab",
                module = self.table.module_name(),
                error = %err,
                "disconnect failed"
            );
        }
    }
}

#[repr(C)]
pub(crate) struct GeneratorVTabCursor<'vtab> {
    /// Base class. Must be first.
    base: sqlite3_vtab_cursor,
    cursor: GeneratorCursor,
    phantom: PhantomData<&'vtab GeneratorVTab>,
}

unsafe impl VTabCursor for GeneratorVTabCursor<'_> {
    fn filter(
        &mut self,
        idx_num: c_int,
        idx_str: Option<&str>,
        args: &Filters<'_>,
    ) -> rusqlite::Result<()> {
        let values: Vec<_> = args.iter().map(from_value_ref).collect();
        let state = Arc::clone(self.cursor.state());
        self.cursor
            .filter(idx_num, idx_str, &values)
            .map_err(|e| defer(&state, e))
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        let state = Arc::clone(self.cursor.state());
        self.cursor.next().map_err(|e| defer(&state, e))
    }

    fn eof(&self) -> bool {
        self.cursor.eof()
    }

    fn column(&self, ctx: &mut Context, i: c_int) -> rusqlite::Result<()> {
        let mut out = ColumnSink::new();
        self.cursor
            .column(&mut out, i)
            .map_err(|e| defer(self.cursor.state(), e))?;
        let value = out.take().map_or(Value::Null, to_engine_value);
        ctx.set_result(&value)
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        self.cursor.rowid().map_err(|e| defer(self.cursor.state(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_validation_names_table() {
        let err = validate_schema("events", "CREATE TABLE x(a,").unwrap_err();
        assert!(matches!(
            err,
            GentabError::DeclareSchema { ref table, .. } if table == "events"
        ));
        assert!(err.to_string().starts_with("failed to declare virtual table \"events\""));
    }

    #[test]
    fn schema_must_create_a_table() {
        assert!(validate_schema("t", "SELECT 1").is_err());
        validate_schema("t", "  create table x(\"p\" HIDDEN, \"v\");").unwrap();
    }

    #[test]
    fn schema_must_be_declarable_as_virtual_table() {
        let err = validate_schema("derived", "CREATE TABLE x(a, b AS (a + 1))").unwrap_err();
        assert!(matches!(
            err,
            GentabError::DeclareSchema { ref table, .. } if table == "derived"
        ));
        validate_schema("plain", "CREATE TABLE x(a, b)").unwrap();
    }

    #[test]
    fn unusable_plan_is_not_parked() {
        let state = SessionState::default();
        let err = defer(&state, GentabError::UnusablePlanConstraint);
        assert!(matches!(
            err,
            rusqlite::Error::SqliteFailure(ref failure, None)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation
        ));
        assert!(!state.has_pending_error());
        assert!(state.take_plan_rejected());
    }

    #[test]
    fn other_errors_are_parked() {
        let state = SessionState::default();
        let err = defer(
            &state,
            GentabError::PlanningViolation {
                parameter: "id".to_owned(),
            },
        );
        assert!(matches!(err, rusqlite::Error::ModuleError(_)));
        assert!(matches!(
            state.take_pending_error(),
            Some(GentabError::PlanningViolation { .. })
        ));
    }
}
