//! Generator-backed virtual tables.
//!
//! [`GeneratorModule`] is registered once per table name. Each engine
//! connect produces a [`GeneratorTable`], and each scan a
//! [`GeneratorCursor`] that streams rows from the host generator.

use std::fmt;
use std::sync::Arc;

use gentab_error::{GentabError, MarshalError, Result};
use gentab_types::{HostValue, IntegerMode, SqliteValue, to_host, to_native};
use tracing::{debug, info};

use crate::contract::{ConnectArgs, RowGenerator, RowIterator, Step, TableFactory};
use crate::plan::{MAX_PARAMETERS, plan, unpack_arguments};
use crate::protocol::{ColumnSink, IndexInfo, VirtualTable, VirtualTableCursor};
use crate::state::{IterationGuard, SessionState};

/// A registered table name and the factory behind it.
pub struct GeneratorModule {
    name: Arc<str>,
    factory: Arc<dyn TableFactory>,
    state: Arc<SessionState>,
}

/// The outcome of a successful connect.
#[derive(Debug)]
pub struct Connected {
    pub table_name: String,
    pub schema_sql: String,
    pub direct_only: bool,
    pub table: GeneratorTable,
}

impl GeneratorModule {
    pub fn new(
        name: impl Into<Arc<str>>,
        factory: Arc<dyn TableFactory>,
        state: Arc<SessionState>,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Run the factory and build a table instance.
    ///
    /// `args` are the engine's raw connect arguments. A factory failure is
    /// returned as [`GentabError::HostCallback`] and no table is created.
    pub fn connect(&self, args: &[String]) -> Result<Connected> {
        let table_name = ConnectArgs::parse(args)
            .map_or_else(|| self.name.to_string(), |a| a.table.to_owned());
        debug!(target: "gentab.vtab", module = %self.name, table = %table_name, "connecting");

        let definition = self.factory.define(args)?;
        if definition.parameter_names.len() > MAX_PARAMETERS {
            return Err(GentabError::invalid_definition(
                &*self.name,
                format!(
                    "declares {} parameters but at most {MAX_PARAMETERS} are supported",
                    definition.parameter_names.len()
                ),
            ));
        }
        let integer_mode =
            IntegerMode::resolve(definition.integer_mode, self.state.integer_mode());
        info!(
            target: "gentab.vtab",
            module = %self.name,
            table = %table_name,
            parameters = definition.parameter_names.len(),
            ?integer_mode,
            direct_only = definition.direct_only,
            "virtual table connected"
        );

        Ok(Connected {
            table_name,
            schema_sql: definition.schema_sql,
            direct_only: definition.direct_only,
            table: GeneratorTable {
                shared: Arc::new(TableShared {
                    module: Arc::clone(&self.name),
                    generator: definition.generator,
                    parameter_names: definition.parameter_names,
                    integer_mode,
                    state: Arc::clone(&self.state),
                }),
            },
        })
    }
}

impl fmt::Debug for GeneratorModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorModule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct TableShared {
    module: Arc<str>,
    generator: Arc<dyn RowGenerator>,
    parameter_names: Vec<String>,
    integer_mode: IntegerMode,
    state: Arc<SessionState>,
}

/// A connected table instance.
pub struct GeneratorTable {
    shared: Arc<TableShared>,
}

impl GeneratorTable {
    pub fn module_name(&self) -> &str {
        &self.shared.module
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.shared.parameter_names
    }

    pub fn integer_mode(&self) -> IntegerMode {
        self.shared.integer_mode
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.shared.state
    }
}

impl fmt::Debug for GeneratorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorTable")
            .field("module", &self.shared.module)
            .field("parameter_names", &self.shared.parameter_names)
            .field("integer_mode", &self.shared.integer_mode)
            .finish_non_exhaustive()
    }
}

impl VirtualTable for GeneratorTable {
    type Cursor = GeneratorCursor;

    fn best_index(&self, info: &mut IndexInfo) -> Result<()> {
        let plan = plan(&self.shared.parameter_names, &info.constraints)?;
        plan.apply(info);
        Ok(())
    }

    fn open(&self) -> Result<GeneratorCursor> {
        Ok(GeneratorCursor {
            _iteration: self.shared.state.enter_iteration(),
            shared: Arc::clone(&self.shared),
            iterator: None,
            row: Vec::new(),
            done: true,
            produced: 0,
        })
    }
}

/// One scan over a generator table.
pub struct GeneratorCursor {
    shared: Arc<TableShared>,
    iterator: Option<Box<dyn RowIterator>>,
    row: Vec<HostValue>,
    done: bool,
    produced: i64,
    _iteration: IterationGuard,
}

impl GeneratorCursor {
    pub fn state(&self) -> &Arc<SessionState> {
        &self.shared.state
    }

    fn column_error(&self, source: MarshalError) -> GentabError {
        GentabError::ColumnValue {
            module: self.shared.module.to_string(),
            source,
        }
    }
}

impl fmt::Debug for GeneratorCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorCursor")
            .field("module", &self.shared.module)
            .field("done", &self.done)
            .field("produced", &self.produced)
            .finish_non_exhaustive()
    }
}

impl VirtualTableCursor for GeneratorCursor {
    #[allow(clippy::cast_sign_loss)]
    fn filter(
        &mut self,
        idx_num: i32,
        _idx_str: Option<&str>,
        args: &[SqliteValue],
    ) -> Result<()> {
        self.iterator = None;
        self.row.clear();
        self.done = false;
        self.produced = 0;

        let shared = Arc::clone(&self.shared);
        let bound = unpack_arguments(idx_num as u32, shared.parameter_names.len(), args)?;
        if bound.iter().flatten().any(|value| value.is_null()) {
            debug!(target: "gentab.vtab", module = %shared.module, "NULL parameter, empty scan");
            self.done = true;
            return Ok(());
        }

        let params: Vec<HostValue> = bound
            .into_iter()
            .map(|value| value.map_or(HostValue::Missing, |v| to_host(v, shared.integer_mode)))
            .collect();
        debug!(target: "gentab.vtab", module = %shared.module, args = params.len(), "invoking generator");
        match shared.generator.generate(&params) {
            Ok(iterator) => self.iterator = Some(iterator),
            Err(err) => {
                self.done = true;
                return Err(err.into());
            }
        }
        self.next()
    }

    fn next(&mut self) -> Result<()> {
        let Some(iterator) = self.iterator.as_mut() else {
            self.done = true;
            return Ok(());
        };
        match iterator.advance() {
            Ok(Step::Row(row)) => {
                self.row = row;
                self.produced += 1;
                Ok(())
            }
            Ok(Step::Done) => {
                debug!(
                    target: "gentab.vtab",
                    module = %self.shared.module,
                    rows = self.produced,
                    "generator exhausted"
                );
                self.finish();
                Ok(())
            }
            Err(err) => {
                self.finish();
                Err(err.into())
            }
        }
    }

    fn eof(&self) -> bool {
        self.done
    }

    fn column(&self, sink: &mut ColumnSink, col: i32) -> Result<()> {
        let index = usize::try_from(col)
            .map_err(|_| GentabError::internal(format!("negative column index {col}")))?;
        let value = self
            .row
            .get(index)
            .ok_or_else(|| self.column_error(MarshalError::MissingColumn { index }))?;
        let native = to_native(value).map_err(|source| self.column_error(source))?;
        sink.put(native);
        Ok(())
    }

    fn rowid(&self) -> Result<i64> {
        Ok(self.produced - 1)
    }
}

impl GeneratorCursor {
    fn finish(&mut self) {
        self.done = true;
        self.iterator = None;
        self.row.clear();
    }
}
