//! Sessions: one SQLite connection plus the flags its tables share.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use gentab_error::{GentabError, ResourceState, Result};
use gentab_types::{HostValue, IntegerMode};
use gentab_vtab::{GeneratorModule, SessionState, TableFactory};
use parking_lot::{Mutex, ReentrantMutex};
use rusqlite::Connection;
use rusqlite::config::DbConfig;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error_bridge::{engine_error, raise_engine_error};
use crate::module::create_module;
use crate::registry;
use crate::statement::{Row, RunResult, Statement};

/// The engine handle. `None` once released.
///
/// Reentrant so a closure running inside [`Statement::iterate`] can issue
/// further reads on the same thread.
pub(crate) type SharedConnection = Arc<ConnectionCell>;

pub(crate) type ConnectionCell = ReentrantMutex<RefCell<Option<Connection>>>;

/// An open database with generator-backed virtual tables.
pub struct Session {
    id: u64,
    path: String,
    readonly: bool,
    state: Arc<SessionState>,
    connection: SharedConnection,
    /// Registered module names, ASCII-lowercased as SQLite compares them.
    modules: Mutex<HashSet<String>>,
}

impl Session {
    /// Open a database. `":memory:"` opens a private in-memory database.
    pub fn open(path: impl Into<String>, config: &SessionConfig) -> Result<Self> {
        let path = path.into();
        let conn =
            Connection::open_with_flags(&path, config.open_flags()).map_err(|e| {
                warn!(target: "gentab.session", path = %path, error = %e, "open failed");
                engine_error(&e)
            })?;
        conn.busy_timeout(config.timeout())
            .map_err(|e| engine_error(&e))?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DEFENSIVE, !config.unsafe_mode)
            .map_err(|e| engine_error(&e))?;

        let state = Arc::new(SessionState::new(config.integer_mode, config.unsafe_mode));
        let connection = Arc::new(ReentrantMutex::new(RefCell::new(Some(conn))));
        let id = registry::register(&path, &state, &connection);
        info!(
            target: "gentab.session",
            id,
            path = %path,
            readonly = config.readonly,
            integer_mode = ?config.integer_mode,
            "session opened"
        );
        Ok(Self {
            id,
            path,
            readonly: config.readonly,
            state,
            connection,
            modules: Mutex::default(),
        })
    }

    /// Open a private in-memory database with default options.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:", &SessionConfig::default())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Number of live row iterators (statement iterations and table scans).
    pub fn iterator_count(&self) -> usize {
        self.state.iterator_count()
    }

    /// Whether a transaction is open. False once closed.
    pub fn in_transaction(&self) -> bool {
        self.with_connection(|conn| Ok(!conn.is_autocommit()))
            .unwrap_or(false)
    }

    pub fn integer_mode(&self) -> IntegerMode {
        self.state.integer_mode()
    }

    /// Change the integer mode used by statements prepared and tables
    /// connected from now on.
    pub fn set_default_integer_mode(&self, mode: IntegerMode) {
        self.state.set_integer_mode(mode);
    }

    pub fn unsafe_mode(&self) -> bool {
        self.state.unsafe_mode()
    }

    /// Allow writes while iterators are open and turn off SQLite's
    /// defensive mode.
    pub fn set_unsafe_mode(&self, enabled: bool) -> Result<()> {
        self.state.require_open()?;
        self.with_connection(|conn| {
            conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DEFENSIVE, !enabled)
                .map(|_| ())
        })?;
        self.state.set_unsafe_mode(enabled);
        debug!(target: "gentab.session", id = self.id, enabled, "unsafe mode changed");
        Ok(())
    }

    /// Run one or more SQL statements, discarding any rows.
    pub fn exec(&self, sql: &str) -> Result<()> {
        self.state.require_open()?;
        self.state.require_not_busy()?;
        self.state.require_no_iterators_unless_unsafe()?;
        let _busy = self.state.mark_busy()?;
        self.with_connection(|conn| conn.execute_batch(sql))
    }

    /// Compile a single statement.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        self.state.require_open()?;
        self.state.require_not_busy()?;
        if sql.trim().is_empty() {
            return Err(GentabError::invalid_argument(
                "The supplied SQL string contains no statements",
            ));
        }
        let _busy = self.state.mark_busy()?;
        let (reader, readonly) = self.with_connection(|conn| {
            let stmt = conn.prepare_cached(sql)?;
            Ok((stmt.column_count() > 0, stmt.readonly()))
        })?;
        Ok(Statement::new(
            self,
            sql.to_owned(),
            reader,
            readonly,
            self.state.integer_mode(),
        ))
    }

    /// Prepare `sql` and return every row.
    pub fn query(&self, sql: &str, params: &[HostValue]) -> Result<Vec<Row>> {
        self.prepare(sql)?.all(params)
    }

    /// Prepare `sql` and run it for its side effects.
    pub fn run(&self, sql: &str, params: &[HostValue]) -> Result<RunResult> {
        self.prepare(sql)?.run(params)
    }

    /// Expose a host table factory as virtual-table module `name`.
    ///
    /// With `eponymous`, the table is usable immediately under `name`
    /// (including as a table-valued function). Otherwise it must be
    /// instantiated with `CREATE VIRTUAL TABLE t USING name(...)`.
    ///
    /// Each name can be registered once per session.
    pub fn register_table(
        &self,
        name: &str,
        factory: impl TableFactory + 'static,
        eponymous: bool,
    ) -> Result<()> {
        self.state.require_open()?;
        self.state.require_not_busy()?;
        self.state.require_no_iterators()?;
        let key = name.to_ascii_lowercase();
        if self.modules.lock().contains(&key) {
            return Err(GentabError::invalid_argument(format!(
                "A virtual table module named \"{name}\" is already registered"
            )));
        }
        let _busy = self.state.mark_busy()?;
        let module = GeneratorModule::new(name, Arc::new(factory), Arc::clone(&self.state));
        self.with_connection(|conn| create_module(conn, module, eponymous))?;
        self.modules.lock().insert(key);
        info!(target: "gentab.session", id = self.id, table = name, eponymous, "virtual table registered");
        Ok(())
    }

    /// Close the session. Closing an already-closed session does nothing.
    ///
    /// Fails while an operation is running or iterators are open.
    pub fn close(&self) -> Result<()> {
        if !self.state.is_open() {
            return Ok(());
        }
        self.state.require_not_busy()?;
        self.state.require_no_iterators()?;
        release_connection(&self.connection)?;
        self.state.mark_closed();
        registry::unregister(self.id);
        info!(target: "gentab.session", id = self.id, path = %self.path, "session closed");
        Ok(())
    }

    pub(crate) fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub(crate) fn connection(&self) -> &SharedConnection {
        &self.connection
    }

    /// Run `f` against the open connection, routing failures through the
    /// error bridge.
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let guard = self.connection.lock();
        let slot = guard
            .try_borrow()
            .map_err(|_| GentabError::internal("connection is being released"))?;
        let conn = slot.as_ref().ok_or(ResourceState::NotOpen)?;
        self.state.discard_stale_error();
        f(conn).map_err(|e| raise_engine_error(&self.state, e))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("readonly", &self.readonly)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        registry::unregister(self.id);
        self.state.mark_closed();
        if let Err(err) = release_connection(&self.connection) {
            warn!(target: "gentab.session", id = self.id, error = %err, "failed to release connection");
        }
    }
}

/// Finalize cached statements and close the engine handle.
///
/// Returns `Ok(false)` if the handle was already released. On failure the
/// handle is put back.
pub(crate) fn release_connection(connection: &SharedConnection) -> Result<bool> {
    let guard = connection.lock();
    let taken = guard
        .try_borrow_mut()
        .map_err(|_| GentabError::internal("connection is in use"))?
        .take();
    let Some(conn) = taken else {
        return Ok(false);
    };
    conn.flush_prepared_statement_cache();
    match conn.close() {
        Ok(()) => Ok(true),
        Err((conn, err)) => {
            let err = engine_error(&err);
            *guard.borrow_mut() = Some(conn);
            Err(err)
        }
    }
}
