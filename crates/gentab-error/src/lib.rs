//! Error types shared by every gentab crate.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Primary error type for gentab operations.
///
/// Modeled after SQLite's result codes. Errors raised by host callbacks are
/// carried verbatim in [`GentabError::HostCallback`] so callers can recover
/// the original error value.
#[derive(Error, Debug)]
pub enum GentabError {
    // === Engine Errors ===
    /// The embedded engine reported failure and no host error was pending.
    #[error("{0}")]
    Engine(EngineError),

    // === Host Errors ===
    /// A factory, generator or iterator callback failed.
    #[error("{0}")]
    HostCallback(HostError),

    // === Planning Errors ===
    /// A parameter column was constrained by something other than `=`.
    #[error("virtual table parameter \"{parameter}\" can only be constrained by the '=' operator")]
    PlanningViolation { parameter: String },

    /// The planner offered an equality constraint on a parameter column that
    /// it cannot evaluate at this point in the plan.
    #[error("virtual table parameter constraint is not usable in this plan")]
    UnusablePlanConstraint,

    // === Registration Errors ===
    /// The schema returned by a table factory could not be declared.
    #[error("failed to declare virtual table \"{table}\": {detail}")]
    DeclareSchema { table: String, detail: String },

    /// The direct-only flag could not be applied to a table.
    #[error("failed to configure virtual table \"{table}\"")]
    ConfigureTable { table: String },

    /// A table definition is structurally invalid.
    #[error("virtual table module \"{module}\" {reason}")]
    InvalidDefinition { module: String, reason: String },

    // === Value Errors ===
    /// A value produced by a table's iterator could not be handed to the engine.
    #[error("Virtual table module \"{module}\" yielded {source}")]
    ColumnValue {
        module: String,
        #[source]
        source: MarshalError,
    },

    /// A host value could not be bound as a statement parameter.
    #[error("cannot bind parameter {index}: {source}")]
    BindValue {
        index: usize,
        #[source]
        source: MarshalError,
    },

    // === Session Errors ===
    /// The session is in a state that forbids the operation.
    #[error("{0}")]
    ResourceState(ResourceState),

    /// The caller passed an argument the API cannot accept.
    #[error("{0}")]
    InvalidArgument(String),

    // === Internal Errors ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Session preconditions that reject an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// The session was closed.
    NotOpen,
    /// A non-reentrant operation is already running.
    Busy,
    /// One or more row iterators are still live.
    IteratorsActive { count: usize },
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOpen => f.write_str("The database connection is not open"),
            Self::Busy => f.write_str("This database connection is busy executing a query"),
            Self::IteratorsActive { count } => write!(
                f,
                "This database connection is busy executing a query ({count} open iterators)"
            ),
        }
    }
}

/// Failure reported by SQLite itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// Extended result code as returned by the engine.
    pub extended_code: i32,
    /// Engine-provided message.
    pub message: String,
}

impl EngineError {
    pub fn new(extended_code: i32, message: impl Into<String>) -> Self {
        Self {
            extended_code,
            message: message.into(),
        }
    }

    /// Primary result code (low byte of the extended code).
    pub const fn primary_code(&self) -> i32 {
        self.extended_code & 0xff
    }

    /// The primary code as an [`ErrorCode`], if it is one SQLite defines.
    pub const fn code(&self) -> Option<ErrorCode> {
        ErrorCode::from_i32(self.primary_code())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A host value could not be converted to an engine value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// An arbitrary-precision integer does not fit in 64 bits.
    #[error("a bigint that was too large")]
    BigIntTooLarge,

    /// The value has no engine representation.
    #[error("an invalid value ({kind})")]
    InvalidValue { kind: &'static str },

    /// The current row has no value at the requested column.
    #[error("a row without column {index}")]
    MissingColumn { index: usize },
}

/// An error raised by host code, preserved as-is.
///
/// The wrapped value is never re-formatted: `Display` forwards to it and
/// [`HostError::downcast_ref`] recovers the concrete type.
pub struct HostError(Box<dyn StdError + Send + Sync + 'static>);

impl HostError {
    pub fn new(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self(err.into())
    }

    /// A host error that is just a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }

    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: StdError + 'static>(&self) -> bool {
        self.0.is::<T>()
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync + 'static> {
        self.0
    }
}

impl fmt::Debug for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for HostError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

/// SQLite result/error codes.
///
/// These match the numeric values from C SQLite's `sqlite3.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Generic error.
    Error = 1,
    /// Internal logic error.
    Internal = 2,
    /// Access permission denied.
    Perm = 3,
    /// Callback requested abort.
    Abort = 4,
    /// Database file is locked.
    Busy = 5,
    /// Table is locked.
    Locked = 6,
    /// Out of memory.
    NoMem = 7,
    /// Attempt to write a read-only database.
    ReadOnly = 8,
    /// Interrupted by `sqlite3_interrupt()`.
    Interrupt = 9,
    /// Disk I/O error.
    IoErr = 10,
    /// Database disk image is malformed.
    Corrupt = 11,
    /// Not found (internal).
    NotFound = 12,
    /// Database or disk is full.
    Full = 13,
    /// Unable to open database file.
    CantOpen = 14,
    /// Locking protocol error.
    Protocol = 15,
    /// (Not used).
    Empty = 16,
    /// Database schema has changed.
    Schema = 17,
    /// String or BLOB exceeds size limit.
    TooBig = 18,
    /// Constraint violation.
    Constraint = 19,
    /// Data type mismatch.
    Mismatch = 20,
    /// Library used incorrectly.
    Misuse = 21,
    /// OS feature not available.
    NoLfs = 22,
    /// Authorization denied.
    Auth = 23,
    /// Not used.
    Format = 24,
    /// Bind parameter out of range.
    Range = 25,
    /// Not a database file.
    NotADb = 26,
    /// Notification (not an error).
    Notice = 27,
    /// Warning (not an error).
    Warning = 28,
    /// `sqlite3_step()` has another row ready.
    Row = 100,
    /// `sqlite3_step()` has finished executing.
    Done = 101,
}

impl ErrorCode {
    /// Look up a primary result code.
    pub const fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::Internal,
            3 => Self::Perm,
            4 => Self::Abort,
            5 => Self::Busy,
            6 => Self::Locked,
            7 => Self::NoMem,
            8 => Self::ReadOnly,
            9 => Self::Interrupt,
            10 => Self::IoErr,
            11 => Self::Corrupt,
            12 => Self::NotFound,
            13 => Self::Full,
            14 => Self::CantOpen,
            15 => Self::Protocol,
            16 => Self::Empty,
            17 => Self::Schema,
            18 => Self::TooBig,
            19 => Self::Constraint,
            20 => Self::Mismatch,
            21 => Self::Misuse,
            22 => Self::NoLfs,
            23 => Self::Auth,
            24 => Self::Format,
            25 => Self::Range,
            26 => Self::NotADb,
            27 => Self::Notice,
            28 => Self::Warning,
            100 => Self::Row,
            101 => Self::Done,
            _ => return None,
        })
    }

    /// The `SQLITE_*` constant name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "SQLITE_OK",
            Self::Error => "SQLITE_ERROR",
            Self::Internal => "SQLITE_INTERNAL",
            Self::Perm => "SQLITE_PERM",
            Self::Abort => "SQLITE_ABORT",
            Self::Busy => "SQLITE_BUSY",
            Self::Locked => "SQLITE_LOCKED",
            Self::NoMem => "SQLITE_NOMEM",
            Self::ReadOnly => "SQLITE_READONLY",
            Self::Interrupt => "SQLITE_INTERRUPT",
            Self::IoErr => "SQLITE_IOERR",
            Self::Corrupt => "SQLITE_CORRUPT",
            Self::NotFound => "SQLITE_NOTFOUND",
            Self::Full => "SQLITE_FULL",
            Self::CantOpen => "SQLITE_CANTOPEN",
            Self::Protocol => "SQLITE_PROTOCOL",
            Self::Empty => "SQLITE_EMPTY",
            Self::Schema => "SQLITE_SCHEMA",
            Self::TooBig => "SQLITE_TOOBIG",
            Self::Constraint => "SQLITE_CONSTRAINT",
            Self::Mismatch => "SQLITE_MISMATCH",
            Self::Misuse => "SQLITE_MISUSE",
            Self::NoLfs => "SQLITE_NOLFS",
            Self::Auth => "SQLITE_AUTH",
            Self::Format => "SQLITE_FORMAT",
            Self::Range => "SQLITE_RANGE",
            Self::NotADb => "SQLITE_NOTADB",
            Self::Notice => "SQLITE_NOTICE",
            Self::Warning => "SQLITE_WARNING",
            Self::Row => "SQLITE_ROW",
            Self::Done => "SQLITE_DONE",
        }
    }
}

impl GentabError {
    /// Map this error to a SQLite error code for compatibility.
    #[allow(clippy::match_same_arms)]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Engine(err) => match err.code() {
                Some(code) => code,
                None => ErrorCode::Error,
            },
            Self::HostCallback(_)
            | Self::PlanningViolation { .. }
            | Self::DeclareSchema { .. }
            | Self::ConfigureTable { .. }
            | Self::InvalidDefinition { .. }
            | Self::ColumnValue { .. } => ErrorCode::Error,
            Self::UnusablePlanConstraint => ErrorCode::Constraint,
            Self::BindValue { .. } => ErrorCode::Range,
            Self::ResourceState(_) | Self::InvalidArgument(_) => ErrorCode::Misuse,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the user can likely fix this without code changes.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PlanningViolation { .. }
                | Self::UnusablePlanConstraint
                | Self::ResourceState(_)
                | Self::InvalidArgument(_)
                | Self::BindValue { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::PlanningViolation { .. } => {
                Some("Bind table parameters with '=' or table-valued function arguments")
            }
            Self::ResourceState(ResourceState::IteratorsActive { .. }) => {
                Some("Finish or abandon open iterations before this operation")
            }
            Self::ResourceState(ResourceState::NotOpen) => Some("Open a new session"),
            Self::DeclareSchema { .. } => {
                Some("Return a single valid CREATE TABLE statement from the table factory")
            }
            _ => None,
        }
    }

    /// Whether this error came from host code rather than the engine.
    pub const fn is_host_error(&self) -> bool {
        matches!(self, Self::HostCallback(_))
    }

    /// The host error carried by this error, if any.
    pub fn host_error(&self) -> Option<&HostError> {
        match self {
            Self::HostCallback(err) => Some(err),
            _ => None,
        }
    }

    /// Create an engine error.
    pub fn engine(extended_code: i32, message: impl Into<String>) -> Self {
        Self::Engine(EngineError::new(extended_code, message))
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid-definition error for a table module.
    pub fn invalid_definition(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            module: module.into(),
            reason: reason.into(),
        }
    }
}

impl From<HostError> for GentabError {
    fn from(err: HostError) -> Self {
        Self::HostCallback(err)
    }
}

impl From<ResourceState> for GentabError {
    fn from(state: ResourceState) -> Self {
        Self::ResourceState(state)
    }
}

/// Result type alias using `GentabError`.
pub type Result<T> = std::result::Result<T, GentabError>;
