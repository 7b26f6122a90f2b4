//! Turning engine failures into [`GentabError`]s.
//!
//! When a host callback fails inside an engine call, the bridge parks the
//! error on the session and the engine only sees a generic failure. The
//! engine error that comes back out is then discarded in favour of the
//! parked one.

use gentab_error::GentabError;
use gentab_vtab::SessionState;
use rusqlite::ffi;
use tracing::debug;

/// Build the error to surface for a failed engine call.
///
/// A pending callback error wins and the slot is cleared. When the planner
/// gave up after a table rejected its plans, that rejection is reported.
/// Otherwise the engine's own code and message are used.
pub fn raise_engine_error(state: &SessionState, err: rusqlite::Error) -> GentabError {
    let plan_rejected = state.take_plan_rejected();
    if let Some(pending) = state.take_pending_error() {
        debug!(
            target: "gentab.session",
            engine = %err,
            error = %pending,
            "surfacing deferred callback error"
        );
        return pending;
    }
    if plan_rejected && is_no_query_solution(&err) {
        debug!(target: "gentab.session", engine = %err, "no usable plan");
        return GentabError::UnusablePlanConstraint;
    }
    engine_error(&err)
}

fn is_no_query_solution(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, Some(message))
            if failure.extended_code == ffi::SQLITE_ERROR
                && message.contains("no query solution")
    )
}

pub(crate) fn engine_error(err: &rusqlite::Error) -> GentabError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => GentabError::engine(
            failure.extended_code,
            message.clone().unwrap_or_else(|| failure.to_string()),
        ),
        rusqlite::Error::InvalidParameterCount(..) | rusqlite::Error::InvalidParameterName(_) => {
            GentabError::engine(ffi::SQLITE_RANGE, err.to_string())
        }
        other => GentabError::engine(ffi::SQLITE_ERROR, other.to_string()),
    }
}
