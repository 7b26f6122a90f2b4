//! Process-wide list of open sessions.
//!
//! Hosts call [`close_all_sessions`] on shutdown so no engine handle outlives
//! the process's cleanup. Entries hold weak references; a dropped session
//! unregisters itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use gentab_vtab::SessionState;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::session::{ConnectionCell, SharedConnection, release_connection};

struct OpenSession {
    path: String,
    state: Weak<SessionState>,
    connection: Weak<ConnectionCell>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static OPEN_SESSIONS: LazyLock<Mutex<HashMap<u64, OpenSession>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub(crate) fn register(path: &str, state: &Arc<SessionState>, connection: &SharedConnection) -> u64 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    OPEN_SESSIONS.lock().insert(
        id,
        OpenSession {
            path: path.to_owned(),
            state: Arc::downgrade(state),
            connection: Arc::downgrade(connection),
        },
    );
    id
}

pub(crate) fn unregister(id: u64) {
    OPEN_SESSIONS.lock().remove(&id);
}

pub(crate) fn is_registered(id: u64) -> bool {
    OPEN_SESSIONS.lock().contains_key(&id)
}

/// Number of sessions currently open in this process.
pub fn open_session_count() -> usize {
    OPEN_SESSIONS.lock().len()
}

/// Force-close every open session, returning how many engine handles were
/// released.
///
/// Busy and iterating sessions are closed too. A handle that is borrowed by
/// a running statement on another thread is skipped and released when its
/// session is dropped.
pub fn close_all_sessions() -> usize {
    let sessions: Vec<(u64, OpenSession)> = OPEN_SESSIONS.lock().drain().collect();
    let mut released = 0;
    for (id, session) in sessions {
        if let Some(state) = session.state.upgrade() {
            state.mark_closed();
        }
        let Some(connection) = session.connection.upgrade() else {
            continue;
        };
        match release_connection(&connection) {
            Ok(true) => {
                released += 1;
                info!(target: "gentab.session", id, path = %session.path, "session force-closed");
            }
            Ok(false) => {}
            Err(err) => {
                warn!(target: "gentab.session", id, path = %session.path, error = %err, "could not force-close session");
            }
        }
    }
    released
}
