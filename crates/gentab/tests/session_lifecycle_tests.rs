//! Session state rules: busy, open iterators, closing and unsafe mode.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use gentab::{
    GentabError, HostError, HostValue, ResourceState, RowIterator, Session, SessionConfig,
    TableBuilder, rows,
};

fn count_to(args: &[HostValue]) -> Result<Box<dyn RowIterator>, HostError> {
    let upto = args[0].as_i64().unwrap_or(3);
    Ok(rows((1..=upto).map(|n| vec![HostValue::from(n)]).collect::<Vec<_>>()))
}

fn session_with_counter() -> Session {
    let session = Session::open_in_memory().unwrap();
    session
        .register_table(
            "counter",
            TableBuilder::new(["n"], count_to).parameters(["upto"]),
            true,
        )
        .unwrap();
    session
}

fn is_iterators_active(result: &Result<(), GentabError>) -> bool {
    matches!(
        result,
        Err(GentabError::ResourceState(ResourceState::IteratorsActive { .. }))
    )
}

#[test]
fn close_waits_for_iteration_to_finish() {
    let session = session_with_counter();
    let stmt = session.prepare("SELECT n FROM counter(3)").unwrap();
    let mut attempts = Vec::new();
    stmt.iterate(&[], |_row| {
        attempts.push(session.close());
        Ok(ControlFlow::Continue(()))
    })
    .unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(is_iterators_active));
    assert!(session.is_open());

    session.close().unwrap();
    assert!(!session.is_open());
}

#[test]
fn scans_count_as_iterators() {
    let session = session_with_counter();
    let stmt = session.prepare("SELECT n FROM counter(2)").unwrap();
    let mut seen = Vec::new();
    stmt.iterate(&[], |_row| {
        // One for the statement iteration, one for the open table cursor.
        seen.push(session.iterator_count());
        Ok(ControlFlow::Continue(()))
    })
    .unwrap();
    assert_eq!(seen, vec![2, 2]);
    assert_eq!(session.iterator_count(), 0);
}

#[test]
fn registering_tables_during_iteration_fails() {
    let session = session_with_counter();
    let stmt = session.prepare("SELECT n FROM counter(1)").unwrap();
    let mut outcome = None;
    stmt.iterate(&[], |_row| {
        outcome = Some(session.register_table(
            "late",
            TableBuilder::new(["n"], count_to).parameters(["upto"]),
            true,
        ));
        Ok(ControlFlow::Break(()))
    })
    .unwrap();
    assert!(is_iterators_active(&outcome.unwrap()));

    session
        .register_table(
            "late",
            TableBuilder::new(["n"], count_to).parameters(["upto"]),
            true,
        )
        .unwrap();
    assert_eq!(session.query("SELECT n FROM late(2)", &[]).unwrap().len(), 2);
}

#[test]
fn module_names_register_once_per_session() {
    let session = session_with_counter();
    let err = session
        .register_table("COUNTER", TableBuilder::new(["n"], count_to), true)
        .unwrap_err();
    assert!(
        matches!(err, GentabError::InvalidArgument(ref msg) if msg.contains("\"COUNTER\"")),
        "unexpected error: {err:?}"
    );
    assert!(!session.is_busy());
    // The original registration is still in place.
    assert_eq!(session.query("SELECT n FROM counter(2)", &[]).unwrap().len(), 2);

    let other = session_with_counter();
    assert_eq!(other.query("SELECT n FROM counter(1)", &[]).unwrap().len(), 1);
}

#[test]
fn exec_during_iteration_requires_unsafe_mode() {
    let session = session_with_counter();
    session.exec("CREATE TABLE log(n)").unwrap();
    let stmt = session.prepare("SELECT n FROM counter(2)").unwrap();

    let mut outcome = None;
    stmt.iterate(&[], |_row| {
        outcome = Some(session.exec("INSERT INTO log VALUES (1)"));
        Ok(ControlFlow::Break(()))
    })
    .unwrap();
    assert!(is_iterators_active(&outcome.unwrap()));

    session.set_unsafe_mode(true).unwrap();
    assert!(session.unsafe_mode());
    stmt.iterate(&[], |row| {
        session.run("INSERT INTO log VALUES (?1)", &[row.get(0).cloned().unwrap()])?;
        Ok(ControlFlow::Continue(()))
    })
    .unwrap();
    let logged = session.query("SELECT count(*) AS c FROM log", &[]).unwrap();
    assert_eq!(logged[0].get_named("c"), Some(&HostValue::Number(2.0)));
}

#[test]
fn generators_cannot_reenter_a_busy_session() {
    let slot: Arc<OnceLock<Weak<Session>>> = Arc::default();
    let outcomes: Arc<Mutex<Vec<Result<(), GentabError>>>> = Arc::default();

    let session = Arc::new(Session::open_in_memory().unwrap());
    slot.set(Arc::downgrade(&session)).unwrap();

    let generator_slot = Arc::clone(&slot);
    let generator_outcomes = Arc::clone(&outcomes);
    let reentrant = move |_args: &[HostValue]| -> Result<Box<dyn RowIterator>, HostError> {
        if let Some(session) = generator_slot.get().and_then(Weak::upgrade) {
            generator_outcomes
                .lock()
                .unwrap()
                .push(session.exec("SELECT 1"));
        }
        Ok(rows(vec![vec![HostValue::from(1)]]))
    };
    session
        .register_table("reentrant", TableBuilder::new(["n"], reentrant), true)
        .unwrap();

    assert_eq!(session.query("SELECT n FROM reentrant", &[]).unwrap().len(), 1);
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        Err(GentabError::ResourceState(ResourceState::Busy))
    ));
}

#[test]
fn everything_fails_after_close() {
    let session = session_with_counter();
    session.close().unwrap();
    session.close().unwrap();

    let not_open =
        |err: GentabError| matches!(err, GentabError::ResourceState(ResourceState::NotOpen));
    assert!(not_open(session.exec("SELECT 1").unwrap_err()));
    assert!(not_open(session.prepare("SELECT 1").unwrap_err()));
    assert!(not_open(session.query("SELECT 1", &[]).unwrap_err()));
    assert!(not_open(
        session
            .register_table("again", TableBuilder::new(["n"], count_to), true)
            .unwrap_err()
    ));
    assert!(not_open(session.set_unsafe_mode(true).unwrap_err()));
    assert!(!session.in_transaction());
}

#[test]
fn statements_fail_once_their_session_closes() {
    let session = session_with_counter();
    let stmt = session.prepare("SELECT n FROM counter(2)").unwrap();
    session.close().unwrap();
    let err = stmt.all(&[]).unwrap_err();
    assert!(matches!(err, GentabError::ResourceState(ResourceState::NotOpen)));
    assert_eq!(err.suggestion(), Some("Open a new session"));
}

#[test]
fn transactions_span_statements() {
    let session = session_with_counter();
    session.exec("CREATE TABLE t(n)").unwrap();
    session.exec("BEGIN").unwrap();
    assert!(session.in_transaction());
    session.exec("INSERT INTO t SELECT n FROM counter(4)").unwrap();
    session.exec("ROLLBACK").unwrap();
    assert!(!session.in_transaction());
    let count = session.query("SELECT count(*) AS c FROM t", &[]).unwrap();
    assert_eq!(count[0].get_named("c"), Some(&HostValue::Number(0.0)));
}

#[test]
fn file_sessions_persist_between_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gentab.db");
    let path = path.to_string_lossy().into_owned();

    let session = Session::open(path.clone(), &SessionConfig::default()).unwrap();
    assert_eq!(session.path(), path);
    session
        .register_table(
            "counter",
            TableBuilder::new(["n"], count_to).parameters(["upto"]),
            true,
        )
        .unwrap();
    session
        .exec("CREATE TABLE kept AS SELECT n FROM counter(5)")
        .unwrap();
    session.close().unwrap();

    let reopened = Session::open(path, &SessionConfig::default()).unwrap();
    let rows = reopened.query("SELECT sum(n) AS s FROM kept", &[]).unwrap();
    assert_eq!(rows[0].get_named("s"), Some(&HostValue::Number(15.0)));
}
