//! Behavioural coverage for changeset uploads.

use std::{cell::RefCell, time::Duration};

use geo::Coord;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use waymark_core::{Changeset, ChangesetId, Entity, EntityId, EntityMeta, Node, OsmChange, Tags};
use waymark_data::{
    Method, OsmSession, SessionConfig, UploadFailure,
    test_support::{StubTransport, block_on_local},
};

type SessionCell = RefCell<Option<OsmSession<StubTransport>>>;
type OutcomeCell = RefCell<Option<Result<Changeset, UploadFailure>>>;

const CREATE: &str = "/api/0.6/changeset/create";
const UPLOAD: &str = "/api/0.6/changeset/42/upload";
const CLOSE: &str = "/api/0.6/changeset/42/close";

#[fixture]
fn session() -> SessionCell {
    RefCell::new(None)
}

#[fixture]
fn outcome() -> OutcomeCell {
    RefCell::new(None)
}

fn install(cell: &SessionCell, transport: StubTransport) {
    let config = SessionConfig::default().with_settle_delay(Duration::ZERO);
    *cell.borrow_mut() = Some(OsmSession::new(transport, config));
}

fn current(cell: &SessionCell) -> OsmSession<StubTransport> {
    cell.borrow()
        .clone()
        .unwrap_or_else(|| panic!("session must be initialised"))
}

fn draft() -> Changeset {
    Changeset::new(Tags::from([("comment".to_owned(), "Add a bench".to_owned())]))
}

fn bench() -> OsmChange {
    OsmChange {
        created: vec![Entity::Node(Node {
            meta: EntityMeta::new(EntityId::node(-1), Tags::from([("amenity".to_owned(), "bench".to_owned())])),
            location: Coord { x: -0.1, y: 51.5 },
        })],
        ..OsmChange::default()
    }
}

fn failure(outcome: &OutcomeCell) -> UploadFailure {
    match outcome.borrow().clone() {
        Some(Err(failure)) => failure,
        other => panic!("expected a failed upload, got {other:?}"),
    }
}

// --- Given steps ---

#[given("a signed-in session whose server accepts changesets")]
fn accepting_server(#[from(session)] cell: &SessionCell) {
    let transport = StubTransport::new().signed_in();
    transport.reply(Method::Put, CREATE, "42");
    transport.reply(Method::Post, UPLOAD, "<diffResult/>");
    transport.reply(Method::Put, CLOSE, "");
    install(cell, transport);
}

#[given("a signed-in session whose first upload fails")]
fn flaky_server(#[from(session)] cell: &SessionCell) {
    let transport = StubTransport::new().signed_in();
    transport.reply(Method::Put, CREATE, "42");
    transport.fail_status(Method::Post, UPLOAD, 500);
    transport.reply(Method::Post, UPLOAD, "<diffResult/>");
    transport.reply(Method::Put, CLOSE, "");
    install(cell, transport);
}

#[given("a signed-in session whose server rejects the credentials")]
fn rejecting_server(#[from(session)] cell: &SessionCell) {
    let transport = StubTransport::new().signed_in();
    transport.fail_status(Method::Put, CREATE, 401);
    install(cell, transport);
}

fn run_upload(cell: &SessionCell, outcome: &OutcomeCell) {
    let session = current(cell);
    let result = block_on_local(async {
        let result = session.put_changeset(draft(), &bench()).await;
        // Let the background close request run before the runtime goes away.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        result
    });
    *outcome.borrow_mut() = Some(result);
}

// --- When steps ---

#[when("I upload a changeset")]
fn upload(#[from(session)] cell: &SessionCell, #[from(outcome)] outcome: &OutcomeCell) {
    run_upload(cell, outcome);
}

#[when("I upload the changeset again")]
fn upload_again(#[from(session)] cell: &SessionCell, #[from(outcome)] outcome: &OutcomeCell) {
    let previous = failure(outcome);
    assert_eq!(previous.changeset.id, Some(ChangesetId(42)));
    run_upload(cell, outcome);
}

// --- Then steps ---

#[then("the upload reports changeset 42")]
fn reports_changeset(#[from(outcome)] outcome: &OutcomeCell) {
    let borrowed = outcome.borrow();
    let changeset = match borrowed.as_ref() {
        Some(Ok(changeset)) => changeset,
        other => panic!("expected a successful upload, got {other:?}"),
    };
    assert_eq!(changeset.id, Some(ChangesetId(42)));
    assert_eq!(changeset.comment(), Some("Add a bench"));
}

#[then("the server saw a create, an upload and a close in order")]
fn saw_full_sequence(#[from(session)] cell: &SessionCell) {
    let session = current(cell);
    assert_eq!(
        session.transport().paths(),
        vec![CREATE.to_owned(), UPLOAD.to_owned(), CLOSE.to_owned()]
    );
}

#[then("the server opened a single changeset")]
fn opened_once(#[from(session)] cell: &SessionCell) {
    let session = current(cell);
    assert_eq!(session.transport().count(CREATE), 1);
    assert_eq!(session.transport().count(UPLOAD), 2);
}

#[then("the upload fails with an authorisation error")]
fn fails_with_auth_error(#[from(outcome)] outcome: &OutcomeCell) {
    let failure = failure(outcome);
    assert_eq!(failure.error.status(), Some(401));
    assert_eq!(failure.changeset, draft());
}

#[then("the session is signed out")]
fn signed_out(#[from(session)] cell: &SessionCell) {
    let session = current(cell);
    assert!(!session.authenticated());
    assert_eq!(session.transport().logouts(), 1);
}

// --- Scenario registrations ---

macro_rules! register_scenario {
    ($name:ident, $index:literal) => {
        #[scenario(path = "tests/features/changeset_upload.feature", index = $index)]
        fn $name(session: SessionCell, outcome: OutcomeCell) {
            let _ = (session, outcome);
        }
    };
}

register_scenario!(uploading_a_new_changeset, 0);
register_scenario!(reusing_the_open_changeset, 1);
register_scenario!(logging_out_on_rejected_credentials, 2);
