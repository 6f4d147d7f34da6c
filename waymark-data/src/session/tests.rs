//! Session behaviour against a scripted transport.

use std::{cell::RefCell, rc::Rc, time::Duration};

use geo::Coord;
use rstest::{fixture, rstest};
use tokio::{
    sync::broadcast::{self, error::TryRecvError},
    task::LocalSet,
    time::Instant,
};
use waymark_core::{
    Changeset, ChangesetId, Entity, EntityId, EntityMeta, MercatorProjection, Node, Note, NoteId,
    NoteStatus, OsmChange, Tags, Tile, TileCoord, User, UserId, Viewport,
};

use super::{OsmSession, SessionConfig, SessionEvent, TileCallback};
use crate::{
    ApiStatus, DecodeOptions, Method, OsmError,
    test_support::{StubTransport, block_on_local},
};

const NODE_BODY: &str = r#"<osm><node id="1" version="2" lat="0.0001" lon="0.0001"/></osm>"#;
const OPEN_NOTE_BODY: &str = r#"<osm><note lon="0.0001" lat="0.0001"><id>5</id><status>open</status><comments><comment><uid>9</uid><user>ann</user><text>hi</text><action>opened</action></comment></comments></note></osm>"#;
const CLOSED_NOTE_BODY: &str = r#"<osm><note lon="0.0001" lat="0.0001"><id>5</id><status>closed</status><comments/></note></osm>"#;
const USER_BODY: &str = r#"<osm><user id="9" display_name="ann"><changesets count="3"/></user></osm>"#;
const CAPABILITIES_BODY: &str = r#"<osm><api><status api="online"/></api><policy><imagery><blacklist regex="^https://bad\.example/"/></imagery></policy></osm>"#;
const THREE_NODES_BODY: &str = r#"<osm><node id="1" version="1" lat="-0.001" lon="0.001"/><node id="2" version="1" lat="-0.002" lon="0.002"/><node id="3" version="1" lat="-0.003" lon="0.003"/></osm>"#;
const THREE_NOTES_BODY: &str = r#"<osm><note lon="0.001" lat="-0.001"><id>1</id><status>open</status><comments/></note><note lon="0.002" lat="-0.002"><id>2</id><status>open</status><comments/></note><note lon="0.003" lat="-0.003"><id>3</id><status>open</status><comments/></note></osm>"#;
const MAP_BBOX: &str = "/api/0.6/map?bbox=";
const NOTES_BBOX: &str = "/api/0.6/notes?bbox=";

type Seen = Rc<RefCell<Vec<(TileCoord, Result<Vec<Entity>, OsmError>)>>>;

#[fixture]
fn viewport() -> Viewport {
    Viewport::new(256.0, 256.0)
}

#[fixture]
fn null_island(viewport: Viewport) -> MercatorProjection {
    MercatorProjection::centred(Coord { x: 0.0, y: 0.0 }, 16.0, viewport)
}

fn quick_config() -> SessionConfig {
    SessionConfig::default().with_settle_delay(Duration::ZERO)
}

fn session(transport: StubTransport) -> OsmSession<StubTransport> {
    OsmSession::new(transport, quick_config())
}

fn recording_callback() -> (TileCallback, Seen) {
    let seen: Seen = Rc::default();
    let sink = Rc::clone(&seen);
    let callback: TileCallback = Rc::new(move |tile: &Tile, result| {
        sink.borrow_mut().push((tile.coord, result));
    });
    (callback, seen)
}

fn draft() -> Changeset {
    Changeset::new(Tags::from([("comment".to_owned(), "Add bench".to_owned())]))
}

fn change() -> OsmChange {
    OsmChange {
        created: vec![Entity::Node(Node {
            meta: EntityMeta::new(EntityId::node(-1), Tags::from([("amenity".to_owned(), "bench".to_owned())])),
            location: Coord { x: 0.5, y: 0.5 },
        })],
        ..OsmChange::default()
    }
}

/// A viewport lying inside a single map-data tile and a single note tile.
fn inside_one_tile() -> (MercatorProjection, Viewport) {
    let viewport = Viewport::new(16.0, 16.0);
    let projection = MercatorProjection::centred(Coord { x: 0.00275, y: -0.00275 }, 16.0, viewport);
    (projection, viewport)
}

/// Yield until `ready` holds, failing the test if it never does.
async fn yield_until(mut ready: impl FnMut() -> bool) {
    for _ in 0..64 {
        if ready() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held");
}

/// Give spawned local tasks a chance to run to their next suspension.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return drained,
            Err(TryRecvError::Lagged(skipped)) => panic!("missed {skipped} events"),
        }
    }
}

fn seed_note(session: &OsmSession<StubTransport>, status: NoteStatus) {
    let mut note = Note::new(NoteId(5), Coord { x: 0.0001, y: 0.0001 });
    note.status = status;
    session.replace_note(note);
}

#[rstest]
fn tiles_are_requested_once(null_island: MercatorProjection, viewport: Viewport) {
    let transport = StubTransport::new();
    for _ in 0..4 {
        transport.reply(Method::Get, MAP_BBOX, "<osm/>");
    }
    let session = session(transport);

    block_on_local(async {
        let first = session.load_tiles(&null_island, viewport, None);
        let while_in_flight = session.load_tiles(&null_island, viewport, None);
        settle().await;
        let after_loading = session.load_tiles(&null_island, viewport, None);

        assert_eq!(first.len(), 4);
        assert!(while_in_flight.is_empty());
        assert!(after_loading.is_empty());
        assert_eq!(session.loaded_tiles().len(), 4);
        assert_eq!(session.transport().count(MAP_BBOX), 4);
    });
}

#[rstest]
fn overlapping_tiles_decode_each_entity_once(null_island: MercatorProjection, viewport: Viewport) {
    let transport = StubTransport::new();
    for _ in 0..4 {
        transport.reply(Method::Get, MAP_BBOX, NODE_BODY);
    }
    let session = session(transport);
    let (callback, seen) = recording_callback();

    block_on_local(async {
        session.load_tiles(&null_island, viewport, Some(callback));
        settle().await;
    });

    let seen = seen.borrow();
    assert_eq!(seen.len(), 4);
    let entities: Vec<EntityId> = seen
        .iter()
        .flat_map(|(_, result)| result.as_ref().expect("tile should load").iter())
        .map(Entity::id)
        .collect();
    assert_eq!(entities, vec![EntityId::node(1)]);
}

#[rstest]
fn loading_events_bracket_map_tiles(null_island: MercatorProjection, viewport: Viewport) {
    let transport = StubTransport::new();
    for _ in 0..4 {
        transport.reply(Method::Get, MAP_BBOX, "<osm/>");
    }
    let session = session(transport);
    let mut events = session.subscribe();

    block_on_local(async {
        session.load_tiles(&null_island, viewport, None);
        settle().await;
    });

    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Loading, SessionEvent::Loaded]
    );
}

#[rstest]
fn panning_away_aborts_tiles_left_behind(null_island: MercatorProjection, viewport: Viewport) {
    let transport = StubTransport::new();
    let held: Vec<_> = (0..4).map(|_| transport.hold(Method::Get, MAP_BBOX)).collect();
    let session = session(transport);
    let mut events = session.subscribe();
    let (callback, seen) = recording_callback();
    let elsewhere = MercatorProjection::centred(Coord { x: 10.0, y: 10.0 }, 16.0, viewport);

    block_on_local(async {
        let abandoned = session.load_tiles(&null_island, viewport, Some(Rc::clone(&callback)));
        settle().await;
        let replacements = session.load_tiles(&elsewhere, viewport, Some(callback));
        for reply in held {
            reply.release(NODE_BODY);
        }
        settle().await;

        let reported: Vec<TileCoord> = seen.borrow().iter().map(|(coord, _)| *coord).collect();
        assert!(reported.iter().all(|coord| !abandoned.contains(coord)));
        assert_eq!(reported.len(), replacements.len());
    });

    assert!(session.loaded_tiles().is_empty());
    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::Loading,
            SessionEvent::Loaded,
            SessionEvent::Loading,
            SessionEvent::Loaded,
        ]
    );
}

#[rstest]
fn disabled_session_requests_nothing(null_island: MercatorProjection, viewport: Viewport) {
    let session = session(StubTransport::new());
    session.toggle(false);

    block_on_local(async {
        assert!(session.load_tiles(&null_island, viewport, None).is_empty());
        assert!(session.load_notes(&null_island, viewport).is_empty());
    });
    assert!(session.transport().requests().is_empty());
}

#[rstest]
fn reset_turns_late_replies_into_connection_switched() {
    let transport = StubTransport::new();
    let held = transport.hold(Method::Get, "/api/0.6/node/1");
    let session = session(transport);

    block_on_local(async {
        let reader = session.clone();
        let task = tokio::task::spawn_local(async move { reader.load_entity(EntityId::node(1)).await });
        settle().await;
        session.reset();
        held.release(NODE_BODY);

        let result = task.await.expect("read task should join");
        assert_eq!(result, Err(OsmError::ConnectionSwitched));
    });
    assert!(session.inner.state.borrow().seen.is_empty());
    assert_eq!(session.epoch(), 1);
}

#[rstest]
fn reset_between_decode_slices_discards_the_document() {
    let session = OsmSession::new(StubTransport::new(), quick_config().with_decode_slice(1));

    block_on_local(async {
        let token = session.inner.epoch.token();
        let decoder = session.clone();
        let task = tokio::task::spawn_local(async move {
            decoder
                .decode_body(THREE_NODES_BODY, DecodeOptions::SKIP_SEEN, token)
                .await
        });
        yield_until(|| !session.inner.state.borrow().seen.is_empty()).await;
        session.reset();

        let result = task.await.expect("decode task should join");
        assert!(matches!(result, Err(OsmError::ConnectionSwitched)), "{result:?}");
    });
    assert!(session.inner.state.borrow().seen.is_empty());
}

#[rstest]
fn reset_while_a_tile_decodes_reports_connection_switched() {
    let transport = StubTransport::new();
    let held = transport.hold(Method::Get, MAP_BBOX);
    let session = OsmSession::new(transport, quick_config().with_decode_slice(1));
    let (projection, viewport) = inside_one_tile();
    let (callback, recorded) = recording_callback();

    let requested = block_on_local(async {
        let requested = session.load_tiles(&projection, viewport, Some(callback));
        settle().await;
        held.release(THREE_NODES_BODY);
        yield_until(|| !session.inner.state.borrow().seen.is_empty()).await;
        session.reset();
        settle().await;
        requested
    });

    assert_eq!(requested.len(), 1);
    assert_eq!(
        *recorded.borrow(),
        vec![(requested[0], Err(OsmError::ConnectionSwitched))]
    );
    assert!(session.loaded_tiles().is_empty());
    assert!(session.inner.state.borrow().seen.is_empty());
}

#[rstest]
fn reset_while_a_note_tile_decodes_leaves_the_note_cache_empty() {
    let transport = StubTransport::new();
    let held = transport.hold(Method::Get, NOTES_BBOX);
    let session = OsmSession::new(transport, quick_config().with_decode_slice(1));
    let (projection, viewport) = inside_one_tile();

    block_on_local(async {
        assert_eq!(session.load_notes(&projection, viewport).len(), 1);
        settle().await;
        held.release(THREE_NOTES_BODY);
        yield_until(|| session.get_note(NoteId(1)).is_some()).await;
        session.reset();
        settle().await;
    });

    assert!(session.loaded_note_tiles().is_empty());
    assert!(session.notes(&projection).is_empty());
    assert!((1..=3).all(|id| session.get_note(NoteId(id)).is_none()));
}

#[rstest]
fn switch_retargets_and_clears_caches() {
    let session = session(StubTransport::new());
    session.set_loaded_tiles([TileCoord::new(1, 2, 16)].into());
    let mut events = session.subscribe();

    block_on_local(async {
        session.switch("https://dev.example.test/");
    });

    assert!(session.loaded_tiles().is_empty());
    assert_eq!(session.transport().url_roots(), vec!["https://dev.example.test/".to_owned()]);
    assert_eq!(session.urls().url_root(), "https://dev.example.test");
    assert_eq!(drain(&mut events), vec![SessionEvent::Change]);
}

#[rstest]
fn rejected_read_retries_anonymously() {
    let transport = StubTransport::new().signed_in();
    transport.fail_status(Method::Get, "/api/0.6/node/1", 401);
    transport.reply(Method::Get, "/api/0.6/node/1", NODE_BODY);
    let session = session(transport);

    let entities = block_on_local(session.load_entity(EntityId::node(1))).expect("retry should succeed");

    assert_eq!(entities.len(), 1);
    let credentialed: Vec<bool> = session
        .transport()
        .requests()
        .iter()
        .map(|request| request.credentialed)
        .collect();
    assert_eq!(credentialed, vec![true, false]);
    assert_eq!(session.transport().logouts(), 1);
    assert!(!session.authenticated());
}

#[rstest]
fn ways_are_loaded_in_full() {
    let transport = StubTransport::new();
    transport.reply(Method::Get, "/api/0.6/way/7/full", "<osm/>");
    let session = session(transport);

    block_on_local(session.load_entity(EntityId::way(7))).expect("way should load");
    block_on_local(session.load_entity_version(EntityId::way(7), 3)).expect_err("history is unscripted");

    assert_eq!(
        session.transport().paths(),
        vec!["/api/0.6/way/7/full".to_owned(), "/api/0.6/way/7/3".to_owned()]
    );
}

#[rstest]
fn load_multiple_batches_by_kind() {
    let transport = StubTransport::new();
    transport.reply(Method::Get, "/api/0.6/nodes?nodes=", "<osm/>");
    transport.reply(Method::Get, "/api/0.6/nodes?nodes=", "<osm/>");
    transport.reply(Method::Get, "/api/0.6/ways?ways=", "<osm/>");
    let session = OsmSession::new(transport, quick_config().with_batch_size(2));
    let ids = [
        EntityId::node(1),
        EntityId::node(2),
        EntityId::node(3),
        EntityId::way(1),
        EntityId::node(1),
    ];
    let mut batches = 0;

    block_on_local(session.load_multiple(&ids, |result| {
        assert!(result.is_ok());
        batches += 1;
    }));

    let mut paths = session.transport().paths();
    paths.sort();
    assert_eq!(batches, 3);
    assert_eq!(
        paths,
        vec![
            "/api/0.6/nodes?nodes=1,2".to_owned(),
            "/api/0.6/nodes?nodes=3".to_owned(),
            "/api/0.6/ways?ways=1".to_owned(),
        ]
    );
}

#[rstest]
fn anonymous_user_load_only_reports_cached_users() {
    let session = session(StubTransport::new());
    session.inner.state.borrow_mut().users.insert(User::new(UserId(1)));
    let mut reported = Vec::new();

    block_on_local(session.load_users(&[UserId(1), UserId(2)], |result| {
        reported.push(result.expect("cached users never fail"));
    }));

    assert_eq!(reported, vec![vec![User::new(UserId(1))]]);
    assert!(session.transport().requests().is_empty());
}

#[rstest]
fn forbidden_user_load_logs_out_and_keeps_cache() {
    let transport = StubTransport::new().signed_in();
    transport.fail_status(Method::Get, "/api/0.6/users?users=", 403);
    let session = session(transport);
    session.inner.state.borrow_mut().users.insert(User::new(UserId(1)));
    let mut reported = Vec::new();

    block_on_local(session.load_users(&[UserId(1), UserId(2)], |result| reported.push(result)));

    assert_eq!(reported.len(), 2);
    assert_eq!(reported[0], Ok(vec![User::new(UserId(1))]));
    let failure = reported[1].as_ref().expect_err("batch should fail");
    assert_eq!(failure.status(), Some(403));
    assert_eq!(session.transport().paths(), vec!["/api/0.6/users?users=2".to_owned()]);
    assert_eq!(session.transport().logouts(), 1);

    let cached = block_on_local(session.user(UserId(1))).expect("cached lookups succeed");
    assert_eq!(cached, Some(User::new(UserId(1))));
}

#[rstest]
fn user_changesets_keep_only_commented_ones() {
    let transport = StubTransport::new().signed_in();
    transport.reply(Method::Get, "/api/0.6/user/details", r#"<osm><user id="3" display_name="bo"/></osm>"#);
    transport.reply(
        Method::Get,
        "/api/0.6/changesets?user=3",
        r#"<osm><changeset id="10"><tag k="comment" v="Paths"/></changeset><changeset id="11"><tag k="comment" v=""/></changeset><changeset id="12"/></osm>"#,
    );
    let session = session(transport);

    let first = block_on_local(session.user_changesets()).expect("changesets should load");
    let second = block_on_local(session.user_changesets()).expect("changesets are cached");

    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, Some(ChangesetId(10)));
    assert_eq!(first, second);
    assert_eq!(session.transport().requests().len(), 2);
}

#[rstest]
fn rate_limit_is_latched_until_reset() {
    let transport = StubTransport::new();
    transport.fail_status(Method::Get, "/api/0.6/node/1", 429);
    transport.fail_status(Method::Get, "/api/0.6/node/1", 509);
    transport.reply(Method::Get, "/api/capabilities", CAPABILITIES_BODY);
    transport.reply(Method::Get, "/api/capabilities", CAPABILITIES_BODY);
    let session = session(transport);
    let mut events = session.subscribe();

    block_on_local(async {
        let err = session.load_entity(EntityId::node(1)).await.expect_err("read is limited");
        assert!(err.is_rate_limit());
        assert_eq!(drain(&mut events), vec![SessionEvent::Change]);

        session.load_entity(EntityId::node(1)).await.expect_err("still limited");
        assert!(drain(&mut events).is_empty());

        match session.status().await {
            Err(OsmError::RateLimited(limit)) => assert_eq!(limit.status(), Some(429)),
            other => panic!("expected the latched rate limit, got {other:?}"),
        }
        session.reset();
        assert_eq!(session.status().await, Ok(ApiStatus::Online));
    });

    assert_eq!(session.imagery_blacklists(), vec![r"^https://bad\.example/".to_owned()]);
    assert!(session.is_blacklisted("https://bad.example/tiles/1/2/3.png"));
    assert!(!session.is_blacklisted("https://good.example/tiles/1/2/3.png"));
}

#[rstest]
fn authentication_clears_the_rate_limit() {
    let transport = StubTransport::new();
    transport.fail_status(Method::Get, "/api/0.6/node/1", 429);
    transport.reply(Method::Get, "/api/capabilities", CAPABILITIES_BODY);
    let session = session(transport);
    let mut events = session.subscribe();

    block_on_local(async {
        session.load_entity(EntityId::node(1)).await.expect_err("read is limited");
        session.authenticate().await.expect("authentication succeeds");
        assert_eq!(session.status().await, Ok(ApiStatus::Online));
    });

    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::Change,
            SessionEvent::AuthLoading,
            SessionEvent::AuthDone,
            SessionEvent::Change,
        ]
    );
}

#[rstest]
fn second_upload_is_rejected_while_the_first_is_in_flight() {
    let transport = StubTransport::new().signed_in();
    let create = transport.hold(Method::Put, "/api/0.6/changeset/create");
    transport.reply(Method::Post, "/api/0.6/changeset/42/upload", "<diffResult/>");
    transport.reply(Method::Put, "/api/0.6/changeset/42/close", "");
    let session = session(transport);

    block_on_local(async {
        let uploader = session.clone();
        let first = tokio::task::spawn_local(async move {
            uploader.put_changeset(draft(), &change()).await
        });
        settle().await;

        let second = session
            .put_changeset(draft(), &change())
            .await
            .expect_err("second upload must be rejected");
        assert_eq!(second.error, OsmError::ChangesetInFlight);
        assert_eq!(second.changeset, draft());

        create.release("42");
        let uploaded = first
            .await
            .expect("upload task should join")
            .expect("first upload succeeds");
        assert_eq!(uploaded.id, Some(ChangesetId(42)));
        settle().await;
    });

    assert_eq!(session.transport().count("/api/0.6/changeset/create"), 1);
    assert_eq!(session.transport().count("/api/0.6/changeset/42/close"), 1);
}

#[rstest]
fn failed_upload_leaves_the_changeset_open_for_reuse() {
    let transport = StubTransport::new().signed_in();
    transport.reply(Method::Put, "/api/0.6/changeset/create", "7");
    transport.fail_status(Method::Post, "/api/0.6/changeset/7/upload", 500);
    transport.reply(Method::Post, "/api/0.6/changeset/7/upload", "<diffResult/>");
    let session = session(transport);

    block_on_local(async {
        let failure = session
            .put_changeset(draft(), &change())
            .await
            .expect_err("upload fails");
        assert_eq!(failure.error.status(), Some(500));
        assert_eq!(failure.changeset.id, Some(ChangesetId(7)));

        let uploaded = session
            .put_changeset(draft(), &change())
            .await
            .expect("retry reuses the open changeset");
        assert_eq!(uploaded.id, Some(ChangesetId(7)));
        settle().await;
    });

    assert_eq!(session.transport().count("/api/0.6/changeset/create"), 1);
    assert_eq!(session.transport().count("/api/0.6/changeset/7/upload"), 2);
    assert_eq!(session.inner.state.borrow().changeset.open, None);
}

#[rstest]
fn rejected_changeset_creation_logs_out() {
    let transport = StubTransport::new().signed_in();
    transport.fail_status(Method::Put, "/api/0.6/changeset/create", 401);
    let session = session(transport);

    let failure = block_on_local(session.put_changeset(draft(), &change())).expect_err("create fails");

    assert_eq!(failure.changeset, draft());
    assert!(failure.error.is_auth_failure());
    assert_eq!(session.transport().logouts(), 1);
    assert!(!session.authenticated());
    assert_eq!(session.transport().count("/api/0.6/changeset/"), 1);
}

#[rstest]
fn reset_while_opening_stops_before_upload() {
    let transport = StubTransport::new().signed_in();
    let create = transport.hold(Method::Put, "/api/0.6/changeset/create");
    let session = session(transport);

    block_on_local(async {
        let uploader = session.clone();
        let task = tokio::task::spawn_local(async move {
            uploader.put_changeset(draft(), &change()).await
        });
        settle().await;
        session.reset();
        create.release("42");

        let failure = task
            .await
            .expect("upload task should join")
            .expect_err("reset interrupts the upload");
        assert_eq!(failure.error, OsmError::ConnectionSwitched);
    });

    assert_eq!(session.transport().count("/api/0.6/changeset/42"), 0);
    assert_eq!(session.inner.state.borrow().changeset.open, None);
}

#[tokio::test(start_paused = true)]
async fn upload_opens_uploads_closes_then_settles() {
    let transport = StubTransport::new().signed_in();
    transport.reply(Method::Put, "/api/0.6/changeset/create", "42\n");
    transport.reply(Method::Post, "/api/0.6/changeset/42/upload", "<diffResult/>");
    transport.reply(Method::Put, "/api/0.6/changeset/42/close", "");
    let session = OsmSession::new(transport, SessionConfig::default());

    LocalSet::new()
        .run_until(async {
            let started = Instant::now();
            let uploaded = session
                .put_changeset(draft(), &change())
                .await
                .expect("upload succeeds");
            assert_eq!(uploaded.id, Some(ChangesetId(42)));
            assert!(started.elapsed() >= Duration::from_millis(2_500));
        })
        .await;

    let requests = session.transport().requests();
    let paths: Vec<&str> = requests.iter().map(|request| request.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/api/0.6/changeset/create",
            "/api/0.6/changeset/42/upload",
            "/api/0.6/changeset/42/close",
        ]
    );
    let create_body = requests[0].body.as_deref().unwrap_or_default();
    assert!(create_body.contains(r#"<tag k="comment" v="Add bench"/>"#));
    let upload_body = requests[1].body.as_deref().unwrap_or_default();
    assert!(upload_body.contains(r#"changeset="42""#));
}

#[tokio::test(start_paused = true)]
async fn note_tiles_load_comment_authors() {
    let transport = StubTransport::new().signed_in();
    for _ in 0..4 {
        transport.reply(Method::Get, NOTES_BBOX, OPEN_NOTE_BODY);
    }
    transport.reply(Method::Get, "/api/0.6/users?users=9", USER_BODY);
    let session = session(transport);
    let viewport = Viewport::new(256.0, 256.0);
    let projection = MercatorProjection::centred(Coord { x: 0.0, y: 0.0 }, 16.0, viewport);
    let mut events = session.subscribe();

    LocalSet::new()
        .run_until(async {
            assert_eq!(session.load_notes(&projection, viewport).len(), 4);
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;

    let notes = session.notes(&projection);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, NoteId(5));
    assert_eq!(session.loaded_note_tiles().len(), 4);
    assert_eq!(session.transport().count("/api/0.6/users"), 1);
    let user = session.inner.state.borrow().users.users.get(&UserId(9)).cloned();
    assert_eq!(user.and_then(|user| user.display_name), Some("ann".to_owned()));
    let notes_loaded = drain(&mut events)
        .into_iter()
        .filter(|event| *event == SessionEvent::NotesLoaded)
        .count();
    assert_eq!(notes_loaded, 4);
}

#[tokio::test(start_paused = true)]
async fn user_loads_are_throttled_to_one_trailing_call() {
    let transport = StubTransport::new().signed_in();
    transport.reply(Method::Get, "/api/0.6/users?users=", "<osm/>");
    transport.reply(Method::Get, "/api/0.6/users?users=", "<osm/>");
    let session = session(transport);

    LocalSet::new()
        .run_until(async {
            session.inner.state.borrow_mut().users.to_load.insert(UserId(1));
            session.throttle_user_load();
            settle().await;

            session.inner.state.borrow_mut().users.to_load = [UserId(2)].into();
            session.throttle_user_load();
            session.throttle_user_load();
            settle().await;
            assert_eq!(session.transport().count("/api/0.6/users"), 1);

            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;

    assert_eq!(
        session.transport().paths(),
        vec![
            "/api/0.6/users?users=1".to_owned(),
            "/api/0.6/users?users=2".to_owned(),
        ]
    );
}

#[rstest]
#[case(NoteStatus::Open, Some("fixed it"), "/api/0.6/notes/5/close?text=fixed+it")]
#[case(NoteStatus::Closed, None, "/api/0.6/notes/5/reopen")]
#[case(NoteStatus::Open, Some(""), "/api/0.6/notes/5/close")]
fn toggling_a_note_posts_the_flipping_action(
    #[case] status: NoteStatus,
    #[case] comment: Option<&str>,
    #[case] expected_path: &str,
) {
    let transport = StubTransport::new().signed_in();
    let body = if status == NoteStatus::Open {
        CLOSED_NOTE_BODY
    } else {
        OPEN_NOTE_BODY
    };
    transport.reply(Method::Post, "/api/0.6/notes/5/", body);
    let session = session(transport);
    seed_note(&session, status);

    let updated = block_on_local(session.toggle_note_status(NoteId(5), comment)).expect("action succeeds");

    assert_ne!(updated.status, status);
    assert_eq!(session.get_note(NoteId(5)).map(|note| note.status), Some(updated.status));
    assert_eq!(session.transport().paths(), vec![expected_path.to_owned()]);
}

#[rstest]
fn commenting_encodes_the_text() {
    let transport = StubTransport::new().signed_in();
    transport.reply(Method::Post, "/api/0.6/notes/5/comment", OPEN_NOTE_BODY);
    let session = session(transport);
    seed_note(&session, NoteStatus::Open);

    let updated = block_on_local(session.add_note_comment(NoteId(5), "a&b c")).expect("comment succeeds");

    assert_eq!(updated.comments.len(), 1);
    assert_eq!(
        session.transport().paths(),
        vec!["/api/0.6/notes/5/comment?text=a%26b+c".to_owned()]
    );
}

#[rstest]
fn note_actions_check_preconditions() {
    let anonymous = session(StubTransport::new());
    seed_note(&anonymous, NoteStatus::Open);
    let signed_in = session(StubTransport::new().signed_in());

    block_on_local(async {
        assert_eq!(
            anonymous.toggle_note_status(NoteId(5), None).await,
            Err(OsmError::NotAuthenticated)
        );
        assert_eq!(
            signed_in.add_note_comment(NoteId(5), "hello").await,
            Err(OsmError::UnknownNote(NoteId(5)))
        );
        assert_eq!(
            signed_in.add_note_comment(NoteId(5), "").await,
            Err(OsmError::EmptyComment)
        );
    });
    assert!(anonymous.transport().requests().is_empty());
    assert!(signed_in.transport().requests().is_empty());
}

#[rstest]
fn rejected_note_action_logs_out() {
    let transport = StubTransport::new().signed_in();
    transport.fail_status(Method::Post, "/api/0.6/notes/5/close", 403);
    let session = session(transport);
    seed_note(&session, NoteStatus::Open);

    let err = block_on_local(session.toggle_note_status(NoteId(5), None)).expect_err("action fails");

    assert!(err.is_auth_failure());
    assert_eq!(session.transport().logouts(), 1);
    assert_eq!(session.get_note(NoteId(5)).map(|note| note.status), Some(NoteStatus::Open));
}
