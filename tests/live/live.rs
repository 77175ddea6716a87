use quizbase::core::error::StoreError;
use quizbase::core::model::{NewPlayer, NewQuiz, Player, PlayerPatch, Quiz, QuizPatch};
use quizbase::core::schema::TableName;
use quizbase::core::store::{Reads, Store};
use quizbase::live::{Live, LiveEngine, Phase, Scope, join_all, switch_on_key};
use quizbase::plugins::player::player_live;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(150);

fn setup() -> (Store, LiveEngine) {
    let store = Store::in_memory().unwrap();
    let engine = LiveEngine::new(&store).unwrap();
    (store, engine)
}

fn add_player(store: &Store, name: &str) -> Player {
    store
        .create::<Player>(NewPlayer {
            name: name.to_string(),
            ..Default::default()
        })
        .unwrap()
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_baseline_is_delivered_on_register() {
    let (store, engine) = setup();
    add_player(&store, "Ada");

    let query = engine
        .register("player-count", |r| Ok(r.all::<Player>()?.len()))
        .unwrap();
    assert_eq!(query.recv_timeout(WAIT).unwrap().unwrap(), 1);
    assert_eq!(query.phase(), Phase::Delivered);
    assert_eq!(query.evaluations(), 1);
    assert_eq!(query.label(), "player-count");
}

#[test]
fn test_commit_reevaluates_dependent_query() {
    let (store, engine) = setup();
    let query = engine
        .register("names", |r| {
            Ok(r.all::<Player>()?
                .into_iter()
                .map(|p| p.name)
                .collect::<Vec<_>>())
        })
        .unwrap();
    assert!(query.recv_timeout(WAIT).unwrap().unwrap().is_empty());

    add_player(&store, "Ada");
    assert_eq!(query.recv_timeout(WAIT).unwrap().unwrap(), vec!["Ada"]);
}

#[test]
fn test_unrelated_writes_do_not_reevaluate() {
    let (store, engine) = setup();
    let ada = add_player(&store, "Ada");
    let id = ada.id.clone();
    let query = engine
        .register("ada", move |r| r.get::<Player>(&id))
        .unwrap();
    assert_eq!(query.recv_timeout(WAIT).unwrap().unwrap(), Some(ada.clone()));

    // Another table, and another key of the same table.
    store.create::<Quiz>(NewQuiz { name: "Q".into() }).unwrap();
    add_player(&store, "Bob");
    thread::sleep(QUIET);
    assert!(query.try_recv().is_none());
    assert_eq!(query.evaluations(), 1);

    store
        .update::<Player>(&ada.id, [PlayerPatch::Name("Ada L.".into())])
        .unwrap();
    let renamed = query.recv_timeout(WAIT).unwrap().unwrap().unwrap();
    assert_eq!(renamed.name, "Ada L.");
    assert_eq!(query.evaluations(), 2);
}

#[test]
fn test_evaluation_error_is_delivered_and_query_recovers() {
    let (store, engine) = setup();
    let query = engine
        .register("first-player", |r| {
            r.all::<Player>()?
                .into_iter()
                .next()
                .map(|p| p.name)
                .ok_or_else(|| {
                    StoreError::validation(
                        TableName::Player,
                        None,
                        "name",
                        "no players yet",
                    )
                })
        })
        .unwrap();

    match query.recv_timeout(WAIT).unwrap() {
        Err(StoreError::Evaluation { query, message }) => {
            assert_eq!(query, "first-player");
            assert!(message.contains("no players yet"));
        }
        other => panic!("expected evaluation error, got {other:?}"),
    }
    assert_eq!(query.phase(), Phase::Idle);

    add_player(&store, "Ada");
    assert_eq!(query.recv_timeout(WAIT).unwrap().unwrap(), "Ada");
}

#[test]
fn test_panicking_query_surfaces_as_error() {
    let (store, engine) = setup();
    let query = engine
        .register("explodes", |r| {
            if r.all::<Player>()?.is_empty() {
                panic!("boom");
            }
            Ok(())
        })
        .unwrap();
    assert!(matches!(
        query.recv_timeout(WAIT).unwrap(),
        Err(StoreError::Evaluation { ref message, .. }) if message == "boom"
    ));

    add_player(&store, "Ada");
    assert!(query.recv_timeout(WAIT).unwrap().is_ok());
}

#[test]
fn test_teardown_is_idempotent_and_stops_evaluation() {
    let (store, engine) = setup();
    let query = engine
        .register("count", |r| Ok(r.all::<Player>()?.len()))
        .unwrap();
    query.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(engine.active(), 1);

    query.teardown();
    query.teardown();
    assert_eq!(query.phase(), Phase::TornDown);
    assert_eq!(engine.active(), 0);

    add_player(&store, "Ada");
    assert!(matches!(
        query.recv_timeout(WAIT),
        Some(Err(StoreError::Closed))
    ));
    assert_eq!(query.evaluations(), 1);
}

#[test]
fn test_dropping_handle_unregisters() {
    let (_store, engine) = setup();
    {
        let _query = engine.register("short", |_| Ok(())).unwrap();
        assert_eq!(engine.active(), 1);
    }
    assert_eq!(engine.active(), 0);
}

#[test]
fn test_shutdown_tears_down_everything() {
    let (_store, engine) = setup();
    let a = engine.register("a", |_| Ok(1)).unwrap();
    let b = engine.register("b", |_| Ok(2)).unwrap();
    engine.shutdown();
    assert_eq!(engine.active(), 0);
    wait_until(|| a.phase() == Phase::TornDown && b.phase() == Phase::TornDown);
}

#[test]
fn test_results_arrive_in_commit_order_with_coalescing() {
    let (store, engine) = setup();
    let query = engine
        .register("count", |r| Ok(r.all::<Player>()?.len()))
        .unwrap();
    assert_eq!(query.recv_timeout(WAIT).unwrap().unwrap(), 0);

    for i in 0..50 {
        add_player(&store, &format!("P{i}"));
    }

    let mut seen = Vec::new();
    loop {
        let count = query.recv_timeout(WAIT).unwrap().unwrap();
        seen.push(count);
        if count == 50 {
            break;
        }
    }
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "out of order: {seen:?}");
}

#[test]
fn test_closed_store_ends_in_error() {
    let (store, engine) = setup();
    store.close().unwrap();
    let query = engine.register("late", |r| Ok(r.version())).unwrap();
    assert!(matches!(
        query.recv_timeout(WAIT).unwrap(),
        Err(StoreError::Closed)
    ));
}

#[test]
fn test_join_all_waits_for_every_source() {
    let (store, engine) = setup();
    let ada = add_player(&store, "Ada");
    let bob = add_player(&store, "Bob");

    let joined = join_all(vec![
        player_live(&engine, &ada.id).unwrap(),
        player_live(&engine, &bob.id).unwrap(),
    ])
    .unwrap();
    let players = joined.recv_timeout(WAIT).unwrap().unwrap();
    let names: Vec<String> = players.into_iter().flatten().map(|p| p.name).collect();
    assert_eq!(names, vec!["Ada", "Bob"]);

    store
        .update::<Player>(&bob.id, [PlayerPatch::Name("Robert".into())])
        .unwrap();
    let players = joined.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(players[1].as_ref().unwrap().name, "Robert");
}

#[test]
fn test_stopping_composed_stream_tears_down_sources() {
    let (store, engine) = setup();
    let ada = add_player(&store, "Ada");
    let mut joined = join_all(vec![
        player_live(&engine, &ada.id).unwrap(),
        player_live(&engine, &ada.id).unwrap(),
    ])
    .unwrap()
    .map(|players| Ok(players.len()))
    .unwrap();
    assert_eq!(joined.recv_timeout(WAIT).unwrap().unwrap(), 2);
    assert_eq!(engine.active(), 2);

    joined.stop();
    assert_eq!(engine.active(), 0);
}

#[test]
fn test_first_takes_one_result_and_tears_down() {
    let (store, engine) = setup();
    add_player(&store, "Ada");
    let live: Live<usize> = engine
        .register("count", |r| Ok(r.all::<Player>()?.len()))
        .unwrap()
        .into();
    assert_eq!(live.first().unwrap(), 1);
    assert_eq!(engine.active(), 0);
}

#[test]
fn test_switch_on_key_replaces_inner_subscription() {
    let (store, engine) = setup();
    let quiz = store.create::<Quiz>(NewQuiz { name: "a".into() }).unwrap();
    let quiz_id = quiz.id.clone();

    let key: Live<String> = engine
        .register("quiz-name", move |r| Ok(r.require::<Quiz>(&quiz_id)?.name))
        .unwrap()
        .into();
    let derive_engine = engine.clone();
    let switched: Live<String> = switch_on_key(key, move |name: &String| {
        let name = name.clone();
        let label = format!("derived:{name}");
        Ok(derive_engine
            .register(&label, move |_| Ok(name.to_uppercase()))?
            .into())
    })
    .unwrap();

    assert_eq!(switched.recv_timeout(WAIT).unwrap().unwrap(), "A");
    assert_eq!(engine.active(), 2);

    store
        .update::<Quiz>(&quiz.id, [QuizPatch::Name("b".into())])
        .unwrap();
    assert_eq!(switched.recv_timeout(WAIT).unwrap().unwrap(), "B");
    // Old derived query is gone, the new one took its place.
    assert_eq!(engine.active(), 2);

    drop(switched);
    assert_eq!(engine.active(), 0);
}

#[test]
fn test_scope_close_stops_watched_streams() {
    let (store, engine) = setup();
    let (tx, rx) = mpsc::channel();

    let mut scope = Scope::new();
    let live: Live<usize> = engine
        .register("count", |r| Ok(r.all::<Player>()?.len()))
        .unwrap()
        .into();
    scope
        .watch(live, move |item| {
            let _ = tx.send(item.map_err(|e| e.to_string()));
        })
        .unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 0);
    add_player(&store, "Ada");
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 1);

    scope.close();
    assert!(scope.token().is_cancelled());
    assert_eq!(engine.active(), 0);

    add_player(&store, "Bob");
    assert!(rx.recv_timeout(QUIET).is_err());
}
