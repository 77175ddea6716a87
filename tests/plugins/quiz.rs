use quizbase::core::error::StoreError;
use quizbase::core::model::{NewPlayer, NewQuestion, PointEvent, Question, QuestionType, Round};
use quizbase::core::store::Store;
use quizbase::live::LiveEngine;
use quizbase::plugins::player::{add_player, delete_player};
use quizbase::plugins::point::{add_point, remove_point};
use quizbase::plugins::question::{
    MIN_OPTION_SLOTS, add_question, delete_question, move_question, questions_live,
    set_correct_option, set_option,
};
use quizbase::plugins::quiz::{
    DEFAULT_QUIZ_NAME, add_quiz, delete_quiz, list_quizzes, question_id_at, question_index,
    rename_quiz,
};
use quizbase::plugins::round::{add_round, complete_round, set_question_reached};
use std::time::Duration;

fn titled(title: &str) -> NewQuestion {
    NewQuestion {
        title: title.to_string(),
        kind: QuestionType::Text,
        ..Default::default()
    }
}

#[test]
fn test_add_quiz_defaults_blank_names() {
    let store = Store::in_memory().unwrap();
    let quiz = add_quiz(&store, None).unwrap();
    assert_eq!(quiz.name, DEFAULT_QUIZ_NAME);
    let quiz = add_quiz(&store, Some("   ")).unwrap();
    assert_eq!(quiz.name, DEFAULT_QUIZ_NAME);
    let quiz = add_quiz(&store, Some("Friday")).unwrap();
    assert_eq!(quiz.name, "Friday");
}

#[test]
fn test_quizzes_list_most_recently_edited_first() {
    let store = Store::in_memory().unwrap();
    let first = add_quiz(&store, Some("First")).unwrap();
    let second = add_quiz(&store, Some("Second")).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    rename_quiz(&store, &first.id, "First, edited").unwrap();

    let ids: Vec<String> = list_quizzes(&store).unwrap().into_iter().map(|q| q.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
}

#[test]
fn test_questions_append_and_move() {
    let store = Store::in_memory().unwrap();
    let quiz = add_quiz(&store, Some("Order")).unwrap();
    let q: Vec<Question> = ["a", "b", "c"]
        .iter()
        .map(|t| add_question(&store, &quiz.id, titled(t)).unwrap())
        .collect();

    assert_eq!(question_index(&store, &quiz.id, &q[2].id).unwrap(), Some(2));

    let moved = move_question(&store, &quiz.id, &q[2].id, 0).unwrap();
    assert_eq!(moved.question_ids, vec![q[2].id.clone(), q[0].id.clone(), q[1].id.clone()]);

    // Past the end clamps to the end.
    let moved = move_question(&store, &quiz.id, &q[2].id, 99).unwrap();
    assert_eq!(moved.question_ids, vec![q[0].id.clone(), q[1].id.clone(), q[2].id.clone()]);
    assert_eq!(question_id_at(&store, &quiz.id, 1).unwrap(), Some(q[1].id.clone()));
    assert_eq!(question_id_at(&store, &quiz.id, 9).unwrap(), None);
}

#[test]
fn test_move_of_foreign_question_is_rejected() {
    let store = Store::in_memory().unwrap();
    let mine = add_quiz(&store, Some("Mine")).unwrap();
    let theirs = add_quiz(&store, Some("Theirs")).unwrap();
    let foreign = add_question(&store, &theirs.id, titled("x")).unwrap();

    let err = move_question(&store, &mine.id, &foreign.id, 0).unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "question_ids", .. }));
}

#[test]
fn test_add_question_to_missing_quiz_writes_nothing() {
    let store = Store::in_memory().unwrap();
    assert!(add_question(&store, "missing", titled("orphan")).is_err());
    assert!(store.all::<Question>().unwrap().is_empty());
}

#[test]
fn test_set_option_pads_slots() {
    let store = Store::in_memory().unwrap();
    let quiz = add_quiz(&store, None).unwrap();
    let question = add_question(&store, &quiz.id, titled("Capital of France?")).unwrap();

    let question = set_option(&store, &question.id, 1, "Paris").unwrap();
    assert_eq!(question.options.len(), MIN_OPTION_SLOTS);
    assert_eq!(question.options[1], "Paris");
    assert!(question.options[0].is_empty());

    let question = set_option(&store, &question.id, 4, "Lyon").unwrap();
    assert_eq!(question.options.len(), 5);
    assert_eq!(question.options[1], "Paris");

    // Only the slot right after the last one may be appended.
    let err = set_option(&store, &question.id, 6, "Nice").unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "options", .. }));
    let err = set_option(&store, &question.id, usize::MAX, "Nice").unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "options", .. }));
    assert_eq!(store.get::<Question>(&question.id).unwrap().unwrap().options.len(), 5);

    let question = set_correct_option(&store, &question.id, Some(1)).unwrap();
    assert_eq!(question.correct_option_index, Some(1));
}

#[test]
fn test_delete_question_keeps_play_order_of_the_rest() {
    let store = Store::in_memory().unwrap();
    let quiz = add_quiz(&store, None).unwrap();
    let a = add_question(&store, &quiz.id, titled("a")).unwrap();
    let b = add_question(&store, &quiz.id, titled("b")).unwrap();
    let c = add_question(&store, &quiz.id, titled("c")).unwrap();

    assert!(delete_question(&store, &b.id).unwrap());
    assert!(!delete_question(&store, &b.id).unwrap());
    assert_eq!(question_index(&store, &quiz.id, &c.id).unwrap(), Some(1));
    assert_eq!(question_index(&store, &quiz.id, &a.id).unwrap(), Some(0));
}

#[test]
fn test_delete_quiz_cascades_to_questions() {
    let store = Store::in_memory().unwrap();
    let keep = add_quiz(&store, Some("Keep")).unwrap();
    let kept = add_question(&store, &keep.id, titled("stays")).unwrap();
    let doomed = add_quiz(&store, Some("Doomed")).unwrap();
    for t in ["x", "y"] {
        add_question(&store, &doomed.id, titled(t)).unwrap();
    }

    assert!(delete_quiz(&store, &doomed.id).unwrap());
    let remaining = store.all::<Question>().unwrap();
    assert_eq!(remaining, vec![kept]);
}

#[test]
fn test_delete_player_detaches_from_rounds() {
    let store = Store::in_memory().unwrap();
    let quiz = add_quiz(&store, None).unwrap();
    let ada = add_player(
        &store,
        NewPlayer {
            name: "Ada".into(),
            ..Default::default()
        },
    )
    .unwrap();
    let bob = add_player(
        &store,
        NewPlayer {
            name: "Bob".into(),
            ..Default::default()
        },
    )
    .unwrap();
    let round = add_round(&store, &quiz.id, vec![ada.id.clone(), bob.id.clone()]).unwrap();

    assert!(delete_player(&store, &ada.id).unwrap());
    let round = store.get::<Round>(&round.id).unwrap().unwrap();
    assert_eq!(round.participant_ids, vec![bob.id]);
}

#[test]
fn test_round_progress_and_points() {
    let store = Store::in_memory().unwrap();
    let quiz = add_quiz(&store, None).unwrap();
    let question = add_question(&store, &quiz.id, titled("q")).unwrap();
    let ada = add_player(
        &store,
        NewPlayer {
            name: "Ada".into(),
            ..Default::default()
        },
    )
    .unwrap();
    let round = add_round(&store, &quiz.id, vec![ada.id.clone()]).unwrap();
    assert_eq!(round.question_reached_index, 0);
    assert!(!round.completed);

    let round = set_question_reached(&store, &round.id, 1).unwrap();
    assert_eq!(round.question_reached_index, 1);

    let first = add_point(&store, &round.id, &question.id, &ada.id).unwrap();
    let second = add_point(&store, &round.id, &question.id, &ada.id).unwrap();
    assert!(second.id > first.id);

    let removed = remove_point(&store, &round.id, &question.id, &ada.id).unwrap();
    assert_eq!(removed.map(|p| p.id), Some(second.id));
    assert_eq!(store.all::<PointEvent>().unwrap(), vec![first]);

    remove_point(&store, &round.id, &question.id, &ada.id).unwrap();
    assert_eq!(remove_point(&store, &round.id, &question.id, &ada.id).unwrap(), None);

    assert!(complete_round(&store, &round.id).unwrap().completed);
}

#[test]
fn test_points_need_existing_references() {
    let store = Store::in_memory().unwrap();
    let quiz = add_quiz(&store, None).unwrap();
    let question = add_question(&store, &quiz.id, titled("q")).unwrap();
    let round = add_round(&store, &quiz.id, Vec::new()).unwrap();

    let err = add_point(&store, &round.id, &question.id, "nobody").unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "player_id", .. }));
}

#[test]
fn test_questions_live_follows_play_order() {
    let store = Store::in_memory().unwrap();
    let engine = LiveEngine::new(&store).unwrap();
    let quiz = add_quiz(&store, None).unwrap();
    let a = add_question(&store, &quiz.id, titled("a")).unwrap();

    let live = questions_live(&engine, &quiz.id).unwrap();
    let wait = Duration::from_secs(5);
    let titles = |qs: Vec<Question>| qs.into_iter().map(|q| q.title).collect::<Vec<_>>();
    assert_eq!(titles(live.recv_timeout(wait).unwrap().unwrap()), vec!["a"]);

    let b = add_question(&store, &quiz.id, titled("b")).unwrap();
    assert_eq!(titles(live.recv_timeout(wait).unwrap().unwrap()), vec!["a", "b"]);

    move_question(&store, &quiz.id, &b.id, 0).unwrap();
    assert_eq!(titles(live.recv_timeout(wait).unwrap().unwrap()), vec!["b", "a"]);

    delete_question(&store, &a.id).unwrap();
    assert_eq!(titles(live.recv_timeout(wait).unwrap().unwrap()), vec!["b"]);
}
