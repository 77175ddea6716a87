use quizbase::core::error::StoreError;
use quizbase::core::model::{NewPlayer, NewQuestion, Player, PointEvent, Question, Quiz, Round};
use quizbase::core::schema::TableName;
use quizbase::core::store::Store;
use quizbase::plugins::archive::{
    ARCHIVE_FORMAT, ImportMode, export_archive, export_to_path, import_archive, import_from_path,
};
use quizbase::plugins::player::add_player;
use quizbase::plugins::point::add_point;
use quizbase::plugins::question::add_question;
use quizbase::plugins::quiz::add_quiz;
use quizbase::plugins::round::add_round;
use tempfile::tempdir;

/// A small but complete store: every table has rows.
fn populated() -> Store {
    let store = Store::in_memory().unwrap();
    let quiz = add_quiz(&store, Some("Archive night")).unwrap();
    let questions: Vec<Question> = ["one", "two"]
        .iter()
        .map(|t| {
            let new = NewQuestion {
                title: t.to_string(),
                options: vec!["a".into(), "b".into()],
                correct_option_index: Some(1),
                ..Default::default()
            };
            add_question(&store, &quiz.id, new).unwrap()
        })
        .collect();
    let ada = add_player(
        &store,
        NewPlayer {
            name: "Ada".into(),
            photo: Some("data:image/png;base64,AAAA".into()),
            background_color: "#ff0000".into(),
        },
    )
    .unwrap();
    let round = add_round(&store, &quiz.id, vec![ada.id.clone()]).unwrap();
    for question in &questions {
        add_point(&store, &round.id, &question.id, &ada.id).unwrap();
    }
    store
}

fn export_bytes(store: &Store) -> Vec<u8> {
    let mut out = Vec::new();
    export_archive(store, &mut out).unwrap();
    out
}

#[test]
fn test_round_trip_preserves_every_record() {
    let source = populated();
    let bytes = export_bytes(&source);

    let target = Store::in_memory().unwrap();
    let summary = import_archive(&target, &bytes[..], ImportMode::RequireEmpty).unwrap();
    assert_eq!(summary.total(), 1 + 2 + 1 + 1 + 2);
    assert_eq!(summary.counts[&TableName::PointEvent], 2);

    assert_eq!(target.all::<Quiz>().unwrap(), source.all::<Quiz>().unwrap());
    assert_eq!(target.all::<Question>().unwrap(), source.all::<Question>().unwrap());
    assert_eq!(target.all::<Player>().unwrap(), source.all::<Player>().unwrap());
    assert_eq!(target.all::<Round>().unwrap(), source.all::<Round>().unwrap());
    assert_eq!(
        target.all::<PointEvent>().unwrap(),
        source.all::<PointEvent>().unwrap()
    );

    // Re-export of the copy hashes identically.
    let again = export_bytes(&target);
    let digest = |bytes: &[u8]| {
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        text.lines().last().unwrap().to_string()
    };
    assert_eq!(digest(&again), digest(&bytes));
}

#[test]
fn test_imported_sequence_keys_continue() {
    let source = populated();
    let bytes = export_bytes(&source);
    let target = Store::in_memory().unwrap();
    import_archive(&target, &bytes[..], ImportMode::default()).unwrap();

    let round = &target.all::<Round>().unwrap()[0];
    let question = &target.all::<Question>().unwrap()[0];
    let point = add_point(&target, &round.id, &question.id, &round.participant_ids[0]).unwrap();
    assert_eq!(point.id, 3);
}

#[test]
fn test_import_requires_empty_store_by_default() {
    let bytes = export_bytes(&populated());
    let target = populated();
    let before = target.version().unwrap();

    let err = import_archive(&target, &bytes[..], ImportMode::RequireEmpty).unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "archive", .. }));
    assert_eq!(target.version().unwrap(), before);
}

#[test]
fn test_replace_swaps_contents_atomically() {
    let source = populated();
    let bytes = export_bytes(&source);

    let target = Store::in_memory().unwrap();
    add_quiz(&target, Some("Will be replaced")).unwrap();
    import_archive(&target, &bytes[..], ImportMode::Replace).unwrap();

    let names: Vec<String> = target.all::<Quiz>().unwrap().into_iter().map(|q| q.name).collect();
    assert_eq!(names, vec!["Archive night"]);
}

#[test]
fn test_tampered_archive_is_rejected_without_writes() {
    let bytes = export_bytes(&populated());
    let text = String::from_utf8(bytes).unwrap();
    let tampered = text.replacen("Archive night", "Archive nite", 1);

    let target = Store::in_memory().unwrap();
    let err = import_archive(&target, tampered.as_bytes(), ImportMode::RequireEmpty).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation { ref reason, .. } if reason.contains("digest")
    ));
    assert!(target.all::<Quiz>().unwrap().is_empty());
    assert!(target.all::<PointEvent>().unwrap().is_empty());
}

#[test]
fn test_truncated_archive_is_rejected() {
    let bytes = export_bytes(&populated());
    let text = String::from_utf8(bytes).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    let truncated = lines[..lines.len() - 1].join("\n");

    let target = Store::in_memory().unwrap();
    let err = import_archive(&target, truncated.as_bytes(), ImportMode::RequireEmpty).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation { ref reason, .. } if reason.contains("trailer")
    ));
    assert!(target.all::<Player>().unwrap().is_empty());
}

#[test]
fn test_foreign_format_is_rejected() {
    let header = r#"{"format":"something-else","version":1,"exported_at":0,"snapshot_version":0,"tables":[]}"#;
    let target = Store::in_memory().unwrap();
    assert!(import_archive(&target, header.as_bytes(), ImportMode::RequireEmpty).is_err());
}

#[test]
fn test_export_and_import_through_files() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("backups").join("night.jsonl");

    let source = populated();
    let exported = export_to_path(&source, &path).unwrap();
    let header = std::fs::read_to_string(&path).unwrap();
    assert!(header.lines().next().unwrap().contains(ARCHIVE_FORMAT));

    let target = Store::in_memory().unwrap();
    let imported = import_from_path(&target, &path, ImportMode::RequireEmpty).unwrap();
    assert_eq!(imported, exported);
}
