//! Referential integrity: reference checks on write and delete cascades.
//!
//! Both run inside the caller's transaction, so their effects commit or roll back with it.
//! A check that needs a table outside the transaction scope is skipped for create (the
//! scope decides how strict a create is) but required for list rewrites, which must never
//! point at foreign questions.

use crate::core::error::StoreError;
use crate::core::model::{Key, PointEvent, Question, Quiz, QuizPatch, Record, Round, RoundPatch};
use crate::core::query::Query;
use crate::core::schema::{Field, TableName};
use crate::core::store::{Reads, Tx};

pub(crate) fn check_references(
    tx: &Tx<'_>,
    before: Option<&Record>,
    after: &Record,
) -> Result<(), StoreError> {
    match after {
        Record::Quiz(quiz) => {
            let unchanged = matches!(
                before,
                Some(Record::Quiz(old)) if old.question_ids == quiz.question_ids
            );
            if unchanged || quiz.question_ids.is_empty() {
                return Ok(());
            }
            if !tx.in_scope(TableName::Question) {
                return Err(StoreError::validation(
                    TableName::Quiz,
                    Some(&quiz.id),
                    "question_ids",
                    "question table must be part of the transaction to change the question list",
                ));
            }
            for question_id in &quiz.question_ids {
                match tx.get::<Question>(question_id)? {
                    Some(q) if q.quiz_id == quiz.id => {}
                    Some(q) => {
                        return Err(StoreError::validation(
                            TableName::Quiz,
                            Some(&quiz.id),
                            "question_ids",
                            format!("question {question_id} belongs to quiz {}", q.quiz_id),
                        ));
                    }
                    None => {
                        return Err(StoreError::validation(
                            TableName::Quiz,
                            Some(&quiz.id),
                            "question_ids",
                            format!("question {question_id} does not exist"),
                        ));
                    }
                }
            }
            Ok(())
        }
        Record::Question(question) => {
            if before.is_none() {
                require_row(tx, after, TableName::Quiz, &question.quiz_id, "quiz_id")?;
            }
            Ok(())
        }
        Record::Round(round) => {
            if before.is_none() {
                require_row(tx, after, TableName::Quiz, &round.quiz_id, "quiz_id")?;
            }
            let participants_changed = !matches!(
                before,
                Some(Record::Round(old)) if old.participant_ids == round.participant_ids
            );
            if participants_changed {
                for player_id in &round.participant_ids {
                    require_row(tx, after, TableName::Player, player_id, "participant_ids")?;
                }
            }
            Ok(())
        }
        Record::PointEvent(point) => {
            require_row(tx, after, TableName::Round, &point.round_id, "round_id")?;
            require_row(tx, after, TableName::Question, &point.question_id, "question_id")?;
            require_row(tx, after, TableName::Player, &point.player_id, "player_id")?;
            Ok(())
        }
        Record::Player(_) => Ok(()),
    }
}

/// Fails when `target` is in scope and has no row `key`. Out-of-scope targets are not checked.
fn require_row(
    tx: &Tx<'_>,
    owner: &Record,
    target: TableName,
    key: &str,
    field: &'static str,
) -> Result<(), StoreError> {
    if !tx.in_scope(target) {
        return Ok(());
    }
    if tx.read_record(target, &Key::from(key))?.is_none() {
        return Err(StoreError::validation(
            owner.table(),
            Some(&owner.key().to_string()),
            field,
            format!("{target} {key} does not exist"),
        ));
    }
    Ok(())
}

/// Secondary writes that keep references intact once `record` is gone.
pub(crate) fn cascade_delete(tx: &mut Tx<'_>, record: &Record) -> Result<(), StoreError> {
    match record {
        Record::Quiz(quiz) => {
            tx.require_scope(TableName::Question)?;
            let query = Query::on::<Question>()
                .eq(Field::QuizId, &quiz.id)
                .build()?;
            for question in tx.query::<Question>(&query)? {
                tx.remove_row(TableName::Question, Key::Id(question.id));
            }
            Ok(())
        }
        Record::Question(question) => {
            tx.require_scope(TableName::Quiz)?;
            let Some(quiz) = tx.get::<Quiz>(&question.quiz_id)? else {
                return Ok(());
            };
            if quiz.question_ids.contains(&question.id) {
                let remaining = quiz
                    .question_ids
                    .iter()
                    .filter(|id| **id != question.id)
                    .cloned()
                    .collect();
                tx.update::<Quiz>(&quiz.id, [QuizPatch::QuestionIds(remaining)])?;
            }
            Ok(())
        }
        Record::Round(round) => {
            tx.require_scope(TableName::PointEvent)?;
            let query = Query::on::<PointEvent>()
                .eq(Field::RoundId, &round.id)
                .build()?;
            for point in tx.query::<PointEvent>(&query)? {
                tx.remove_row(TableName::PointEvent, Key::Seq(point.id));
            }
            Ok(())
        }
        Record::Player(player) => {
            tx.require_scope(TableName::Round)?;
            let query = Query::on::<Round>()
                .eq(Field::ParticipantIds, &player.id)
                .build()?;
            for round in tx.query::<Round>(&query)? {
                let remaining = round
                    .participant_ids
                    .iter()
                    .filter(|id| **id != player.id)
                    .cloned()
                    .collect();
                tx.update::<Round>(&round.id, [RoundPatch::ParticipantIds(remaining)])?;
            }
            Ok(())
        }
        Record::PointEvent(_) => Ok(()),
    }
}
