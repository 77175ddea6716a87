//! Score aggregation: per-player cumulative score series for one round.
//!
//! The live pipeline joins three branches and recomputes the whole series whenever any of
//! them moves:
//! - participants: the round's `participant_ids`, switched into a join of player queries,
//! - questions: the round's quiz, resolved to its questions in play order,
//! - points: every point event of the round, reduced to per (question, player) counts.

use crate::core::error::StoreError;
use crate::core::model::{Player, PointEvent, Question, Round};
use crate::core::store::Reads;
use crate::live::{Live, LiveEngine, join_all, join3, switch_on_key};
use crate::plugins::{player, point, question};
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Points per `(question_id, player_id)`.
pub type Tally = FxHashMap<(String, String), u32>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScorePoint {
    pub question_id: String,
    pub title: String,
    /// Points scored on this question.
    pub points: u32,
    /// Running total up to and including this question.
    pub cumulative: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSeries {
    pub player_id: String,
    pub name: String,
    pub score: u32,
    pub data: Vec<ScorePoint>,
}

pub fn tally_points(points: &[PointEvent]) -> Tally {
    let mut tally = Tally::default();
    for point in points {
        *tally
            .entry((point.question_id.clone(), point.player_id.clone()))
            .or_default() += 1;
    }
    tally
}

/// Build the series for `players` over `questions` in play order.
///
/// Questions a player has no point on are skipped rather than zero-filled. With no points at
/// all the result is empty.
pub fn compute_series(players: &[Player], questions: &[Question], tally: &Tally) -> Vec<PlayerSeries> {
    if tally.is_empty() {
        return Vec::new();
    }
    players
        .iter()
        .map(|player| {
            let mut cumulative = 0;
            let mut data = Vec::new();
            for question in questions {
                let key = (question.id.clone(), player.id.clone());
                let Some(&points) = tally.get(&key) else {
                    continue;
                };
                cumulative += points;
                data.push(ScorePoint {
                    question_id: question.id.clone(),
                    title: question.title.clone(),
                    points,
                    cumulative,
                });
            }
            PlayerSeries {
                player_id: player.id.clone(),
                name: player.name.clone(),
                score: data.last().map_or(0, |p| p.cumulative),
                data,
            }
        })
        .collect()
}

/// Live score series for a round, recomputed on every relevant commit.
///
/// An unknown round surfaces as an `Evaluation` error item.
pub fn score_series(engine: &LiveEngine, round_id: &str) -> Result<Live<Vec<PlayerSeries>>, StoreError> {
    let players = participants_live(engine, round_id)?;
    let questions = round_questions_live(engine, round_id)?;
    let tally = point::round_points_live(engine, round_id)?.map(|points| Ok(tally_points(&points)))?;

    join3(players, questions, tally)?
        .map(|(players, questions, tally)| Ok(compute_series(&players, &questions, &tally)))
}

/// One-shot scoreboard: the first complete result, after which everything is torn down.
pub fn score_snapshot(engine: &LiveEngine, round_id: &str) -> Result<Vec<PlayerSeries>, StoreError> {
    score_series(engine, round_id)?.first()
}

/// The round's participants as player records, in participant order. Ids whose player no
/// longer exists are left out.
fn participants_live(engine: &LiveEngine, round_id: &str) -> Result<Live<Vec<Player>>, StoreError> {
    let id = round_id.to_string();
    let ids: Live<Vec<String>> = engine
        .register(&format!("participants:{round_id}"), move |r| {
            Ok(r.require::<Round>(&id)?.participant_ids)
        })?
        .into();

    let engine = engine.clone();
    switch_on_key(ids, move |ids: &Vec<String>| {
        let lives = ids
            .iter()
            .map(|id| player::player_live(&engine, id))
            .collect::<Result<Vec<_>, _>>()?;
        join_all(lives)?.map(|players| Ok(players.into_iter().flatten().collect()))
    })
}

fn round_questions_live(engine: &LiveEngine, round_id: &str) -> Result<Live<Vec<Question>>, StoreError> {
    let id = round_id.to_string();
    let live = engine.register(&format!("round-questions:{round_id}"), move |r| {
        let round = r.require::<Round>(&id)?;
        question::ordered_questions(r, &round.quiz_id)
    })?;
    Ok(live.into())
}
