//! Rounds: one playthrough of a quiz by a set of players.

use crate::core::error::StoreError;
use crate::core::model::{NewRound, Round, RoundPatch};
use crate::core::query::Query;
use crate::core::schema::Field;
use crate::core::store::{Reads, Store};
use crate::live::{Live, LiveEngine};
use crate::plugins::point;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(name = "round", about = "Run rounds and record points.")]
pub struct RoundCli {
    #[clap(subcommand)]
    pub command: RoundCommand,
}

#[derive(Subcommand, Debug)]
pub enum RoundCommand {
    /// Start a round of a quiz.
    Start {
        #[clap(long)]
        quiz: String,
        /// Participating player id; repeat for several.
        #[clap(long = "player")]
        players: Vec<String>,
    },
    /// List the rounds of a quiz, newest first.
    List {
        #[clap(long)]
        quiz: String,
    },
    /// Record one point.
    Point {
        #[clap(long)]
        round: String,
        #[clap(long)]
        question: String,
        #[clap(long)]
        player: String,
        /// Remove the latest matching point instead of adding one.
        #[clap(long)]
        undo: bool,
    },
    /// Advance the progress marker.
    Reach {
        #[clap(value_name = "ID")]
        id: String,
        #[clap(value_name = "INDEX")]
        index: usize,
    },
    /// Mark a round as completed.
    Complete {
        #[clap(value_name = "ID")]
        id: String,
    },
}

/// Start a round. Quiz and every participant must exist.
pub fn add_round(
    store: &Store,
    quiz_id: &str,
    participant_ids: Vec<String>,
) -> Result<Round, StoreError> {
    store.create::<Round>(NewRound {
        quiz_id: quiz_id.to_string(),
        participant_ids,
    })
}

pub fn set_question_reached(store: &Store, id: &str, index: usize) -> Result<Round, StoreError> {
    store.update::<Round>(id, [RoundPatch::QuestionReachedIndex(index)])
}

pub fn complete_round(store: &Store, id: &str) -> Result<Round, StoreError> {
    store.update::<Round>(id, [RoundPatch::Completed(true)])
}

/// Deletes the round together with its point events.
pub fn delete_round(store: &Store, id: &str) -> Result<bool, StoreError> {
    store.delete::<Round>(id)
}

fn quiz_rounds(reads: &impl Reads, quiz_id: &str) -> Result<Vec<Round>, StoreError> {
    let query = Query::on::<Round>().eq(Field::QuizId, quiz_id).build()?;
    let mut rounds = reads.query::<Round>(&query)?;
    rounds.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    Ok(rounds)
}

/// Rounds of a quiz, newest first.
pub fn rounds_live(engine: &LiveEngine, quiz_id: &str) -> Result<Live<Vec<Round>>, StoreError> {
    let quiz_id = quiz_id.to_string();
    let label = format!("rounds:{quiz_id}");
    let query = engine.register(&label, move |r| quiz_rounds(r, &quiz_id))?;
    Ok(query.into())
}

pub fn round_live(engine: &LiveEngine, id: &str) -> Result<Live<Option<Round>>, StoreError> {
    let id = id.to_string();
    let query = engine.register(&format!("round:{id}"), move |r| r.get::<Round>(&id))?;
    Ok(query.into())
}

pub fn run_round_cli(store: &Store, cli: RoundCli) -> Result<(), StoreError> {
    use colored::Colorize;

    match cli.command {
        RoundCommand::Start { quiz, players } => {
            let round = add_round(store, &quiz, players)?;
            println!(
                "{} {} ({} players)",
                "started".green(),
                round.id.bold(),
                round.participant_ids.len()
            );
        }
        RoundCommand::List { quiz } => {
            for round in quiz_rounds(&*store.snapshot()?, &quiz)? {
                let status = if round.completed {
                    "completed".green()
                } else {
                    format!("at question {}", round.question_reached_index + 1).yellow()
                };
                println!("{}  {}  {}", round.id.bold(), status, round.participant_ids.join(", "));
            }
        }
        RoundCommand::Point {
            round,
            question,
            player,
            undo,
        } => {
            if undo {
                match point::remove_point(store, &round, &question, &player)? {
                    Some(removed) => println!("{} point #{}", "removed".yellow(), removed.id),
                    None => println!("{}", "no point to remove".dimmed()),
                }
            } else {
                let added = point::add_point(store, &round, &question, &player)?;
                println!("{} point #{}", "added".green(), added.id);
            }
        }
        RoundCommand::Reach { id, index } => {
            let round = set_question_reached(store, &id, index)?;
            println!(
                "{} {} at question {}",
                "updated".green(),
                round.id.bold(),
                round.question_reached_index + 1
            );
        }
        RoundCommand::Complete { id } => {
            let round = complete_round(store, &id)?;
            println!("{} {}", "completed".green(), round.id.bold());
        }
    }
    Ok(())
}
