//! quizbase: a local-first quiz data layer.
//!
//! A small transactional store for quizzes, questions, players, rounds and point events,
//! a live-query engine that keeps derived views current as writes commit, and a score
//! pipeline built by composing live queries.
//!
//! # Architecture
//!
//! ## The Thin Waist
//!
//! Every mutation goes through [`core::store::Store::transaction`]:
//! - per-table locks, taken in table order
//! - one atomic batch to the durable medium (SQLite or memory)
//! - one snapshot swap, then one notification through the commit broker
//! - optional audit logging (`broker.events.jsonl`)
//!
//! ## Live Queries
//!
//! [`live::LiveEngine`] re-runs a registered query only when a commit touches a key or
//! predicate its last evaluation read. [`live::compose`] combines result streams
//! (`join_all`, `switch_on_key`, `first`) and propagates teardown down every chain.
//!
//! # Crate Structure
//!
//! - [`core`]: store, medium, broker, schema and records
//! - [`live`]: live-query engine and composition operators
//! - [`plugins`]: quiz, question, player, round, point, scores and archive clients

pub mod core;
pub mod live;
pub mod plugins;

mod cli;

use crate::cli::{Cli, Command, ScoresCli, UpdateCli};
use crate::core::config::load_config;
use crate::core::error::StoreError;
use crate::core::model::{Player, PlayerPatch, Question, QuestionPatch, Quiz, QuizPatch, Record};
use crate::core::model::{Round, RoundPatch};
use crate::core::schema::TableName;
use crate::core::store::Store;
use crate::live::LiveEngine;
use crate::plugins::archive::{self, ImportMode};
use crate::plugins::scores::{self, PlayerSeries};
use crate::plugins::{player, question, quiz, round};

use clap::Parser;
use serde::de::DeserializeOwned;
use tracing::info;

pub fn run() -> Result<(), StoreError> {
    let cli = Cli::parse();
    let config = load_config(&cli.data_dir)?;
    let store = Store::open(&config)?;
    info!(data_dir = %cli.data_dir.display(), "quizbase started");

    let result = dispatch(&store, cli.command);
    let closed = store.close();
    result.and(closed)
}

fn dispatch(store: &Store, command: Command) -> Result<(), StoreError> {
    use colored::Colorize;

    match command {
        Command::Quiz(cli) => quiz::run_quiz_cli(store, cli),
        Command::Question(cli) => question::run_question_cli(store, cli),
        Command::Player(cli) => player::run_player_cli(store, cli),
        Command::Round(cli) => round::run_round_cli(store, cli),
        Command::Scores(cli) => run_scores(store, &cli),
        Command::Export(cli) => {
            let summary = archive::export_to_path(store, &cli.out)?;
            println!(
                "{} {} records to {}",
                "exported".green(),
                summary.total(),
                cli.out.display()
            );
            Ok(())
        }
        Command::Import(cli) => {
            let mode = if cli.replace {
                ImportMode::Replace
            } else {
                ImportMode::RequireEmpty
            };
            let summary = archive::import_from_path(store, &cli.input, mode)?;
            println!("{} {} records", "imported".green(), summary.total());
            Ok(())
        }
        Command::Update(cli) => {
            let record = apply_json_patch(store, &cli)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
    }
}

fn run_scores(store: &Store, cli: &ScoresCli) -> Result<(), StoreError> {
    let engine = LiveEngine::new(store)?;
    if !cli.watch {
        let series = scores::score_snapshot(&engine, &cli.round)?;
        return print_scores(&series, &cli.format);
    }
    let live = scores::score_series(&engine, &cli.round)?;
    loop {
        let series = live.recv()?;
        print_scores(&series, &cli.format)?;
    }
}

fn print_scores(series: &[PlayerSeries], format: &str) -> Result<(), StoreError> {
    use colored::Colorize;

    if format == "json" {
        println!("{}", serde_json::to_string(series)?);
        return Ok(());
    }
    if series.is_empty() {
        println!("{}", "no points yet".dimmed());
        return Ok(());
    }
    let mut ranked: Vec<&PlayerSeries> = series.iter().collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    for entry in ranked {
        let trail: Vec<String> = entry.data.iter().map(|p| p.cumulative.to_string()).collect();
        println!(
            "{:>4}  {}  {}",
            entry.score.to_string().bold(),
            entry.name,
            trail.join(" → ").dimmed()
        );
    }
    Ok(())
}

/// Accept one patch object or an array of them.
fn parse_patches<P: DeserializeOwned>(json: &str) -> Result<Vec<P>, StoreError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let patches = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        single => vec![serde_json::from_value(single)?],
    };
    Ok(patches)
}

fn apply_json_patch(store: &Store, cli: &UpdateCli) -> Result<Record, StoreError> {
    let table = TableName::parse(&cli.table).ok_or_else(|| {
        StoreError::Config(format!("unknown table `{}`", cli.table))
    })?;
    let id = cli.id.as_str();
    let record = match table {
        TableName::Quiz => {
            Record::Quiz(store.update::<Quiz>(id, parse_patches::<QuizPatch>(&cli.patch)?)?)
        }
        TableName::Question => Record::Question(
            store.update::<Question>(id, parse_patches::<QuestionPatch>(&cli.patch)?)?,
        ),
        TableName::Player => Record::Player(
            store.update::<Player>(id, parse_patches::<PlayerPatch>(&cli.patch)?)?,
        ),
        TableName::Round => {
            Record::Round(store.update::<Round>(id, parse_patches::<RoundPatch>(&cli.patch)?)?)
        }
        TableName::PointEvent => {
            return Err(StoreError::validation(
                table,
                Some(id),
                "id",
                "point events are append-only",
            ));
        }
    };
    Ok(record)
}
