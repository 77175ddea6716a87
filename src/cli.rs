//! CLI struct definitions for the quizbase command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`; each plugin owns the
//! argument types of its own command group.

use crate::plugins::{player, question, quiz, round};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "quizbase",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local-first quiz data store with live scoreboards."
)]
pub(crate) struct Cli {
    /// Data directory holding quizbase.toml, the database and the audit log.
    #[clap(long, env = "QUIZBASE_DATA_DIR", default_value = ".quizbase", global = true)]
    pub data_dir: PathBuf,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ScoresCli {
    /// Round to score.
    #[clap(long)]
    pub round: String,
    /// Keep printing the scoreboard as points come in.
    #[clap(long)]
    pub watch: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ExportCli {
    /// Archive file to write.
    #[clap(long)]
    pub out: PathBuf,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ImportCli {
    /// Archive file to read.
    #[clap(long)]
    pub input: PathBuf,
    /// Replace the current contents instead of requiring an empty store.
    #[clap(long)]
    pub replace: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct UpdateCli {
    /// Table name: quiz, question, player or round.
    #[clap(value_name = "TABLE")]
    pub table: String,
    #[clap(value_name = "ID")]
    pub id: String,
    /// One patch or an array of patches, e.g. '{"field":"name","value":"Finals"}'.
    #[clap(value_name = "JSON")]
    pub patch: String,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Quizzes.
    Quiz(quiz::QuizCli),
    /// Questions and play order.
    Question(question::QuestionCli),
    /// Players.
    Player(player::PlayerCli),
    /// Rounds and points.
    Round(round::RoundCli),
    /// Scoreboard for a round.
    Scores(ScoresCli),
    /// Write the whole store to an archive.
    Export(ExportCli),
    /// Restore an archive in one transaction.
    Import(ImportCli),
    /// Apply a JSON patch to one record.
    Update(UpdateCli),
}
