use crate::core::error::StoreError;
use crate::core::model::{NewQuiz, Quiz, QuizPatch};
use crate::core::store::{Reads, Store};
use crate::live::{Live, LiveEngine};
use clap::{Parser, Subcommand};

pub const DEFAULT_QUIZ_NAME: &str = "New Quiz";

#[derive(Parser, Debug)]
#[clap(name = "quiz", about = "Create, list, rename and delete quizzes.")]
pub struct QuizCli {
    #[clap(subcommand)]
    pub command: QuizCommand,
}

#[derive(Subcommand, Debug)]
pub enum QuizCommand {
    /// Create a quiz.
    Add {
        /// Quiz name (defaults to "New Quiz")
        #[clap(value_name = "NAME")]
        name: Option<String>,
    },
    /// List quizzes, most recently edited first.
    List,
    /// Rename a quiz.
    Rename {
        #[clap(value_name = "ID")]
        id: String,
        #[clap(value_name = "NAME")]
        name: String,
    },
    /// Delete a quiz and its questions.
    Delete {
        #[clap(value_name = "ID")]
        id: String,
    },
}

pub fn add_quiz(store: &Store, name: Option<&str>) -> Result<Quiz, StoreError> {
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_QUIZ_NAME);
    store.create::<Quiz>(NewQuiz {
        name: name.to_string(),
    })
}

pub fn rename_quiz(store: &Store, id: &str, name: &str) -> Result<Quiz, StoreError> {
    store.update::<Quiz>(id, [QuizPatch::Name(name.to_string())])
}

/// Deletes the quiz and every question that belongs to it. Absent ids are a no-op.
pub fn delete_quiz(store: &Store, id: &str) -> Result<bool, StoreError> {
    store.delete::<Quiz>(id)
}

fn by_recent_edit(mut quizzes: Vec<Quiz>) -> Vec<Quiz> {
    quizzes.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    quizzes
}

pub fn list_quizzes(store: &Store) -> Result<Vec<Quiz>, StoreError> {
    Ok(by_recent_edit(store.all::<Quiz>()?))
}

/// All quizzes, most recently updated first.
pub fn quizzes_live(engine: &LiveEngine) -> Result<Live<Vec<Quiz>>, StoreError> {
    let query = engine.register("quizzes", |r| Ok(by_recent_edit(r.all::<Quiz>()?)))?;
    Ok(query.into())
}

pub fn quiz_live(engine: &LiveEngine, id: &str) -> Result<Live<Option<Quiz>>, StoreError> {
    let id = id.to_string();
    let query = engine.register(&format!("quiz:{id}"), move |r| r.get::<Quiz>(&id))?;
    Ok(query.into())
}

/// Position of `question_id` in the quiz's play order.
pub fn question_index(
    store: &Store,
    quiz_id: &str,
    question_id: &str,
) -> Result<Option<usize>, StoreError> {
    let quiz = store.snapshot()?.require::<Quiz>(quiz_id)?;
    Ok(quiz.question_ids.iter().position(|id| id == question_id))
}

pub fn question_id_at(
    store: &Store,
    quiz_id: &str,
    index: usize,
) -> Result<Option<String>, StoreError> {
    let quiz = store.snapshot()?.require::<Quiz>(quiz_id)?;
    Ok(quiz.question_ids.get(index).cloned())
}

pub fn run_quiz_cli(store: &Store, cli: QuizCli) -> Result<(), StoreError> {
    use colored::Colorize;

    match cli.command {
        QuizCommand::Add { name } => {
            let quiz = add_quiz(store, name.as_deref())?;
            println!("{} {} {}", "created".green(), quiz.id.bold(), quiz.name);
        }
        QuizCommand::List => {
            let quizzes = list_quizzes(store)?;
            if quizzes.is_empty() {
                println!("{}", "no quizzes".dimmed());
            }
            for quiz in quizzes {
                println!(
                    "{}  {}  {}",
                    quiz.id.bold(),
                    quiz.name,
                    format!("{} questions", quiz.question_ids.len()).dimmed()
                );
            }
        }
        QuizCommand::Rename { id, name } => {
            let quiz = rename_quiz(store, &id, &name)?;
            println!("{} {} {}", "renamed".green(), quiz.id.bold(), quiz.name);
        }
        QuizCommand::Delete { id } => {
            if delete_quiz(store, &id)? {
                println!("{} {}", "deleted".yellow(), id.bold());
            } else {
                println!("{} {}", "no such quiz".dimmed(), id);
            }
        }
    }
    Ok(())
}
