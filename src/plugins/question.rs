//! Questions and the quiz play order.
//!
//! A question is always created and deleted together with the matching edit of its quiz's
//! `question_ids`, in one transaction over both tables, so the list never points at a
//! missing or foreign question and concurrent inserts cannot lose each other.

use crate::core::error::StoreError;
use crate::core::model::{NewQuestion, Question, QuestionPatch, Quiz, QuizPatch};
use crate::core::schema::TableName;
use crate::core::store::{Reads, Store};
use crate::live::{Live, LiveEngine};
use clap::{Parser, Subcommand};

/// The editor always shows at least this many option slots.
pub const MIN_OPTION_SLOTS: usize = 4;

#[derive(Parser, Debug)]
#[clap(name = "question", about = "Edit the questions of a quiz.")]
pub struct QuestionCli {
    #[clap(subcommand)]
    pub command: QuestionCommand,
}

#[derive(Subcommand, Debug)]
pub enum QuestionCommand {
    /// Append a question to a quiz.
    Add {
        #[clap(long)]
        quiz: String,
        #[clap(value_name = "TITLE")]
        title: String,
        /// Answer option; repeat for several.
        #[clap(long = "option")]
        options: Vec<String>,
        /// Index of the correct option.
        #[clap(long)]
        correct: Option<usize>,
    },
    /// List a quiz's questions in play order.
    List {
        #[clap(long)]
        quiz: String,
    },
    /// Move a question to a new position in its quiz.
    Move {
        #[clap(long)]
        quiz: String,
        #[clap(value_name = "ID")]
        id: String,
        #[clap(value_name = "INDEX")]
        to: usize,
    },
    /// Delete a question.
    Delete {
        #[clap(value_name = "ID")]
        id: String,
    },
}

/// Create a question and append it to its quiz's play order.
pub fn add_question(
    store: &Store,
    quiz_id: &str,
    mut new: NewQuestion,
) -> Result<Question, StoreError> {
    new.quiz_id = quiz_id.to_string();
    store.transaction(
        "question.add",
        &[TableName::Quiz, TableName::Question],
        |tx| {
            let question = tx.create::<Question>(new)?;
            let quiz = tx.require::<Quiz>(quiz_id)?;
            let mut ids = quiz.question_ids;
            ids.push(question.id.clone());
            tx.update::<Quiz>(quiz_id, [QuizPatch::QuestionIds(ids)])?;
            Ok(question)
        },
    )
}

/// Delete a question and drop it from its quiz's play order.
pub fn delete_question(store: &Store, id: &str) -> Result<bool, StoreError> {
    store.delete::<Question>(id)
}

/// Relocate `question_id` to `to_index` (clamped to the end of the list).
pub fn move_question(
    store: &Store,
    quiz_id: &str,
    question_id: &str,
    to_index: usize,
) -> Result<Quiz, StoreError> {
    store.transaction(
        "question.move",
        &[TableName::Quiz, TableName::Question],
        |tx| {
            let quiz = tx.require::<Quiz>(quiz_id)?;
            let mut ids = quiz.question_ids;
            let from = ids.iter().position(|id| id == question_id).ok_or_else(|| {
                StoreError::validation(
                    TableName::Quiz,
                    Some(quiz_id),
                    "question_ids",
                    format!("question {question_id} is not part of this quiz"),
                )
            })?;
            let moved = ids.remove(from);
            ids.insert(to_index.min(ids.len()), moved);
            tx.update::<Quiz>(quiz_id, [QuizPatch::QuestionIds(ids)])
        },
    )
}

/// Explicit replacement of the play order.
pub fn set_question_ids(store: &Store, quiz_id: &str, ids: Vec<String>) -> Result<Quiz, StoreError> {
    store.update::<Quiz>(quiz_id, [QuizPatch::QuestionIds(ids)])
}

pub fn update_question(
    store: &Store,
    id: &str,
    patches: Vec<QuestionPatch>,
) -> Result<Question, StoreError> {
    store.update::<Question>(id, patches)
}

/// Set option `index`, padding the option list with empty slots as needed.
///
/// `index` may address an existing slot or the one right after the last.
pub fn set_option(store: &Store, id: &str, index: usize, text: &str) -> Result<Question, StoreError> {
    store.transaction("question.set_option", &[TableName::Question], |tx| {
        let question = tx.require::<Question>(id)?;
        let mut options = question.options;
        let limit = options.len().max(MIN_OPTION_SLOTS);
        if index > limit {
            return Err(StoreError::validation(
                TableName::Question,
                Some(id),
                "options",
                format!("option {index} is past the next free slot {limit}"),
            ));
        }
        let slots = MIN_OPTION_SLOTS.max(index + 1);
        if options.len() < slots {
            options.resize(slots, String::new());
        }
        options[index] = text.to_string();
        tx.update::<Question>(id, [QuestionPatch::Options(options)])
    })
}

pub fn set_correct_option(
    store: &Store,
    id: &str,
    index: Option<usize>,
) -> Result<Question, StoreError> {
    store.update::<Question>(id, [QuestionPatch::CorrectOptionIndex(index)])
}

/// The quiz's questions in play order. A missing quiz reads as no questions.
pub fn ordered_questions(reads: &impl Reads, quiz_id: &str) -> Result<Vec<Question>, StoreError> {
    let Some(quiz) = reads.get::<Quiz>(quiz_id)? else {
        return Ok(Vec::new());
    };
    let mut questions = Vec::with_capacity(quiz.question_ids.len());
    for id in &quiz.question_ids {
        if let Some(question) = reads.get::<Question>(id)? {
            questions.push(question);
        }
    }
    Ok(questions)
}

pub fn questions_live(engine: &LiveEngine, quiz_id: &str) -> Result<Live<Vec<Question>>, StoreError> {
    let quiz_id = quiz_id.to_string();
    let label = format!("questions:{quiz_id}");
    let query = engine.register(&label, move |r| ordered_questions(r, &quiz_id))?;
    Ok(query.into())
}

pub fn question_live(engine: &LiveEngine, id: &str) -> Result<Live<Option<Question>>, StoreError> {
    let id = id.to_string();
    let query = engine.register(&format!("question:{id}"), move |r| r.get::<Question>(&id))?;
    Ok(query.into())
}

pub fn run_question_cli(store: &Store, cli: QuestionCli) -> Result<(), StoreError> {
    use colored::Colorize;

    match cli.command {
        QuestionCommand::Add {
            quiz,
            title,
            options,
            correct,
        } => {
            let question = add_question(
                store,
                &quiz,
                NewQuestion {
                    title,
                    options,
                    correct_option_index: correct,
                    ..Default::default()
                },
            )?;
            println!("{} {} {}", "created".green(), question.id.bold(), question.title);
        }
        QuestionCommand::List { quiz } => {
            let snapshot = store.snapshot()?;
            snapshot.require::<Quiz>(&quiz)?;
            for (i, question) in ordered_questions(&*snapshot, &quiz)?.iter().enumerate() {
                println!("{:>3}. {}  {}", i + 1, question.id.bold(), question.title);
                for (j, option) in question.options.iter().enumerate() {
                    let marker = if question.correct_option_index == Some(j) {
                        "*".green()
                    } else {
                        " ".normal()
                    };
                    println!("      {marker} {option}");
                }
            }
        }
        QuestionCommand::Move { quiz, id, to } => {
            let quiz = move_question(store, &quiz, &id, to)?;
            println!("{} {} -> {}", "moved".green(), id.bold(), to);
            println!("{}", quiz.question_ids.join(", ").dimmed());
        }
        QuestionCommand::Delete { id } => {
            if delete_question(store, &id)? {
                println!("{} {}", "deleted".yellow(), id.bold());
            } else {
                println!("{} {}", "no such question".dimmed(), id);
            }
        }
    }
    Ok(())
}
