//! Table catalogue: table names, indexed fields and the SQLite layout of the durable medium.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_DB_NAME: &str = "quizbase.db";
pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";
pub const CONFIG_FILE_NAME: &str = "quizbase.toml";

pub const TABLE_COUNT: usize = 5;

/// The five entity tables. Declaration order is the lock acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    Quiz,
    Question,
    Player,
    Round,
    PointEvent,
}

impl TableName {
    pub const ALL: [TableName; TABLE_COUNT] = [
        TableName::Quiz,
        TableName::Question,
        TableName::Player,
        TableName::Round,
        TableName::PointEvent,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TableName::Quiz => "quiz",
            TableName::Question => "question",
            TableName::Player => "player",
            TableName::Round => "round",
            TableName::PointEvent => "point_event",
        }
    }

    pub fn parse(name: &str) -> Option<TableName> {
        TableName::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Fields that carry a secondary index. Queries may only filter on these.
    pub fn indexes(self) -> &'static [Field] {
        match self {
            TableName::Quiz => &[Field::Name, Field::UpdatedAt],
            TableName::Question => &[Field::QuizId],
            TableName::Player => &[Field::Name],
            TableName::Round => &[Field::QuizId, Field::ParticipantIds, Field::CreatedAt],
            TableName::PointEvent => &[Field::RoundId, Field::QuestionId, Field::PlayerId],
        }
    }

    pub fn is_indexed(self, field: Field) -> bool {
        self.indexes().contains(&field)
    }

    pub fn create_sql(self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (row_key TEXT PRIMARY KEY, body TEXT NOT NULL)",
            self.as_str()
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indexable record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    CreatedAt,
    UpdatedAt,
    QuizId,
    RoundId,
    QuestionId,
    PlayerId,
    /// Multi-entry: one index entry per participant.
    ParticipantIds,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::CreatedAt => "created_at",
            Field::UpdatedAt => "updated_at",
            Field::QuizId => "quiz_id",
            Field::RoundId => "round_id",
            Field::QuestionId => "question_id",
            Field::PlayerId => "player_id",
            Field::ParticipantIds => "participant_ids",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value stored in a secondary index. Integers sort before text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Int(i64),
    Text(String),
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::Text(v.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(v: String) -> Self {
        IndexValue::Text(v)
    }
}

impl From<&String> for IndexValue {
    fn from(v: &String) -> Self {
        IndexValue::Text(v.clone())
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Int(v)
    }
}
