//! Entity records, their creation payloads and their patch types.
//!
//! Every table has three shapes:
//! - the stored record (`Quiz`, `Question`, ...),
//! - a creation payload (`NewQuiz`, ...) that cannot carry store-owned fields,
//! - a patch sum type (`QuizPatch`, ...) listing exactly the fields callers may change.
//!
//! Patches deserialize from `{"field": "...", "value": ...}` so an unknown field is
//! rejected at the boundary instead of being silently merged.

use crate::core::error::StoreError;
use crate::core::schema::{Field, IndexValue, TableName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key. Point events are sequenced, every other table uses opaque ULID strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Seq(u64),
    Id(String),
}

impl Key {
    /// Text form used by the durable medium. Sequences are zero padded so text order matches
    /// numeric order.
    pub fn encode(&self) -> String {
        match self {
            Key::Seq(n) => format!("{n:020}"),
            Key::Id(s) => s.clone(),
        }
    }

    pub fn decode(table: TableName, text: &str) -> Result<Key, StoreError> {
        if table == TableName::PointEvent {
            text.trim()
                .parse::<u64>()
                .map(Key::Seq)
                .map_err(|e| StoreError::validation(table, Some(text), "id", e.to_string()))
        } else {
            Ok(Key::Id(text.to_string()))
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Seq(n) => write!(f, "{n}"),
            Key::Id(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Id(v.to_string())
    }
}

impl From<&String> for Key {
    fn from(v: &String) -> Self {
        Key::Id(v.clone())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Id(v)
    }
}

impl From<u64> for Key {
    fn from(v: u64) -> Self {
        Key::Seq(v)
    }
}

// ===== Quiz =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub name: String,
    /// Play order. Only references questions whose `quiz_id` is this quiz.
    pub question_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewQuiz {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum QuizPatch {
    Name(String),
    /// Explicit list replacement.
    QuestionIds(Vec<String>),
}

// ===== Question =====

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Category,
    #[default]
    Text,
    Image,
    Timer,
    Sound,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaPayload {
    pub image: Option<String>,
    pub thumbnail: Option<String>,
    pub image_flipped: bool,
    pub image_obscured: bool,
    pub sound: Option<String>,
    pub timer_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub quiz_id: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub title: String,
    pub options: Vec<String>,
    pub correct_option_index: Option<usize>,
    pub explanation: String,
    pub background_color: String,
    #[serde(default)]
    pub media: MediaPayload,
}

#[derive(Debug, Clone, Default)]
pub struct NewQuestion {
    pub quiz_id: String,
    pub kind: QuestionType,
    pub title: String,
    pub options: Vec<String>,
    pub correct_option_index: Option<usize>,
    pub explanation: String,
    pub background_color: String,
    pub media: MediaPayload,
}

impl NewQuestion {
    pub fn for_quiz(quiz_id: &str) -> Self {
        NewQuestion {
            quiz_id: quiz_id.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum QuestionPatch {
    #[serde(rename = "type")]
    Kind(QuestionType),
    Title(String),
    Options(Vec<String>),
    CorrectOptionIndex(Option<usize>),
    Explanation(String),
    BackgroundColor(String),
    Media(MediaPayload),
}

// ===== Player =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub photo: Option<String>,
    pub background_color: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewPlayer {
    pub name: String,
    pub photo: Option<String>,
    pub background_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum PlayerPatch {
    Name(String),
    Photo(Option<String>),
    BackgroundColor(String),
}

// ===== Round =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub quiz_id: String,
    pub created_at: i64,
    /// Progress marker: index into the quiz's question list.
    pub question_reached_index: usize,
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewRound {
    pub quiz_id: String,
    pub participant_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum RoundPatch {
    QuestionReachedIndex(usize),
    ParticipantIds(Vec<String>),
    Completed(bool),
}

// ===== PointEvent =====

/// Append-only: one scored point for one player on one question of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointEvent {
    pub id: u64,
    pub round_id: String,
    pub question_id: String,
    pub player_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewPointEvent {
    pub round_id: String,
    pub question_id: String,
    pub player_id: String,
}

/// Point events are facts; nothing about them is updatable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointEventPatch {}

// ===== Record =====

/// Type-erased row as held by the store and the durable medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record", rename_all = "snake_case")]
pub enum Record {
    Quiz(Quiz),
    Question(Question),
    Player(Player),
    Round(Round),
    PointEvent(PointEvent),
}

impl Record {
    pub fn table(&self) -> TableName {
        match self {
            Record::Quiz(_) => TableName::Quiz,
            Record::Question(_) => TableName::Question,
            Record::Player(_) => TableName::Player,
            Record::Round(_) => TableName::Round,
            Record::PointEvent(_) => TableName::PointEvent,
        }
    }

    pub fn key(&self) -> Key {
        match self {
            Record::Quiz(r) => Key::Id(r.id.clone()),
            Record::Question(r) => Key::Id(r.id.clone()),
            Record::Player(r) => Key::Id(r.id.clone()),
            Record::Round(r) => Key::Id(r.id.clone()),
            Record::PointEvent(r) => Key::Seq(r.id),
        }
    }

    /// Index entries for `field`. Empty when the record has no such field.
    pub fn index_values(&self, field: Field) -> Vec<IndexValue> {
        match (self, field) {
            (Record::Quiz(r), Field::Name) => vec![IndexValue::from(&r.name)],
            (Record::Quiz(r), Field::CreatedAt) => vec![IndexValue::Int(r.created_at)],
            (Record::Quiz(r), Field::UpdatedAt) => vec![IndexValue::Int(r.updated_at)],
            (Record::Question(r), Field::QuizId) => vec![IndexValue::from(&r.quiz_id)],
            (Record::Question(r), Field::CreatedAt) => vec![IndexValue::Int(r.created_at)],
            (Record::Question(r), Field::UpdatedAt) => vec![IndexValue::Int(r.updated_at)],
            (Record::Player(r), Field::Name) => vec![IndexValue::from(&r.name)],
            (Record::Round(r), Field::QuizId) => vec![IndexValue::from(&r.quiz_id)],
            (Record::Round(r), Field::CreatedAt) => vec![IndexValue::Int(r.created_at)],
            (Record::Round(r), Field::ParticipantIds) => {
                r.participant_ids.iter().map(IndexValue::from).collect()
            }
            (Record::PointEvent(r), Field::RoundId) => vec![IndexValue::from(&r.round_id)],
            (Record::PointEvent(r), Field::QuestionId) => vec![IndexValue::from(&r.question_id)],
            (Record::PointEvent(r), Field::PlayerId) => vec![IndexValue::from(&r.player_id)],
            _ => Vec::new(),
        }
    }

    pub fn created_at(&self) -> Option<i64> {
        match self {
            Record::Quiz(r) => Some(r.created_at),
            Record::Question(r) => Some(r.created_at),
            Record::Round(r) => Some(r.created_at),
            Record::Player(_) | Record::PointEvent(_) => None,
        }
    }

    pub fn updated_at(&self) -> Option<i64> {
        match self {
            Record::Quiz(r) => Some(r.updated_at),
            Record::Question(r) => Some(r.updated_at),
            _ => None,
        }
    }

    pub fn set_created_at(&mut self, ts: i64) {
        match self {
            Record::Quiz(r) => r.created_at = ts,
            Record::Question(r) => r.created_at = ts,
            Record::Round(r) => r.created_at = ts,
            Record::Player(_) | Record::PointEvent(_) => {}
        }
    }

    pub fn set_updated_at(&mut self, ts: i64) {
        match self {
            Record::Quiz(r) => r.updated_at = ts,
            Record::Question(r) => r.updated_at = ts,
            _ => {}
        }
    }

    /// JSON body of the inner entity, as written to the durable medium.
    pub fn encode_body(&self) -> Result<String, StoreError> {
        let body = match self {
            Record::Quiz(r) => serde_json::to_string(r)?,
            Record::Question(r) => serde_json::to_string(r)?,
            Record::Player(r) => serde_json::to_string(r)?,
            Record::Round(r) => serde_json::to_string(r)?,
            Record::PointEvent(r) => serde_json::to_string(r)?,
        };
        Ok(body)
    }

    pub fn decode_body(table: TableName, body: &str) -> Result<Record, StoreError> {
        let record = match table {
            TableName::Quiz => Record::Quiz(serde_json::from_str(body)?),
            TableName::Question => Record::Question(serde_json::from_str(body)?),
            TableName::Player => Record::Player(serde_json::from_str(body)?),
            TableName::Round => Record::Round(serde_json::from_str(body)?),
            TableName::PointEvent => Record::PointEvent(serde_json::from_str(body)?),
        };
        Ok(record)
    }
}

// ===== Entity =====

/// Static description of one table's record type.
pub trait Entity: Clone + Send + Sync + 'static {
    const TABLE: TableName;
    /// Tables whose rows a new record points at. Checked on create when in scope.
    const REFERENCES: &'static [TableName] = &[];
    /// Tables a delete of this entity cascades into.
    const CASCADES: &'static [TableName] = &[];
    /// Extra tables an update must lock to re-check list references.
    const UPDATE_CHECKS: &'static [TableName] = &[];

    type New;
    type Patch: fmt::Debug + Send;

    fn key(&self) -> Key;

    /// Build the stored record from a creation payload. Store-owned fields (timestamps) are
    /// left at zero for the create hooks to fill.
    fn build(key: Key, new: Self::New) -> Result<Self, StoreError>;

    fn apply(&mut self, patch: Self::Patch) -> Result<(), StoreError>;

    fn into_record(self) -> Record;

    fn from_record(record: Record) -> Option<Self>;
}

fn required(table: TableName, field: &'static str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(table, None, field, "is required"));
    }
    Ok(())
}

fn text_id(table: TableName, key: Key) -> Result<String, StoreError> {
    match key {
        Key::Id(id) => Ok(id),
        Key::Seq(n) => Err(StoreError::validation(
            table,
            Some(&n.to_string()),
            "id",
            "expected a text id",
        )),
    }
}

impl Entity for Quiz {
    const TABLE: TableName = TableName::Quiz;
    const CASCADES: &'static [TableName] = &[TableName::Question];
    const UPDATE_CHECKS: &'static [TableName] = &[TableName::Question];

    type New = NewQuiz;
    type Patch = QuizPatch;

    fn key(&self) -> Key {
        Key::Id(self.id.clone())
    }

    fn build(key: Key, new: NewQuiz) -> Result<Self, StoreError> {
        Ok(Quiz {
            id: text_id(Self::TABLE, key)?,
            created_at: 0,
            updated_at: 0,
            name: new.name,
            question_ids: Vec::new(),
        })
    }

    fn apply(&mut self, patch: QuizPatch) -> Result<(), StoreError> {
        match patch {
            QuizPatch::Name(name) => self.name = name,
            QuizPatch::QuestionIds(ids) => {
                let mut seen = std::collections::HashSet::new();
                if let Some(dup) = ids.iter().find(|id| !seen.insert(id.as_str())) {
                    return Err(StoreError::validation(
                        Self::TABLE,
                        Some(&self.id),
                        "question_ids",
                        format!("duplicate question id {dup}"),
                    ));
                }
                self.question_ids = ids;
            }
        }
        Ok(())
    }

    fn into_record(self) -> Record {
        Record::Quiz(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Quiz(r) => Some(r),
            _ => None,
        }
    }
}

impl Question {
    fn check_correct_option(&self) -> Result<(), StoreError> {
        if let Some(index) = self.correct_option_index
            && index >= self.options.len()
        {
            return Err(StoreError::validation(
                TableName::Question,
                Some(&self.id),
                "correct_option_index",
                format!("{index} is out of range for {} options", self.options.len()),
            ));
        }
        Ok(())
    }
}

impl Entity for Question {
    const TABLE: TableName = TableName::Question;
    const REFERENCES: &'static [TableName] = &[TableName::Quiz];
    const CASCADES: &'static [TableName] = &[TableName::Quiz];

    type New = NewQuestion;
    type Patch = QuestionPatch;

    fn key(&self) -> Key {
        Key::Id(self.id.clone())
    }

    fn build(key: Key, new: NewQuestion) -> Result<Self, StoreError> {
        required(Self::TABLE, "quiz_id", &new.quiz_id)?;
        let question = Question {
            id: text_id(Self::TABLE, key)?,
            created_at: 0,
            updated_at: 0,
            quiz_id: new.quiz_id,
            kind: new.kind,
            title: new.title,
            options: new.options,
            correct_option_index: new.correct_option_index,
            explanation: new.explanation,
            background_color: new.background_color,
            media: new.media,
        };
        question.check_correct_option()?;
        Ok(question)
    }

    fn apply(&mut self, patch: QuestionPatch) -> Result<(), StoreError> {
        match patch {
            QuestionPatch::Kind(kind) => self.kind = kind,
            QuestionPatch::Title(title) => self.title = title,
            QuestionPatch::Options(options) => self.options = options,
            QuestionPatch::CorrectOptionIndex(index) => self.correct_option_index = index,
            QuestionPatch::Explanation(text) => self.explanation = text,
            QuestionPatch::BackgroundColor(color) => self.background_color = color,
            QuestionPatch::Media(media) => self.media = media,
        }
        self.check_correct_option()
    }

    fn into_record(self) -> Record {
        Record::Question(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Question(r) => Some(r),
            _ => None,
        }
    }
}

impl Entity for Player {
    const TABLE: TableName = TableName::Player;
    const CASCADES: &'static [TableName] = &[TableName::Round];

    type New = NewPlayer;
    type Patch = PlayerPatch;

    fn key(&self) -> Key {
        Key::Id(self.id.clone())
    }

    fn build(key: Key, new: NewPlayer) -> Result<Self, StoreError> {
        Ok(Player {
            id: text_id(Self::TABLE, key)?,
            name: new.name,
            photo: new.photo,
            background_color: new.background_color,
        })
    }

    fn apply(&mut self, patch: PlayerPatch) -> Result<(), StoreError> {
        match patch {
            PlayerPatch::Name(name) => self.name = name,
            PlayerPatch::Photo(photo) => self.photo = photo,
            PlayerPatch::BackgroundColor(color) => self.background_color = color,
        }
        Ok(())
    }

    fn into_record(self) -> Record {
        Record::Player(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Player(r) => Some(r),
            _ => None,
        }
    }
}

impl Entity for Round {
    const TABLE: TableName = TableName::Round;
    const REFERENCES: &'static [TableName] = &[TableName::Quiz, TableName::Player];
    const CASCADES: &'static [TableName] = &[TableName::PointEvent];

    type New = NewRound;
    type Patch = RoundPatch;

    fn key(&self) -> Key {
        Key::Id(self.id.clone())
    }

    fn build(key: Key, new: NewRound) -> Result<Self, StoreError> {
        required(Self::TABLE, "quiz_id", &new.quiz_id)?;
        Ok(Round {
            id: text_id(Self::TABLE, key)?,
            quiz_id: new.quiz_id,
            created_at: 0,
            question_reached_index: 0,
            participant_ids: new.participant_ids,
            completed: false,
        })
    }

    fn apply(&mut self, patch: RoundPatch) -> Result<(), StoreError> {
        match patch {
            RoundPatch::QuestionReachedIndex(index) => self.question_reached_index = index,
            RoundPatch::ParticipantIds(ids) => self.participant_ids = ids,
            RoundPatch::Completed(done) => self.completed = done,
        }
        Ok(())
    }

    fn into_record(self) -> Record {
        Record::Round(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Round(r) => Some(r),
            _ => None,
        }
    }
}

impl Entity for PointEvent {
    const TABLE: TableName = TableName::PointEvent;
    const REFERENCES: &'static [TableName] =
        &[TableName::Question, TableName::Player, TableName::Round];

    type New = NewPointEvent;
    type Patch = PointEventPatch;

    fn key(&self) -> Key {
        Key::Seq(self.id)
    }

    fn build(key: Key, new: NewPointEvent) -> Result<Self, StoreError> {
        required(Self::TABLE, "round_id", &new.round_id)?;
        required(Self::TABLE, "question_id", &new.question_id)?;
        required(Self::TABLE, "player_id", &new.player_id)?;
        let id = match key {
            Key::Seq(n) => n,
            Key::Id(id) => {
                return Err(StoreError::validation(
                    Self::TABLE,
                    Some(&id),
                    "id",
                    "expected a sequence number",
                ));
            }
        };
        Ok(PointEvent {
            id,
            round_id: new.round_id,
            question_id: new.question_id,
            player_id: new.player_id,
        })
    }

    fn apply(&mut self, patch: PointEventPatch) -> Result<(), StoreError> {
        match patch {}
    }

    fn into_record(self) -> Record {
        Record::PointEvent(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::PointEvent(r) => Some(r),
            _ => None,
        }
    }
}
