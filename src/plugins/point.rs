use crate::core::error::StoreError;
use crate::core::model::{NewPointEvent, PointEvent};
use crate::core::query::Query;
use crate::core::schema::{Field, TableName};
use crate::core::store::{Reads, Store};
use crate::live::{Live, LiveEngine};

/// Append one point. Round, question and player must exist.
pub fn add_point(
    store: &Store,
    round_id: &str,
    question_id: &str,
    player_id: &str,
) -> Result<PointEvent, StoreError> {
    store.create::<PointEvent>(NewPointEvent {
        round_id: round_id.to_string(),
        question_id: question_id.to_string(),
        player_id: player_id.to_string(),
    })
}

/// Remove the most recent point for one (round, question, player), if any.
pub fn remove_point(
    store: &Store,
    round_id: &str,
    question_id: &str,
    player_id: &str,
) -> Result<Option<PointEvent>, StoreError> {
    let query = Query::on::<PointEvent>()
        .eq(Field::RoundId, round_id)
        .eq(Field::QuestionId, question_id)
        .eq(Field::PlayerId, player_id)
        .build()?;
    store.transaction("point.remove", &[TableName::PointEvent], |tx| {
        let latest = tx.query::<PointEvent>(&query)?.into_iter().max_by_key(|p| p.id);
        if let Some(point) = &latest {
            tx.delete::<PointEvent>(point.id)?;
        }
        Ok(latest)
    })
}

pub fn points_live(
    engine: &LiveEngine,
    round_id: &str,
    question_id: &str,
) -> Result<Live<Vec<PointEvent>>, StoreError> {
    let query = Query::on::<PointEvent>()
        .eq(Field::RoundId, round_id)
        .eq(Field::QuestionId, question_id)
        .build()?;
    let label = format!("points:{round_id}:{question_id}");
    let live = engine.register(&label, move |r| r.query::<PointEvent>(&query))?;
    Ok(live.into())
}

/// Every point of a round, in sequence order.
pub fn round_points_live(
    engine: &LiveEngine,
    round_id: &str,
) -> Result<Live<Vec<PointEvent>>, StoreError> {
    let query = Query::on::<PointEvent>()
        .eq(Field::RoundId, round_id)
        .build()?;
    let label = format!("points:{round_id}");
    let live = engine.register(&label, move |r| r.query::<PointEvent>(&query))?;
    Ok(live.into())
}
