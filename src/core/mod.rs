//! Entity store: tables, indexes, hooks, transactions and the durable medium beneath them.
//!
//! Every write routes through [`store::Store::transaction`] and every committed batch
//! passes once through the [`broker::ChangeBroker`], which feeds the live-query engine.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub(crate) mod integrity;
pub mod model;
pub mod query;
pub mod schema;
pub mod store;
pub mod time;
