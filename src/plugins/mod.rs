//! Domain clients on top of the store: one module per table, plus the score pipeline and
//! the archive format.

pub mod archive;
pub mod player;
pub mod point;
pub mod question;
pub mod quiz;
pub mod round;
pub mod scores;
