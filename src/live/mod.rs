//! Live queries and their composition.
//!
//! [`engine::LiveEngine`] keeps registered queries current as commits land;
//! [`compose`] combines their result streams into derived views.

pub mod cancel;
pub mod compose;
pub mod deps;
pub mod engine;

pub use cancel::CancelToken;
pub use compose::{Live, Scope, join_all, join2, join3, switch_on_key};
pub use deps::{ReadSet, Reader};
pub use engine::{Item, LiveEngine, LiveQuery, Phase, QueryId};
