//! Runtime core: reflection & variants, the stream/graph serializer,
//! the resource manager, the world/component/message layer, and
//! blackboards.

pub mod blackboard;
pub mod error;
pub mod external;
pub mod reflection;
pub mod resource;
pub mod serializer;
pub mod world;

pub use error::{CoreError, Result, ResultExt};
