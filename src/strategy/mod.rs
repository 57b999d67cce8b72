//! Request classification and the caching strategies behind it.

mod collection;
mod dispatch;
mod engine;

pub use dispatch::{Dispatcher, StrategyKind};
pub use engine::Engine;
