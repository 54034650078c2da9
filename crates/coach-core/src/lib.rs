pub mod bundle;
pub mod clock;
pub mod config;
pub mod dialog;
pub mod engine;
pub mod error;
pub mod io;
pub mod locks;
pub mod model;
pub mod paths;
pub mod resolver;
pub mod rule_evaluator;
pub mod selector;
pub mod store;
pub mod transport;
pub mod variables;
pub mod walker;

pub use engine::Engine;
pub use error::{CoachError, Result};
