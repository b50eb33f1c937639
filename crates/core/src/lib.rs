#![forbid(unsafe_code)]

pub mod completion;
pub mod error;
pub mod helpers;
pub mod legacy;
pub mod model;
pub mod selectors;
pub mod state;
pub mod time;

pub use error::ValidationError;
pub use helpers::{MergeMode, RecoveryPolicy};
pub use state::{ModuleLessons, ProgressByModule};
pub use time::Clock;
