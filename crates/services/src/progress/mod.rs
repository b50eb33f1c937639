//! Lesson progress: the normalized store and the service that writes it.

mod mutation;
mod snapshot;
mod store;

pub use mutation::ProgressMutationService;
pub use store::ProgressStore;
