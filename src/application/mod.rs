pub mod tier_executor;

pub use tier_executor::{Submission, SubmitError, TaskCompletion, TierExecutor};
