//! Active-learning cycle orchestration over a [`ProjectStore`] and a backend
//! [`Bridge`](morphloop_bridge::Bridge).
//!
//! [`ProjectStore`]: morphloop_store::ProjectStore

mod error;
mod orchestrator;
pub mod steps;

pub use error::WorkflowError;
pub use orchestrator::{Orchestrator, PendingResult, effective_increment};
pub use steps::{StepList, StepState, StepStatus};
