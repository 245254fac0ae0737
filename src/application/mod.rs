//! Application layer: the orchestration workflow and the activity-call
//! boundary it drives external collaborators through.

pub mod activity;
pub mod orchestrator;
