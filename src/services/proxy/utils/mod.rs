pub mod body;
pub mod error_responses;
pub mod loop_detector;
