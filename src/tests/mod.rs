pub mod liveness_tests;
pub mod pipeline_tests;
