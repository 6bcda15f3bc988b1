//! Test module organization for the work queue

pub mod support;
