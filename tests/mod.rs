//! Integration tests for the XREAL relocalization engine
//!
//! Sessions run against the simulation collaborators on a paused tokio clock,
//! so retry sleeps cost no wall time.
