//! Testing utilities
//!
//! Mock collaborators used by unit and integration tests.

pub mod mocks;
