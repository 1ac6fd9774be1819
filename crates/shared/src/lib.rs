pub mod domain;
pub mod error;
pub mod media;

#[cfg(test)]
#[path = "tests/media_tests.rs"]
mod media_tests;
