//! Cross-crate integration tests for the crucible workspace

pub mod common;

#[cfg(test)]
mod integration;

#[cfg(test)]
mod e2e;
