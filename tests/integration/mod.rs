//! Integration tests for statehub
//!
//! These tests verify that multiple components work together correctly.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod persistence_reload;
pub mod store_flow;
