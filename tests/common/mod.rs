//! Shared test utilities for statehub
//!
//! This module provides common helpers for integration tests:
//! - Recording subscribers that capture delivered changes
//! - Temporary snapshot databases and data directories

pub mod recorder;
