//! Integration test suite for switchboard.
//!
//! These tests drive a real `Coordinator` against scripted mock systems
//! and verify that admission, routing, fan-out, aggregation and health
//! monitoring work together correctly.
//!
//! # Test Categories
//!
//! - `admission`: Concurrency ceiling, FIFO queueing, cancellation
//! - `routing`: Determinism, no-candidate failures, decision log
//! - `fan_out`: Fallback isolation, voting, load conservation
//! - `recovery`: Health degradation, timeouts, caller-side retries
//! - `events`: Event bus ordering
//! - `performance`: Throughput thresholds
//!
//! # CI Compatibility
//!
//! Every backend is an in-process mock, so the suite needs no network or
//! external services.


mod events;
mod fan_out;
mod recovery;
mod routing;
