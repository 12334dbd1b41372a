//! colstress - workload-centric load generator for wide-column clusters.
//!
//! This library provides the stress execution engine behind the
//! `colstress` binary:
//! - `workload` - named profiles (DDL, prepared statements, tunables)
//! - `generator` - partition key and field value generation
//! - `engine` - rate-gated dispatch, termination, populate phase
//! - `metrics` - latency timers and throughput meters
//! - `collector` - completion-path sinks (metrics, raw log, progress)
//! - `server` - remote-control JSON surface
//! - `driver` - the session seam to the cluster client

pub mod collector;
pub mod config;
pub mod driver;
pub mod engine;
pub mod generator;
pub mod metrics;
pub mod server;
pub mod workload;
