//! Periodic benchmark of a time-series database sandbox.
//!
//! Every cycle the evaluator samples the sandbox's cloud infrastructure
//! metrics and runs a fixed set of probe queries through the dashboard's
//! datasource proxy, then forwards every measurement to an HTTP trap.

pub mod agent;
pub mod catalog;
pub mod cloud;
pub mod config;
pub mod discovery;
pub mod executor;
pub mod export;
pub mod result;
pub mod scheduler;
pub mod session;
pub mod sink;
