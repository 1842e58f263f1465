//! component-ci - a CI backend for a catalog of web components.
//!
//! GitHub webhooks start release builds (stage, master, tag); operators start
//! cross-component test runs and coverage runs. Every job is a persisted
//! record plus a notification; one single-flight queue per job family runs the
//! jobs against fresh working trees and writes their terminal status back.

pub mod config;
pub mod executor;
pub mod git;
pub mod persistence;
pub mod pipeline;
pub mod pubsub;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;
pub mod webhooks;
pub mod worker;

#[cfg(test)]
mod test_utils;
