//! taskmaster — process supervisor core library.
//!
//! Launches configured jobs, restarts them under policy, and exposes remote
//! control over a small RPC surface and an optional HTTP dashboard. See
//! `SPEC_FULL.md` at the repository root for the full design.
pub mod auth;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod dispatcher;
pub mod job;
pub mod logging;
pub mod registry;
pub mod reload;
pub mod rpc;
pub mod signals;
pub mod supervisor;
