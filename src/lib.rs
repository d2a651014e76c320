//! idtrace - passive IDOR candidate detection
//!
//! Observes HTTP traffic (live through the intercept proxy or from a HAR
//! archive), records where every identifier-like value was first issued by a
//! server and where clients later sent it back, and flags identifiers the
//! client used without ever receiving them. Persisted reports feed the
//! analysis commands: risk scoring, request dependency chains, cross-user
//! access and report diffs.

pub mod analysis;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod report;
pub mod session;
pub mod tracker;
