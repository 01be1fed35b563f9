//! Attendance reconciliation, scoring and identity matching.
//!
//! Attendance arrives from manual sheets ([`sheet`]) or from optical
//! extraction of photographed sign-in sheets ([`extraction`], [`matcher`]).
//! The [`reconcile::Ledger`] merges it into history with one record per
//! (student, date) and regenerates per-student risk from scratch on every
//! change; [`metrics`] derives cohort figures from the same history.

pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod matcher;
pub mod metrics;
pub mod models;
pub mod reconcile;
pub mod report;
pub mod risk;
pub mod sheet;
pub mod timing;

pub use error::{Error, Result};
pub use reconcile::{History, Ledger, Snapshot};
