//! PrevDesk core: reconciles a claimant's CNIS against the case file and keeps
//! the list of pendências a practitioner must clear before filing.
//!
//! `analysis` is pure classification, `db` is the SQLite store, and `services`
//! runs the reconciliation events on top of [`store::CaseStore`].

pub mod analysis;
pub mod competencia;
pub mod db;
pub mod db_backup;
pub mod error;
pub mod extraction;
mod migrations;
pub mod services;
pub mod state;
pub mod store;
pub mod types;
pub mod util;
