//! Case-level operations over a [`CaseStore`](crate::store::CaseStore).
//!
//! `reconciliation` owns the CNIS rebuild and identity re-validation events,
//! `cross_document` merges secondary-document findings, and `pendencias`
//! covers the manual edits a practitioner makes between runs.

use chrono::{Local, NaiveDate};

use crate::types::ReconcileConfig;

pub mod cross_document;
pub mod locks;
pub mod pendencias;
pub mod reconciliation;

use locks::CaseLocks;

/// Everything a run needs besides the store.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub config: &'a ReconcileConfig,
    pub locks: &'a CaseLocks,
    /// Reference date for open-ended vínculos.
    pub today: NaiveDate,
}

impl<'a> RunContext<'a> {
    /// Process-wide locks, local calendar date.
    pub fn new(config: &'a ReconcileConfig) -> Self {
        Self {
            config,
            locks: locks::case_locks(),
            today: Local::now().date_naive(),
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn with_locks(mut self, locks: &'a CaseLocks) -> Self {
        self.locks = locks;
        self
    }
}
