use super::*;

use crate::types::EventoReconciliacao;

impl CaseDb {
    // =========================================================================
    // Reconciliation run log
    // =========================================================================

    fn map_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbReconciliationRun> {
        Ok(DbReconciliationRun {
            id: row.get(0)?,
            caso_id: row.get(1)?,
            evento: label_col(row, 2, EventoReconciliacao::parse)?,
            vinculos: row.get(3)?,
            analises: row.get(4)?,
            problemas: row.get(5)?,
            alertas: row.get(6)?,
            pendencias: row.get(7)?,
            inconsistencias: row.get(8)?,
            fingerprint: row.get(9)?,
            started_at: row.get(10)?,
            finished_at: row.get(11)?,
        })
    }

    pub fn create_run(&self, r: &DbReconciliationRun) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO reconciliation_runs (id, caso_id, evento, vinculos, analises, problemas,
                alertas, pendencias, inconsistencias, fingerprint, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                r.id,
                r.caso_id,
                r.evento.as_str(),
                r.vinculos,
                r.analises,
                r.problemas,
                r.alertas,
                r.pendencias,
                r.inconsistencias,
                r.fingerprint,
                r.started_at,
                r.finished_at,
            ],
        )?;
        Ok(())
    }

    /// Run history of a case, newest first.
    pub fn get_runs(&self, caso_id: &str) -> Result<Vec<DbReconciliationRun>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, caso_id, evento, vinculos, analises, problemas, alertas, pendencias,
                    inconsistencias, fingerprint, started_at, finished_at
             FROM reconciliation_runs
             WHERE caso_id = ?1
             ORDER BY finished_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![caso_id], Self::map_run_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    pub fn get_latest_run(&self, caso_id: &str) -> Result<Option<DbReconciliationRun>, DbError> {
        Ok(self.get_runs(caso_id)?.into_iter().next())
    }
}
