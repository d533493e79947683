//! SQLite store for cases, CNIS-derived rows, pendencies and inconsistencies.
//!
//! The database lives at `~/.prevdesk/prevdesk.db` unless the config points
//! elsewhere. Every table hangs off `casos`; deleting a vínculo cascades to its
//! contributions, analysis and remuneration problems.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::types::ReconcileConfig;

pub mod types;
pub use types::*;

mod analises;
mod casos;
mod identificacao;
mod inconsistencias;
mod pendencias;
mod runs;
mod vinculos;

pub struct CaseDb {
    conn: Connection,
}

impl CaseDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front, so two processes
    /// rebuilding the same file serialize here instead of failing at COMMIT.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| E::from(DbError::Sqlite(e)))?;
        match f(self) {
            Ok(val) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(E::from(DbError::Sqlite(e)));
                }
                Ok(val)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    log::warn!("Rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    /// Open (or create) the default database and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::db_path()?)
    }

    /// Open the database named by the config, falling back to the default path.
    pub fn open_with_config(config: &ReconcileConfig) -> Result<Self, DbError> {
        match config.database_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Self::open_at(PathBuf::from(path)),
            _ => Self::open(),
        }
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Default database path: `~/.prevdesk/prevdesk.db`.
    pub fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".prevdesk").join("prevdesk.db"))
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }
}


// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;
    use crate::types::{Prioridade, StatusPendencia};

    fn sample_pendencia(id: &str, caso_id: &str, tipo: &str) -> DbPendencia {
        let now = Utc::now().to_rfc3339();
        DbPendencia {
            id: id.to_string(),
            caso_id: caso_id.to_string(),
            titulo: format!("Pendência {id}"),
            descricao: String::new(),
            tipo: tipo.to_string(),
            prioridade: Prioridade::Media,
            acao_necessaria: None,
            documentos_necessarios: vec![],
            vinculo_id: None,
            status: StatusPendencia::Aberta,
            data_resolucao: None,
            impacta_calculo: None,
            contexto: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn sample_vinculo(caso_id: &str, seq: u32) -> DbVinculo {
        DbVinculo {
            id: format!("{caso_id}-v{seq}"),
            caso_id: caso_id.to_string(),
            sequencia: seq,
            empregador: format!("Empresa {seq}"),
            nit: None,
            cnpj: None,
            tipo_vinculo: Some("Empregado".to_string()),
            data_inicio: Some("01/2019".to_string()),
            data_fim: Some("12/2019".to_string()),
            ultima_remuneracao: None,
            indicadores: vec!["PEXT".to_string()],
            observacoes: None,
            documento_origem: "CNIS".to_string(),
            observacoes_usuario: None,
        }
    }

    #[test]
    fn test_open_creates_schema() {
        let db = test_db();
        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM casos", [], |row| row.get(0))
            .expect("casos table");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let caso = db.create_caso("Maria", None).expect("caso");

        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.create_pendencia(&sample_pendencia("p1", &caso.id, "manual"))?;
            Err(DbError::NotFound {
                entity: "vinculo",
                id: "x".into(),
            })
        });
        assert!(result.is_err());
        assert!(db.get_pendencias(&caso.id).expect("list").is_empty());
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = test_db();
        let caso = db.create_caso("Maria", None).expect("caso");

        let inserted: Result<usize, DbError> = db.with_transaction(|tx| {
            tx.create_pendencia(&sample_pendencia("p1", &caso.id, "manual"))?;
            tx.create_pendencia(&sample_pendencia("p2", &caso.id, "manual"))?;
            Ok(2)
        });
        assert_eq!(inserted.expect("commit"), 2);
        assert_eq!(db.get_pendencias(&caso.id).expect("list").len(), 2);
    }

    #[test]
    fn test_deleting_vinculos_cascades_to_contribuicoes() {
        let db = test_db();
        let caso = db.create_caso("Maria", None).expect("caso");
        let v = sample_vinculo(&caso.id, 1);
        db.create_vinculo(&v).expect("vinculo");
        db.create_contribuicao(&DbContribuicao {
            id: "c1".into(),
            vinculo_id: v.id.clone(),
            ordem: 0,
            competencia: "2019-01".into(),
            remuneracao: Some("1.000,00".into()),
            indicadores: vec![],
        })
        .expect("contribuicao");

        assert_eq!(db.delete_vinculos_by_case(&caso.id).expect("delete"), 1);
        let orphans: i64 = db
            .conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM contribuicoes WHERE vinculo_id = ?1",
                params![v.id],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_vinculo_round_trip_keeps_lists() {
        let db = test_db();
        let caso = db.create_caso("Maria", None).expect("caso");
        let v = sample_vinculo(&caso.id, 1);
        db.create_vinculo(&v).expect("vinculo");

        let stored = db.get_vinculos(&caso.id).expect("list");
        assert_eq!(stored, vec![v]);
    }

    #[test]
    fn test_delete_pendencias_by_tipo_is_scoped() {
        let db = test_db();
        let a = db.create_caso("A", None).expect("a");
        let b = db.create_caso("B", None).expect("b");
        db.create_pendencia(&sample_pendencia("a1", &a.id, "remuneracoes_faltantes"))
            .expect("a1");
        db.create_pendencia(&sample_pendencia("a2", &a.id, "juntar_ppp"))
            .expect("a2");
        db.create_pendencia(&sample_pendencia("b1", &b.id, "remuneracoes_faltantes"))
            .expect("b1");

        let removed = db
            .delete_pendencias_by_tipo(&a.id, "remuneracoes_faltantes")
            .expect("delete");
        assert_eq!(removed, 1);

        let left_a: Vec<String> = db
            .get_pendencias(&a.id)
            .expect("a")
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(left_a, vec!["a2".to_string()]);
        assert_eq!(db.get_pendencias(&b.id).expect("b").len(), 1);
    }

    #[test]
    fn test_update_pendencia_applies_patch() {
        let db = test_db();
        let caso = db.create_caso("A", None).expect("a");
        db.create_pendencia(&sample_pendencia("p1", &caso.id, "manual"))
            .expect("p1");

        let updated = db
            .update_pendencia(
                "p1",
                &PendenciaPatch {
                    status: Some(StatusPendencia::Resolvida),
                    data_resolucao: Some(Some("2024-01-01T00:00:00+00:00".into())),
                    documentos_necessarios: Some(vec!["CTPS".into()]),
                    ..Default::default()
                },
            )
            .expect("update");
        assert_eq!(updated.status, StatusPendencia::Resolvida);
        assert_eq!(updated.documentos_necessarios, vec!["CTPS".to_string()]);
        assert!(updated.data_resolucao.is_some());
        assert_eq!(updated.titulo, "Pendência p1");

        let cleared = db
            .update_pendencia(
                "p1",
                &PendenciaPatch {
                    status: Some(StatusPendencia::Aberta),
                    data_resolucao: Some(None),
                    ..Default::default()
                },
            )
            .expect("reopen");
        assert!(cleared.data_resolucao.is_none());
    }

    #[test]
    fn test_update_missing_pendencia_is_not_found() {
        let db = test_db();
        let err = db
            .update_pendencia("nope", &PendenciaPatch::default())
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
