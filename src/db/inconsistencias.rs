use super::*;

use crate::types::{SeveridadeInconsistencia, StatusInconsistencia};

impl CaseDb {
    // =========================================================================
    // Inconsistências
    // =========================================================================

    fn map_inconsistencia_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbInconsistencia> {
        Ok(DbInconsistencia {
            id: row.get(0)?,
            caso_id: row.get(1)?,
            tipo: row.get(2)?,
            severidade: label_col(row, 3, SeveridadeInconsistencia::parse)?,
            titulo: row.get(4)?,
            descricao: row.get(5)?,
            documento_origem: row.get(6)?,
            documento_comparacao: row.get(7)?,
            vinculo_id: row.get(8)?,
            dados_origem: json_col(row, 9)?,
            dados_comparacao: json_col(row, 10)?,
            correcao_sugerida: row.get(11)?,
            status: label_col(row, 12, StatusInconsistencia::parse)?,
            created_at: row.get(13)?,
        })
    }

    const INCONSISTENCIA_COLUMNS: &'static str = "id, caso_id, tipo, severidade, titulo, \
         descricao, documento_origem, documento_comparacao, vinculo_id, dados_origem, \
         dados_comparacao, correcao_sugerida, status, created_at";

    /// Inconsistencies of a case, most severe first.
    pub fn get_inconsistencias(&self, caso_id: &str) -> Result<Vec<DbInconsistencia>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM inconsistencias
             WHERE caso_id = ?1
             ORDER BY
               CASE severidade
                 WHEN 'critica' THEN 0
                 WHEN 'alta' THEN 1
                 WHEN 'media' THEN 2
                 ELSE 3
               END,
               created_at,
               rowid",
            Self::INCONSISTENCIA_COLUMNS
        ))?;
        let rows = stmt.query_map(params![caso_id], Self::map_inconsistencia_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    pub fn get_inconsistencia(&self, id: &str) -> Result<Option<DbInconsistencia>, DbError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM inconsistencias WHERE id = ?1",
                    Self::INCONSISTENCIA_COLUMNS
                ),
                params![id],
                Self::map_inconsistencia_row,
            )
            .optional()?)
    }

    pub fn create_inconsistencia(&self, i: &DbInconsistencia) -> Result<(), DbError> {
        let origem = i.dados_origem.as_ref().map(serde_json::to_string).transpose()?;
        let comparacao = i
            .dados_comparacao
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            &format!(
                "INSERT INTO inconsistencias ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                Self::INCONSISTENCIA_COLUMNS
            ),
            params![
                i.id,
                i.caso_id,
                i.tipo,
                i.severidade.as_str(),
                i.titulo,
                i.descricao,
                i.documento_origem,
                i.documento_comparacao,
                i.vinculo_id,
                origem,
                comparacao,
                i.correcao_sugerida,
                i.status.as_str(),
                i.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn relink_inconsistencia(&self, id: &str, vinculo_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE inconsistencias SET vinculo_id = ?2 WHERE id = ?1",
            params![id, vinculo_id],
        )?;
        Ok(())
    }

    pub fn update_inconsistencia_status(
        &self,
        id: &str,
        status: StatusInconsistencia,
    ) -> Result<DbInconsistencia, DbError> {
        let changed = self.conn.execute(
            "UPDATE inconsistencias SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "inconsistencia",
                id: id.to_string(),
            });
        }
        self.get_inconsistencia(id)?.ok_or_else(|| DbError::NotFound {
            entity: "inconsistencia",
            id: id.to_string(),
        })
    }
}
