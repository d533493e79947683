use super::*;

use crate::types::{Prioridade, StatusPendencia};

impl CaseDb {
    // =========================================================================
    // Pendências
    // =========================================================================

    fn map_pendencia_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbPendencia> {
        Ok(DbPendencia {
            id: row.get(0)?,
            caso_id: row.get(1)?,
            titulo: row.get(2)?,
            descricao: row.get(3)?,
            tipo: row.get(4)?,
            prioridade: label_col(row, 5, Prioridade::parse)?,
            acao_necessaria: row.get(6)?,
            documentos_necessarios: list_col(row, 7)?,
            vinculo_id: row.get(8)?,
            status: label_col(row, 9, StatusPendencia::parse)?,
            data_resolucao: row.get(10)?,
            impacta_calculo: row.get(11)?,
            contexto: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    const PENDENCIA_COLUMNS: &'static str = "id, caso_id, titulo, descricao, tipo, prioridade, \
         acao_necessaria, documentos_necessarios, vinculo_id, status, data_resolucao, \
         impacta_calculo, contexto, created_at, updated_at";

    /// Pendencies of a case: most urgent first, then oldest first.
    pub fn get_pendencias(&self, caso_id: &str) -> Result<Vec<DbPendencia>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pendencias
             WHERE caso_id = ?1
             ORDER BY
               CASE prioridade
                 WHEN 'urgente' THEN 0
                 WHEN 'alta' THEN 1
                 WHEN 'media' THEN 2
                 ELSE 3
               END,
               created_at,
               id",
            Self::PENDENCIA_COLUMNS
        ))?;
        let rows = stmt.query_map(params![caso_id], Self::map_pendencia_row)?;

        let mut pendencias = Vec::new();
        for row in rows {
            pendencias.push(row?);
        }
        Ok(pendencias)
    }

    pub fn get_pendencia(&self, id: &str) -> Result<Option<DbPendencia>, DbError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM pendencias WHERE id = ?1", Self::PENDENCIA_COLUMNS),
                params![id],
                Self::map_pendencia_row,
            )
            .optional()?)
    }

    pub fn create_pendencia(&self, p: &DbPendencia) -> Result<(), DbError> {
        self.conn.execute(
            &format!(
                "INSERT INTO pendencias ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                Self::PENDENCIA_COLUMNS
            ),
            params![
                p.id,
                p.caso_id,
                p.titulo,
                p.descricao,
                p.tipo,
                p.prioridade.as_str(),
                p.acao_necessaria,
                serde_json::to_string(&p.documentos_necessarios)?,
                p.vinculo_id,
                p.status.as_str(),
                p.data_resolucao,
                p.impacta_calculo,
                p.contexto,
                p.created_at,
                p.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Delete the pendencies of exactly one type for one case.
    pub fn delete_pendencias_by_tipo(&self, caso_id: &str, tipo: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM pendencias WHERE caso_id = ?1 AND tipo = ?2",
            params![caso_id, tipo],
        )?)
    }

    /// Point a pendency back at a recreated vínculo. Leaves `updated_at` alone.
    pub fn relink_pendencia(&self, id: &str, vinculo_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE pendencias SET vinculo_id = ?2 WHERE id = ?1",
            params![id, vinculo_id],
        )?;
        Ok(())
    }

    /// Apply a partial update and bump `updated_at`.
    ///
    /// No transition rules here; callers validate status changes first.
    pub fn update_pendencia(&self, id: &str, patch: &PendenciaPatch) -> Result<DbPendencia, DbError> {
        let mut p = self.get_pendencia(id)?.ok_or_else(|| DbError::NotFound {
            entity: "pendencia",
            id: id.to_string(),
        })?;

        if let Some(titulo) = &patch.titulo {
            p.titulo = titulo.clone();
        }
        if let Some(descricao) = &patch.descricao {
            p.descricao = descricao.clone();
        }
        if let Some(prioridade) = patch.prioridade {
            p.prioridade = prioridade;
        }
        if let Some(acao) = &patch.acao_necessaria {
            p.acao_necessaria = Some(acao.clone());
        }
        if let Some(docs) = &patch.documentos_necessarios {
            p.documentos_necessarios = docs.clone();
        }
        if let Some(status) = patch.status {
            p.status = status;
        }
        if let Some(data) = &patch.data_resolucao {
            p.data_resolucao = data.clone();
        }
        if let Some(impacta) = patch.impacta_calculo {
            p.impacta_calculo = Some(impacta);
        }
        if let Some(contexto) = &patch.contexto {
            p.contexto = Some(contexto.clone());
        }
        p.updated_at = Self::now();

        self.conn.execute(
            "UPDATE pendencias SET
                titulo = ?2, descricao = ?3, prioridade = ?4, acao_necessaria = ?5,
                documentos_necessarios = ?6, status = ?7, data_resolucao = ?8,
                impacta_calculo = ?9, contexto = ?10, updated_at = ?11
             WHERE id = ?1",
            params![
                p.id,
                p.titulo,
                p.descricao,
                p.prioridade.as_str(),
                p.acao_necessaria,
                serde_json::to_string(&p.documentos_necessarios)?,
                p.status.as_str(),
                p.data_resolucao,
                p.impacta_calculo,
                p.contexto,
                p.updated_at,
            ],
        )?;
        Ok(p)
    }
}
