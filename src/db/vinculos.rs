use super::*;

impl CaseDb {
    // =========================================================================
    // Vínculos
    // =========================================================================

    fn map_vinculo_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbVinculo> {
        Ok(DbVinculo {
            id: row.get(0)?,
            caso_id: row.get(1)?,
            sequencia: row.get(2)?,
            empregador: row.get(3)?,
            nit: row.get(4)?,
            cnpj: row.get(5)?,
            tipo_vinculo: row.get(6)?,
            data_inicio: row.get(7)?,
            data_fim: row.get(8)?,
            ultima_remuneracao: row.get(9)?,
            indicadores: list_col(row, 10)?,
            observacoes: row.get(11)?,
            documento_origem: row.get(12)?,
            observacoes_usuario: row.get(13)?,
        })
    }

    const VINCULO_COLUMNS: &'static str = "id, caso_id, sequencia, empregador, nit, cnpj, \
         tipo_vinculo, data_inicio, data_fim, ultima_remuneracao, indicadores, observacoes, \
         documento_origem, observacoes_usuario";

    /// Vínculos of a case in source order.
    pub fn get_vinculos(&self, caso_id: &str) -> Result<Vec<DbVinculo>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM vinculos WHERE caso_id = ?1 ORDER BY sequencia",
            Self::VINCULO_COLUMNS
        ))?;
        let rows = stmt.query_map(params![caso_id], Self::map_vinculo_row)?;

        let mut vinculos = Vec::new();
        for row in rows {
            vinculos.push(row?);
        }
        Ok(vinculos)
    }

    pub fn get_vinculo(&self, id: &str) -> Result<Option<DbVinculo>, DbError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM vinculos WHERE id = ?1", Self::VINCULO_COLUMNS),
                params![id],
                Self::map_vinculo_row,
            )
            .optional()?)
    }

    pub fn create_vinculo(&self, v: &DbVinculo) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO vinculos (id, caso_id, sequencia, empregador, nit, cnpj, tipo_vinculo,
                data_inicio, data_fim, ultima_remuneracao, indicadores, observacoes,
                documento_origem, observacoes_usuario)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                v.id,
                v.caso_id,
                v.sequencia,
                v.empregador,
                v.nit,
                v.cnpj,
                v.tipo_vinculo,
                v.data_inicio,
                v.data_fim,
                v.ultima_remuneracao,
                serde_json::to_string(&v.indicadores)?,
                v.observacoes,
                v.documento_origem,
                v.observacoes_usuario,
            ],
        )?;
        Ok(())
    }

    /// Delete every vínculo of a case. Contributions, analyses and
    /// remuneration problems go with them through `ON DELETE CASCADE`.
    pub fn delete_vinculos_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        Ok(self
            .conn
            .execute("DELETE FROM vinculos WHERE caso_id = ?1", params![caso_id])?)
    }

    /// Set or clear the practice notes on a vínculo.
    pub fn update_vinculo_observacoes(
        &self,
        id: &str,
        observacoes: Option<&str>,
    ) -> Result<DbVinculo, DbError> {
        let changed = self.conn.execute(
            "UPDATE vinculos SET observacoes_usuario = ?2 WHERE id = ?1",
            params![id, observacoes],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "vinculo",
                id: id.to_string(),
            });
        }
        self.get_vinculo(id)?.ok_or_else(|| DbError::NotFound {
            entity: "vinculo",
            id: id.to_string(),
        })
    }

    // =========================================================================
    // Contribuições
    // =========================================================================

    pub fn get_contribuicoes(&self, vinculo_id: &str) -> Result<Vec<DbContribuicao>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, vinculo_id, ordem, competencia, remuneracao, indicadores
             FROM contribuicoes
             WHERE vinculo_id = ?1
             ORDER BY ordem",
        )?;
        let rows = stmt.query_map(params![vinculo_id], |row| {
            Ok(DbContribuicao {
                id: row.get(0)?,
                vinculo_id: row.get(1)?,
                ordem: row.get(2)?,
                competencia: row.get(3)?,
                remuneracao: row.get(4)?,
                indicadores: list_col(row, 5)?,
            })
        })?;

        let mut contribuicoes = Vec::new();
        for row in rows {
            contribuicoes.push(row?);
        }
        Ok(contribuicoes)
    }

    pub fn create_contribuicao(&self, c: &DbContribuicao) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO contribuicoes (id, vinculo_id, ordem, competencia, remuneracao, indicadores)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                c.id,
                c.vinculo_id,
                c.ordem,
                c.competencia,
                c.remuneracao,
                serde_json::to_string(&c.indicadores)?,
            ],
        )?;
        Ok(())
    }
}
