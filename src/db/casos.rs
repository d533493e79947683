use super::*;

impl CaseDb {
    // =========================================================================
    // Casos
    // =========================================================================

    fn map_caso_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbCaso> {
        Ok(DbCaso {
            id: row.get(0)?,
            nome: row.get(1)?,
            cpf: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    /// Create a case for a claimant. Ids are random; cases are user-created.
    pub fn create_caso(&self, nome: &str, cpf: Option<&str>) -> Result<DbCaso, DbError> {
        let now = Self::now();
        let caso = DbCaso {
            id: uuid::Uuid::new_v4().to_string(),
            nome: nome.trim().to_string(),
            cpf: cpf.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string),
            created_at: now.clone(),
            updated_at: now,
        };
        self.conn.execute(
            "INSERT INTO casos (id, nome, cpf, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![caso.id, caso.nome, caso.cpf, caso.created_at, caso.updated_at],
        )?;
        Ok(caso)
    }

    pub fn get_caso(&self, id: &str) -> Result<Option<DbCaso>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, nome, cpf, created_at, updated_at FROM casos WHERE id = ?1",
                params![id],
                Self::map_caso_row,
            )
            .optional()?)
    }

    /// Every case, most recently touched first.
    pub fn list_casos(&self) -> Result<Vec<DbCaso>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, nome, cpf, created_at, updated_at
             FROM casos
             ORDER BY updated_at DESC, id",
        )?;
        let rows = stmt.query_map([], Self::map_caso_row)?;

        let mut casos = Vec::new();
        for row in rows {
            casos.push(row?);
        }
        Ok(casos)
    }

    /// Overwrite the claimant's registered name and CPF.
    pub fn update_caso_identidade(
        &self,
        id: &str,
        nome: &str,
        cpf: Option<&str>,
    ) -> Result<DbCaso, DbError> {
        let changed = self.conn.execute(
            "UPDATE casos SET nome = ?2, cpf = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                id,
                nome.trim(),
                cpf.map(str::trim).filter(|c| !c.is_empty()),
                Self::now()
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "caso",
                id: id.to_string(),
            });
        }
        self.get_caso(id)?.ok_or_else(|| DbError::NotFound {
            entity: "caso",
            id: id.to_string(),
        })
    }
}
