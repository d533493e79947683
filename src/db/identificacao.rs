use super::*;

use crate::analysis::{AlertaDetectado, IdentidadeExtraida};
use crate::types::{Severidade, TipoAlerta};

impl CaseDb {
    // =========================================================================
    // Identificação CNIS
    // =========================================================================

    pub fn get_identificacao(&self, caso_id: &str) -> Result<Option<DbIdentificacao>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, caso_id, nome, cpf, nome_mae, nits, data_nascimento, validada
                 FROM identificacoes_cnis
                 WHERE caso_id = ?1",
                params![caso_id],
                |row| {
                    Ok(DbIdentificacao {
                        id: row.get(0)?,
                        caso_id: row.get(1)?,
                        dados: IdentidadeExtraida {
                            nome: row.get(2)?,
                            cpf: row.get(3)?,
                            nome_mae: row.get(4)?,
                            nits: list_col(row, 5)?,
                            data_nascimento: row.get(6)?,
                        },
                        validada: row.get(7)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn create_identificacao(&self, i: &DbIdentificacao) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO identificacoes_cnis (id, caso_id, nome, cpf, nome_mae, nits,
                data_nascimento, validada)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                i.id,
                i.caso_id,
                i.dados.nome,
                i.dados.cpf,
                i.dados.nome_mae,
                serde_json::to_string(&i.dados.nits)?,
                i.dados.data_nascimento,
                i.validada,
            ],
        )?;
        Ok(())
    }

    pub fn set_identificacao_validada(&self, id: &str, validada: bool) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE identificacoes_cnis SET validada = ?2 WHERE id = ?1",
            params![id, validada],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "identificacao",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_identificacao_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM identificacoes_cnis WHERE caso_id = ?1",
            params![caso_id],
        )?)
    }

    // =========================================================================
    // Alertas de identificação
    // =========================================================================

    pub fn get_alertas(&self, caso_id: &str) -> Result<Vec<DbAlerta>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, caso_id, identificacao_id, tipo, severidade, mensagem
             FROM alertas_identificacao
             WHERE caso_id = ?1
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![caso_id], |row| {
            Ok(DbAlerta {
                id: row.get(0)?,
                caso_id: row.get(1)?,
                identificacao_id: row.get(2)?,
                alerta: AlertaDetectado {
                    tipo: label_col(row, 3, TipoAlerta::parse)?,
                    severidade: label_col(row, 4, Severidade::parse)?,
                    mensagem: row.get(5)?,
                },
            })
        })?;

        let mut alertas = Vec::new();
        for row in rows {
            alertas.push(row?);
        }
        Ok(alertas)
    }

    pub fn create_alerta(&self, a: &DbAlerta) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO alertas_identificacao (id, caso_id, identificacao_id, tipo, severidade,
                mensagem)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                a.id,
                a.caso_id,
                a.identificacao_id,
                a.alerta.tipo.as_str(),
                a.alerta.severidade.as_str(),
                a.alerta.mensagem,
            ],
        )?;
        Ok(())
    }

    pub fn delete_alertas_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM alertas_identificacao WHERE caso_id = ?1",
            params![caso_id],
        )?)
    }
}
