use super::*;

use crate::analysis::{GapAnalysis, ProblemaDetectado};
use crate::types::{Impacto, Severidade, TipoProblema};

impl CaseDb {
    // =========================================================================
    // Análises de competência
    // =========================================================================

    /// One row per vínculo, in vínculo order.
    pub fn get_analise_competencias(
        &self,
        caso_id: &str,
    ) -> Result<Vec<DbAnaliseCompetencia>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.caso_id, a.vinculo_id, a.meses_esperados, a.meses_registrados,
                    a.meses_faltantes, a.impacto, a.mensagem
             FROM analises_competencia a
             JOIN vinculos v ON v.id = a.vinculo_id
             WHERE a.caso_id = ?1
             ORDER BY v.sequencia, a.id",
        )?;
        let rows = stmt.query_map(params![caso_id], |row| {
            Ok(DbAnaliseCompetencia {
                id: row.get(0)?,
                caso_id: row.get(1)?,
                vinculo_id: row.get(2)?,
                analise: GapAnalysis {
                    meses_esperados: row.get(3)?,
                    meses_registrados: row.get(4)?,
                    meses_faltantes: list_col(row, 5)?,
                    impacto: label_col(row, 6, Impacto::parse)?,
                    mensagem: row.get(7)?,
                },
            })
        })?;

        let mut analises = Vec::new();
        for row in rows {
            analises.push(row?);
        }
        Ok(analises)
    }

    pub fn create_analise_competencia(&self, a: &DbAnaliseCompetencia) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO analises_competencia (id, caso_id, vinculo_id, meses_esperados,
                meses_registrados, meses_faltantes, impacto, mensagem)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                a.id,
                a.caso_id,
                a.vinculo_id,
                a.analise.meses_esperados,
                a.analise.meses_registrados,
                serde_json::to_string(&a.analise.meses_faltantes)?,
                a.analise.impacto.as_str(),
                a.analise.mensagem,
            ],
        )?;
        Ok(())
    }

    pub fn delete_analise_competencias_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM analises_competencia WHERE caso_id = ?1",
            params![caso_id],
        )?)
    }

    // =========================================================================
    // Problemas de remuneração
    // =========================================================================

    /// Problems of a case, grouped by vínculo in insertion order.
    pub fn get_problemas_remuneracao(
        &self,
        caso_id: &str,
    ) -> Result<Vec<DbProblemaRemuneracao>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.caso_id, p.vinculo_id, p.competencia, p.valor, p.tipo,
                    p.severidade, p.mensagem
             FROM problemas_remuneracao p
             JOIN vinculos v ON v.id = p.vinculo_id
             WHERE p.caso_id = ?1
             ORDER BY v.sequencia, p.rowid",
        )?;
        let rows = stmt.query_map(params![caso_id], |row| {
            Ok(DbProblemaRemuneracao {
                id: row.get(0)?,
                caso_id: row.get(1)?,
                vinculo_id: row.get(2)?,
                problema: ProblemaDetectado {
                    competencia: row.get(3)?,
                    valor: row.get(4)?,
                    tipo: label_col(row, 5, TipoProblema::parse)?,
                    severidade: label_col(row, 6, Severidade::parse)?,
                    mensagem: row.get(7)?,
                },
            })
        })?;

        let mut problemas = Vec::new();
        for row in rows {
            problemas.push(row?);
        }
        Ok(problemas)
    }

    pub fn create_problema_remuneracao(&self, p: &DbProblemaRemuneracao) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO problemas_remuneracao (id, caso_id, vinculo_id, competencia, valor,
                tipo, severidade, mensagem)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                p.id,
                p.caso_id,
                p.vinculo_id,
                p.problema.competencia,
                p.problema.valor,
                p.problema.tipo.as_str(),
                p.problema.severidade.as_str(),
                p.problema.mensagem,
            ],
        )?;
        Ok(())
    }

    pub fn delete_problemas_remuneracao_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM problemas_remuneracao WHERE caso_id = ?1",
            params![caso_id],
        )?)
    }
}
