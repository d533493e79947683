//! Storage seam for the reconciliation services.
//!
//! Services are generic over [`CaseStore`]; [`CaseDb`] is the one backing
//! implementation. Every create/delete here runs inside whatever unit of work
//! the caller opened with [`CaseStore::with_transaction`].

use crate::db::{
    CaseDb, DbAlerta, DbAnaliseCompetencia, DbCaso, DbContribuicao, DbError, DbIdentificacao,
    DbInconsistencia, DbPendencia, DbProblemaRemuneracao, DbReconciliationRun, DbVinculo,
    PendenciaPatch,
};
use crate::types::StatusInconsistencia;

pub trait CaseStore {
    /// Run `f` as one atomic unit: commit on Ok, roll back on Err.
    fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>;

    // Casos
    fn create_caso(&self, nome: &str, cpf: Option<&str>) -> Result<DbCaso, DbError>;
    fn get_caso(&self, id: &str) -> Result<Option<DbCaso>, DbError>;
    fn list_casos(&self) -> Result<Vec<DbCaso>, DbError>;
    fn update_caso_identidade(
        &self,
        id: &str,
        nome: &str,
        cpf: Option<&str>,
    ) -> Result<DbCaso, DbError>;

    // Vínculos and contribuições
    fn get_vinculos(&self, caso_id: &str) -> Result<Vec<DbVinculo>, DbError>;
    fn get_vinculo(&self, id: &str) -> Result<Option<DbVinculo>, DbError>;
    fn create_vinculo(&self, vinculo: &DbVinculo) -> Result<(), DbError>;
    fn delete_vinculos_by_case(&self, caso_id: &str) -> Result<usize, DbError>;
    fn update_vinculo_observacoes(
        &self,
        id: &str,
        observacoes: Option<&str>,
    ) -> Result<DbVinculo, DbError>;
    fn get_contribuicoes(&self, vinculo_id: &str) -> Result<Vec<DbContribuicao>, DbError>;
    fn create_contribuicao(&self, contribuicao: &DbContribuicao) -> Result<(), DbError>;

    // Derived analysis rows
    fn get_analise_competencias(&self, caso_id: &str)
        -> Result<Vec<DbAnaliseCompetencia>, DbError>;
    fn create_analise_competencia(&self, analise: &DbAnaliseCompetencia) -> Result<(), DbError>;
    fn delete_analise_competencias_by_case(&self, caso_id: &str) -> Result<usize, DbError>;
    fn get_problemas_remuneracao(&self, caso_id: &str)
        -> Result<Vec<DbProblemaRemuneracao>, DbError>;
    fn create_problema_remuneracao(&self, problema: &DbProblemaRemuneracao)
        -> Result<(), DbError>;
    fn delete_problemas_remuneracao_by_case(&self, caso_id: &str) -> Result<usize, DbError>;

    // Identification and alerts
    fn get_identificacao(&self, caso_id: &str) -> Result<Option<DbIdentificacao>, DbError>;
    fn create_identificacao(&self, identificacao: &DbIdentificacao) -> Result<(), DbError>;
    fn set_identificacao_validada(&self, id: &str, validada: bool) -> Result<(), DbError>;
    fn delete_identificacao_by_case(&self, caso_id: &str) -> Result<usize, DbError>;
    fn get_alertas(&self, caso_id: &str) -> Result<Vec<DbAlerta>, DbError>;
    fn create_alerta(&self, alerta: &DbAlerta) -> Result<(), DbError>;
    fn delete_alertas_by_case(&self, caso_id: &str) -> Result<usize, DbError>;

    // Pendências
    fn get_pendencias(&self, caso_id: &str) -> Result<Vec<DbPendencia>, DbError>;
    fn get_pendencia(&self, id: &str) -> Result<Option<DbPendencia>, DbError>;
    fn create_pendencia(&self, pendencia: &DbPendencia) -> Result<(), DbError>;
    fn delete_pendencias_by_tipo(&self, caso_id: &str, tipo: &str) -> Result<usize, DbError>;
    fn update_pendencia(&self, id: &str, patch: &PendenciaPatch) -> Result<DbPendencia, DbError>;
    fn relink_pendencia(&self, id: &str, vinculo_id: &str) -> Result<(), DbError>;

    // Inconsistências
    fn get_inconsistencias(&self, caso_id: &str) -> Result<Vec<DbInconsistencia>, DbError>;
    fn get_inconsistencia(&self, id: &str) -> Result<Option<DbInconsistencia>, DbError>;
    fn create_inconsistencia(&self, inconsistencia: &DbInconsistencia) -> Result<(), DbError>;
    fn relink_inconsistencia(&self, id: &str, vinculo_id: &str) -> Result<(), DbError>;
    fn update_inconsistencia_status(
        &self,
        id: &str,
        status: StatusInconsistencia,
    ) -> Result<DbInconsistencia, DbError>;

    // Run log
    fn create_run(&self, run: &DbReconciliationRun) -> Result<(), DbError>;
    fn get_latest_run(&self, caso_id: &str) -> Result<Option<DbReconciliationRun>, DbError>;
}

impl CaseStore for CaseDb {
    fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        CaseDb::with_transaction(self, f)
    }

    fn create_caso(&self, nome: &str, cpf: Option<&str>) -> Result<DbCaso, DbError> {
        CaseDb::create_caso(self, nome, cpf)
    }
    fn get_caso(&self, id: &str) -> Result<Option<DbCaso>, DbError> {
        CaseDb::get_caso(self, id)
    }
    fn list_casos(&self) -> Result<Vec<DbCaso>, DbError> {
        CaseDb::list_casos(self)
    }
    fn update_caso_identidade(
        &self,
        id: &str,
        nome: &str,
        cpf: Option<&str>,
    ) -> Result<DbCaso, DbError> {
        CaseDb::update_caso_identidade(self, id, nome, cpf)
    }

    fn get_vinculos(&self, caso_id: &str) -> Result<Vec<DbVinculo>, DbError> {
        CaseDb::get_vinculos(self, caso_id)
    }
    fn get_vinculo(&self, id: &str) -> Result<Option<DbVinculo>, DbError> {
        CaseDb::get_vinculo(self, id)
    }
    fn create_vinculo(&self, vinculo: &DbVinculo) -> Result<(), DbError> {
        CaseDb::create_vinculo(self, vinculo)
    }
    fn delete_vinculos_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        CaseDb::delete_vinculos_by_case(self, caso_id)
    }
    fn update_vinculo_observacoes(
        &self,
        id: &str,
        observacoes: Option<&str>,
    ) -> Result<DbVinculo, DbError> {
        CaseDb::update_vinculo_observacoes(self, id, observacoes)
    }
    fn get_contribuicoes(&self, vinculo_id: &str) -> Result<Vec<DbContribuicao>, DbError> {
        CaseDb::get_contribuicoes(self, vinculo_id)
    }
    fn create_contribuicao(&self, contribuicao: &DbContribuicao) -> Result<(), DbError> {
        CaseDb::create_contribuicao(self, contribuicao)
    }

    fn get_analise_competencias(
        &self,
        caso_id: &str,
    ) -> Result<Vec<DbAnaliseCompetencia>, DbError> {
        CaseDb::get_analise_competencias(self, caso_id)
    }
    fn create_analise_competencia(&self, analise: &DbAnaliseCompetencia) -> Result<(), DbError> {
        CaseDb::create_analise_competencia(self, analise)
    }
    fn delete_analise_competencias_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        CaseDb::delete_analise_competencias_by_case(self, caso_id)
    }
    fn get_problemas_remuneracao(
        &self,
        caso_id: &str,
    ) -> Result<Vec<DbProblemaRemuneracao>, DbError> {
        CaseDb::get_problemas_remuneracao(self, caso_id)
    }
    fn create_problema_remuneracao(
        &self,
        problema: &DbProblemaRemuneracao,
    ) -> Result<(), DbError> {
        CaseDb::create_problema_remuneracao(self, problema)
    }
    fn delete_problemas_remuneracao_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        CaseDb::delete_problemas_remuneracao_by_case(self, caso_id)
    }

    fn get_identificacao(&self, caso_id: &str) -> Result<Option<DbIdentificacao>, DbError> {
        CaseDb::get_identificacao(self, caso_id)
    }
    fn create_identificacao(&self, identificacao: &DbIdentificacao) -> Result<(), DbError> {
        CaseDb::create_identificacao(self, identificacao)
    }
    fn set_identificacao_validada(&self, id: &str, validada: bool) -> Result<(), DbError> {
        CaseDb::set_identificacao_validada(self, id, validada)
    }
    fn delete_identificacao_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        CaseDb::delete_identificacao_by_case(self, caso_id)
    }
    fn get_alertas(&self, caso_id: &str) -> Result<Vec<DbAlerta>, DbError> {
        CaseDb::get_alertas(self, caso_id)
    }
    fn create_alerta(&self, alerta: &DbAlerta) -> Result<(), DbError> {
        CaseDb::create_alerta(self, alerta)
    }
    fn delete_alertas_by_case(&self, caso_id: &str) -> Result<usize, DbError> {
        CaseDb::delete_alertas_by_case(self, caso_id)
    }

    fn get_pendencias(&self, caso_id: &str) -> Result<Vec<DbPendencia>, DbError> {
        CaseDb::get_pendencias(self, caso_id)
    }
    fn get_pendencia(&self, id: &str) -> Result<Option<DbPendencia>, DbError> {
        CaseDb::get_pendencia(self, id)
    }
    fn create_pendencia(&self, pendencia: &DbPendencia) -> Result<(), DbError> {
        CaseDb::create_pendencia(self, pendencia)
    }
    fn delete_pendencias_by_tipo(&self, caso_id: &str, tipo: &str) -> Result<usize, DbError> {
        CaseDb::delete_pendencias_by_tipo(self, caso_id, tipo)
    }
    fn update_pendencia(&self, id: &str, patch: &PendenciaPatch) -> Result<DbPendencia, DbError> {
        CaseDb::update_pendencia(self, id, patch)
    }
    fn relink_pendencia(&self, id: &str, vinculo_id: &str) -> Result<(), DbError> {
        CaseDb::relink_pendencia(self, id, vinculo_id)
    }

    fn get_inconsistencias(&self, caso_id: &str) -> Result<Vec<DbInconsistencia>, DbError> {
        CaseDb::get_inconsistencias(self, caso_id)
    }
    fn get_inconsistencia(&self, id: &str) -> Result<Option<DbInconsistencia>, DbError> {
        CaseDb::get_inconsistencia(self, id)
    }
    fn create_inconsistencia(&self, inconsistencia: &DbInconsistencia) -> Result<(), DbError> {
        CaseDb::create_inconsistencia(self, inconsistencia)
    }
    fn relink_inconsistencia(&self, id: &str, vinculo_id: &str) -> Result<(), DbError> {
        CaseDb::relink_inconsistencia(self, id, vinculo_id)
    }
    fn update_inconsistencia_status(
        &self,
        id: &str,
        status: StatusInconsistencia,
    ) -> Result<DbInconsistencia, DbError> {
        CaseDb::update_inconsistencia_status(self, id, status)
    }

    fn create_run(&self, run: &DbReconciliationRun) -> Result<(), DbError> {
        CaseDb::create_run(self, run)
    }
    fn get_latest_run(&self, caso_id: &str) -> Result<Option<DbReconciliationRun>, DbError> {
        CaseDb::get_latest_run(self, caso_id)
    }
}
