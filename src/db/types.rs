//! Row types and errors for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::{AlertaDetectado, GapAnalysis, IdentidadeExtraida, ProblemaDetectado};
use crate::types::{
    EventoReconciliacao, Prioridade, SeveridadeInconsistencia, StatusInconsistencia,
    StatusPendencia,
};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl DbError {
    /// Lock contention from another writer on the same file.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}

/// A row from `casos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCaso {
    pub id: String,
    pub nome: String,
    pub cpf: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from `vinculos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbVinculo {
    pub id: String,
    pub caso_id: String,
    pub sequencia: u32,
    pub empregador: String,
    pub nit: Option<String>,
    pub cnpj: Option<String>,
    pub tipo_vinculo: Option<String>,
    pub data_inicio: Option<String>,
    pub data_fim: Option<String>,
    pub ultima_remuneracao: Option<String>,
    pub indicadores: Vec<String>,
    /// Observations as extracted from the source document.
    pub observacoes: Option<String>,
    pub documento_origem: String,
    /// Practice notes; the only field editable after extraction.
    pub observacoes_usuario: Option<String>,
}

/// A row from `contribuicoes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContribuicao {
    pub id: String,
    pub vinculo_id: String,
    /// Position within the vínculo's source list.
    pub ordem: u32,
    pub competencia: String,
    pub remuneracao: Option<String>,
    pub indicadores: Vec<String>,
}

/// A row from `analises_competencia`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAnaliseCompetencia {
    pub id: String,
    pub caso_id: String,
    pub vinculo_id: String,
    #[serde(flatten)]
    pub analise: GapAnalysis,
}

/// A row from `problemas_remuneracao`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbProblemaRemuneracao {
    pub id: String,
    pub caso_id: String,
    pub vinculo_id: String,
    #[serde(flatten)]
    pub problema: ProblemaDetectado,
}

/// A row from `identificacoes_cnis`. At most one per case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbIdentificacao {
    pub id: String,
    pub caso_id: String,
    #[serde(flatten)]
    pub dados: IdentidadeExtraida,
    /// True iff the last validation produced zero alerts.
    pub validada: bool,
}

/// A row from `alertas_identificacao`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAlerta {
    pub id: String,
    pub caso_id: String,
    pub identificacao_id: String,
    #[serde(flatten)]
    pub alerta: AlertaDetectado,
}

/// A row from `pendencias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPendencia {
    pub id: String,
    pub caso_id: String,
    pub titulo: String,
    pub descricao: String,
    /// Regeneration key. Auto types are listed in `TipoPendenciaAuto`.
    pub tipo: String,
    pub prioridade: Prioridade,
    pub acao_necessaria: Option<String>,
    pub documentos_necessarios: Vec<String>,
    pub vinculo_id: Option<String>,
    pub status: StatusPendencia,
    pub data_resolucao: Option<String>,
    pub impacta_calculo: Option<bool>,
    pub contexto: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial update for a pendency. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendenciaPatch {
    pub titulo: Option<String>,
    pub descricao: Option<String>,
    pub prioridade: Option<Prioridade>,
    pub acao_necessaria: Option<String>,
    pub documentos_necessarios: Option<Vec<String>>,
    pub status: Option<StatusPendencia>,
    /// `Some(None)` clears the resolution timestamp.
    #[serde(default, with = "double_option")]
    pub data_resolucao: Option<Option<String>>,
    pub impacta_calculo: Option<bool>,
    pub contexto: Option<String>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// A row from `inconsistencias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInconsistencia {
    pub id: String,
    pub caso_id: String,
    pub tipo: String,
    pub severidade: SeveridadeInconsistencia,
    pub titulo: String,
    pub descricao: String,
    pub documento_origem: String,
    pub documento_comparacao: String,
    pub vinculo_id: Option<String>,
    pub dados_origem: Option<serde_json::Value>,
    pub dados_comparacao: Option<serde_json::Value>,
    pub correcao_sugerida: Option<String>,
    pub status: StatusInconsistencia,
    pub created_at: String,
}

/// A row from `reconciliation_runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbReconciliationRun {
    pub id: String,
    pub caso_id: String,
    pub evento: EventoReconciliacao,
    pub vinculos: u32,
    pub analises: u32,
    pub problemas: u32,
    pub alertas: u32,
    pub pendencias: u32,
    pub inconsistencias: u32,
    /// SHA-256 over the derived rows written by the run.
    pub fingerprint: String,
    pub started_at: String,
    pub finished_at: String,
}

// =============================================================================
// Column helpers
// =============================================================================

/// Read a label column through the enum's strict `parse`.
pub(crate) fn label_col<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown label {raw:?}").into(),
        )
    })
}

/// Read a JSON array column into a list of strings.
pub(crate) fn list_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Read a nullable JSON payload column.
pub(crate) fn json_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
