//! Manual edits between reconciliation runs, plus the case summary.
//!
//! Every write takes the case lock so it cannot interleave with a rebuild.
//! Validation happens before anything is written.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::analysis::GapSummary;
use crate::db::{
    DbCaso, DbError, DbInconsistencia, DbPendencia, DbReconciliationRun, DbVinculo,
    PendenciaPatch,
};
use crate::error::{Phase, ReconcileError};
use crate::services::RunContext;
use crate::store::CaseStore;
use crate::types::{Prioridade, StatusInconsistencia, StatusPendencia, TipoPendenciaAuto};

/// A pendency typed in by the practitioner.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NovaPendencia {
    pub titulo: String,
    #[serde(default)]
    pub descricao: String,
    pub tipo: String,
    pub prioridade: Prioridade,
    #[serde(default)]
    pub acao_necessaria: Option<String>,
    #[serde(default)]
    pub documentos_necessarios: Vec<String>,
    #[serde(default)]
    pub vinculo_id: Option<String>,
    #[serde(default)]
    pub impacta_calculo: Option<bool>,
    #[serde(default)]
    pub contexto: Option<String>,
}

fn not_found(e: DbError, caso_id: &str) -> ReconcileError {
    match e {
        DbError::NotFound { entity, id } => ReconcileError::NotFound { entity, id },
        other => ReconcileError::persistence(caso_id, Phase::Manual)(other),
    }
}

pub fn create_manual_pendencia<S: CaseStore>(
    store: &S,
    ctx: &RunContext<'_>,
    caso_id: &str,
    nova: NovaPendencia,
) -> Result<DbPendencia, ReconcileError> {
    let tipo = nova.tipo.trim();
    if TipoPendenciaAuto::is_auto(tipo) {
        return Err(ReconcileError::ReservedTipo(tipo.to_string()));
    }
    if tipo.is_empty() {
        return Err(ReconcileError::InvalidInput("pendency type is required".into()));
    }
    let titulo = nova.titulo.trim();
    if titulo.is_empty() {
        return Err(ReconcileError::InvalidInput("pendency title is required".into()));
    }

    let _guard = ctx.locks.acquire(caso_id);
    store.with_transaction(|tx| {
        let fail = |e| ReconcileError::persistence(caso_id, Phase::Manual)(e);
        if tx.get_caso(caso_id).map_err(fail)?.is_none() {
            return Err(ReconcileError::CaseNotFound(caso_id.to_string()));
        }
        if let Some(vinculo_id) = &nova.vinculo_id {
            let belongs = tx
                .get_vinculo(vinculo_id)
                .map_err(fail)?
                .is_some_and(|v| v.caso_id == caso_id);
            if !belongs {
                return Err(ReconcileError::InvalidInput(format!(
                    "vínculo {vinculo_id} does not belong to case {caso_id}"
                )));
            }
        }

        let now = Utc::now().to_rfc3339();
        let pendencia = DbPendencia {
            id: uuid::Uuid::new_v4().to_string(),
            caso_id: caso_id.to_string(),
            titulo: titulo.to_string(),
            descricao: nova.descricao.clone(),
            tipo: tipo.to_string(),
            prioridade: nova.prioridade,
            acao_necessaria: nova.acao_necessaria.clone(),
            documentos_necessarios: nova.documentos_necessarios.clone(),
            vinculo_id: nova.vinculo_id.clone(),
            status: StatusPendencia::Aberta,
            data_resolucao: None,
            impacta_calculo: nova.impacta_calculo,
            contexto: nova.contexto.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        tx.create_pendencia(&pendencia).map_err(fail)?;
        log::info!("Case {caso_id}: manual pendency {} ({tipo}) created", pendencia.id);
        Ok(pendencia)
    })
}

/// Move a pendency to `status`.
///
/// Resolving stamps the resolution date; reopening clears it. Setting the
/// current status again returns the row unchanged.
pub fn change_pendencia_status<S: CaseStore>(
    store: &S,
    ctx: &RunContext<'_>,
    pendencia_id: &str,
    status: StatusPendencia,
) -> Result<DbPendencia, ReconcileError> {
    let caso_id = store
        .get_pendencia(pendencia_id)?
        .map(|p| p.caso_id)
        .ok_or_else(|| ReconcileError::NotFound {
            entity: "pendencia",
            id: pendencia_id.to_string(),
        })?;

    let _guard = ctx.locks.acquire(&caso_id);
    store.with_transaction(|tx| {
        // Re-read under the lock: a rebuild may have replaced the row.
        let current = tx
            .get_pendencia(pendencia_id)
            .map_err(ReconcileError::persistence(&caso_id, Phase::Manual))?
            .ok_or_else(|| ReconcileError::NotFound {
                entity: "pendencia",
                id: pendencia_id.to_string(),
            })?;

        if current.status == status {
            return Ok(current);
        }
        if !current.status.can_transition_to(status) {
            return Err(ReconcileError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let data_resolucao = match status {
            StatusPendencia::Resolvida => Some(Some(Utc::now().to_rfc3339())),
            _ if current.status == StatusPendencia::Resolvida => Some(None),
            _ => None,
        };
        let patch = PendenciaPatch {
            status: Some(status),
            data_resolucao,
            ..Default::default()
        };
        let updated = tx
            .update_pendencia(pendencia_id, &patch)
            .map_err(|e| not_found(e, &caso_id))?;
        log::info!(
            "Case {caso_id}: pendency {pendencia_id} {} -> {}",
            current.status,
            status
        );
        Ok(updated)
    })
}

/// Replace the practitioner's note on a vínculo. Blank clears it.
pub fn edit_vinculo_observacoes<S: CaseStore>(
    store: &S,
    ctx: &RunContext<'_>,
    vinculo_id: &str,
    observacoes: Option<&str>,
) -> Result<DbVinculo, ReconcileError> {
    let caso_id = store
        .get_vinculo(vinculo_id)?
        .map(|v| v.caso_id)
        .ok_or_else(|| ReconcileError::NotFound {
            entity: "vinculo",
            id: vinculo_id.to_string(),
        })?;
    let observacoes = observacoes.map(str::trim).filter(|o| !o.is_empty());

    let _guard = ctx.locks.acquire(&caso_id);
    store
        .update_vinculo_observacoes(vinculo_id, observacoes)
        .map_err(|e| not_found(e, &caso_id))
}

pub fn set_inconsistencia_status<S: CaseStore>(
    store: &S,
    ctx: &RunContext<'_>,
    inconsistencia_id: &str,
    status: StatusInconsistencia,
) -> Result<DbInconsistencia, ReconcileError> {
    let caso_id = store
        .get_inconsistencia(inconsistencia_id)?
        .map(|i| i.caso_id)
        .ok_or_else(|| ReconcileError::NotFound {
            entity: "inconsistencia",
            id: inconsistencia_id.to_string(),
        })?;

    let _guard = ctx.locks.acquire(&caso_id);
    let updated = store
        .update_inconsistencia_status(inconsistencia_id, status)
        .map_err(|e| not_found(e, &caso_id))?;
    log::info!("Case {caso_id}: inconsistency {inconsistencia_id} marked {status}");
    Ok(updated)
}

/// Read-only overview of a case for the practitioner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseSummary {
    pub caso: DbCaso,
    pub vinculos: usize,
    /// Unresolved (`aberta` or `pendente`) pendencies by priority label.
    pub pendencias_abertas: BTreeMap<String, usize>,
    pub total_pendencias_abertas: usize,
    pub lacunas: GapSummary,
    pub problemas_por_tipo: BTreeMap<String, usize>,
    pub inconsistencias_pendentes: usize,
    pub identificacao_validada: Option<bool>,
    pub ultima_execucao: Option<DbReconciliationRun>,
}

pub fn case_summary<S: CaseStore>(store: &S, caso_id: &str) -> Result<CaseSummary, ReconcileError> {
    let caso = store
        .get_caso(caso_id)?
        .ok_or_else(|| ReconcileError::CaseNotFound(caso_id.to_string()))?;

    let mut pendencias_abertas = BTreeMap::new();
    let mut total_pendencias_abertas = 0;
    for p in store.get_pendencias(caso_id)? {
        if p.status != StatusPendencia::Resolvida {
            *pendencias_abertas
                .entry(p.prioridade.as_str().to_string())
                .or_insert(0) += 1;
            total_pendencias_abertas += 1;
        }
    }

    let mut problemas_por_tipo = BTreeMap::new();
    for p in store.get_problemas_remuneracao(caso_id)? {
        *problemas_por_tipo
            .entry(p.problema.tipo.as_str().to_string())
            .or_insert(0) += 1;
    }

    let analises = store.get_analise_competencias(caso_id)?;
    let inconsistencias_pendentes = store
        .get_inconsistencias(caso_id)?
        .iter()
        .filter(|i| i.status == StatusInconsistencia::Pendente)
        .count();

    Ok(CaseSummary {
        vinculos: store.get_vinculos(caso_id)?.len(),
        pendencias_abertas,
        total_pendencias_abertas,
        lacunas: GapSummary::from_analyses(analises.iter().map(|a| &a.analise)),
        problemas_por_tipo,
        inconsistencias_pendentes,
        identificacao_validada: store.get_identificacao(caso_id)?.map(|i| i.validada),
        ultima_execucao: store.get_latest_run(caso_id)?,
        caso,
    })
}
