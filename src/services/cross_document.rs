//! Merge a secondary document (CTPS, employer declaration, ...) into a case.
//!
//! Comparison is additive. Extractor findings are stored as-is with fresh ids.
//! Findings derived here from employment records get deterministic ids, so
//! comparing the same document twice does not duplicate them.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::analysis::constants::DOCUMENTOS_VINCULO;
use crate::analysis::identity::only_digits;
use crate::competencia::parse_competencia;
use crate::db::{DbInconsistencia, DbPendencia, DbReconciliationRun, DbVinculo};
use crate::error::{Phase, ReconcileError};
use crate::extraction::{ExtractedDocument, ExtractionError, RegistroEmprego, SecondaryDocument};
use crate::services::RunContext;
use crate::store::CaseStore;
use crate::types::{
    EventoReconciliacao, Prioridade, SeveridadeInconsistencia, StatusInconsistencia,
    StatusPendencia,
};
use crate::util::{derived_id, fingerprint, normalize_employer};

pub const TIPO_VINCULO_AUSENTE: &str = "vinculo_ausente_cnis";
pub const TIPO_INICIO_DIVERGENTE: &str = "data_inicio_divergente";
pub const TIPO_FIM_DIVERGENTE: &str = "data_fim_divergente";
pub const TIPO_PENDENCIA_INCLUIR_VINCULO: &str = "incluir_vinculo";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub run: DbReconciliationRun,
    pub inconsistencias: Vec<DbInconsistencia>,
    pub pendencias: Vec<DbPendencia>,
    /// Record-derived findings already present from an earlier comparison.
    pub ja_registradas: usize,
    /// Sequence numbers cited by the extractor with no matching vínculo.
    pub sequencias_desconhecidas: Vec<u32>,
}

/// Find the CNIS vínculo an employment record refers to.
///
/// A CNPJ match counts as a perfect score; otherwise normalized employer
/// names must reach `threshold`. Ties go to the vínculo with the same start
/// competency, which separates re-hires at one employer.
fn match_vinculo<'v>(
    registro: &RegistroEmprego,
    vinculos: &'v [DbVinculo],
    threshold: f64,
) -> Option<&'v DbVinculo> {
    let cnpj = registro
        .cnpj
        .as_deref()
        .map(only_digits)
        .filter(|d| !d.is_empty());
    let nome = normalize_employer(&registro.empregador);
    let inicio = registro.data_inicio.as_deref().and_then(parse_competencia);

    let same_start = |v: &DbVinculo| {
        inicio.is_some() && v.data_inicio.as_deref().and_then(parse_competencia) == inicio
    };

    vinculos
        .iter()
        .map(|v| {
            let cnpj_match = match (&cnpj, v.cnpj.as_deref().map(only_digits)) {
                (Some(a), Some(b)) => *a == b,
                _ => false,
            };
            let score = if cnpj_match {
                1.0
            } else {
                strsim::jaro_winkler(&nome, &normalize_employer(&v.empregador))
            };
            (v, score)
        })
        .filter(|(_, score)| *score >= threshold)
        .max_by(|(a, sa), (b, sb)| {
            same_start(a)
                .cmp(&same_start(b))
                .then(sa.partial_cmp(sb).unwrap_or(Ordering::Equal))
        })
        .map(|(v, _)| v)
}

fn periodo(inicio: Option<&str>, fim: Option<&str>) -> String {
    format!("{} a {}", inicio.unwrap_or("?"), fim.unwrap_or("atual"))
}

/// Findings computed from the document's own employment records.
fn compare_records(
    caso_id: &str,
    doc: &SecondaryDocument,
    vinculos: &[DbVinculo],
    threshold: f64,
    now: &str,
) -> (Vec<DbInconsistencia>, Vec<DbPendencia>) {
    let mut inconsistencias = Vec::new();
    let mut pendencias = Vec::new();

    let inconsistencia = |id: String,
                          tipo: &str,
                          severidade: SeveridadeInconsistencia,
                          (titulo, descricao): (String, String),
                          vinculo_id: Option<String>,
                          (dados_origem, dados_comparacao): (Option<Value>, Option<Value>),
                          correcao: &str| DbInconsistencia {
        id,
        caso_id: caso_id.to_string(),
        tipo: tipo.to_string(),
        severidade,
        titulo,
        descricao,
        documento_origem: "CNIS".to_string(),
        documento_comparacao: doc.rotulo.clone(),
        vinculo_id,
        dados_origem,
        dados_comparacao,
        correcao_sugerida: Some(correcao.to_string()),
        status: StatusInconsistencia::Pendente,
        created_at: now.to_string(),
    };

    for registro in &doc.registros {
        let empregador = registro.empregador.trim();
        let periodo_doc = periodo(registro.data_inicio.as_deref(), registro.data_fim.as_deref());

        let Some(vinculo) = match_vinculo(registro, vinculos, threshold) else {
            let nome_normalizado = normalize_employer(empregador);
            let key: [&str; 5] = [
                caso_id,
                doc.rotulo.as_str(),
                TIPO_VINCULO_AUSENTE,
                nome_normalizado.as_str(),
                registro.data_inicio.as_deref().unwrap_or_default(),
            ];
            inconsistencias.push(inconsistencia(
                derived_id("inc", &key),
                TIPO_VINCULO_AUSENTE,
                SeveridadeInconsistencia::Alta,
                (
                    format!("Vínculo ausente no CNIS: {empregador}"),
                    format!(
                        "{} registra vínculo com {empregador} ({periodo_doc}) sem correspondência no CNIS.",
                        doc.rotulo
                    ),
                ),
                None,
                (None, serde_json::to_value(registro).ok()),
                "Requerer a inclusão do vínculo no CNIS com base no documento apresentado.",
            ));
            pendencias.push(DbPendencia {
                id: derived_id("pen", &key),
                caso_id: caso_id.to_string(),
                titulo: format!("Incluir vínculo no CNIS: {empregador}"),
                descricao: format!(
                    "Vínculo com {empregador} ({periodo_doc}) consta em {} e não no CNIS.",
                    doc.rotulo
                ),
                tipo: TIPO_PENDENCIA_INCLUIR_VINCULO.to_string(),
                prioridade: Prioridade::Alta,
                acao_necessaria: Some(
                    "Reunir a prova do vínculo e requerer a inclusão no CNIS.".to_string(),
                ),
                documentos_necessarios: DOCUMENTOS_VINCULO.iter().map(|d| d.to_string()).collect(),
                vinculo_id: None,
                status: StatusPendencia::Aberta,
                data_resolucao: None,
                impacta_calculo: Some(true),
                contexto: Some(doc.rotulo.clone()),
                created_at: now.to_string(),
                updated_at: now.to_string(),
            });
            continue;
        };

        let checks = [
            (
                TIPO_INICIO_DIVERGENTE,
                "início",
                "dataInicio",
                vinculo.data_inicio.as_deref(),
                registro.data_inicio.as_deref(),
            ),
            (
                TIPO_FIM_DIVERGENTE,
                "fim",
                "dataFim",
                vinculo.data_fim.as_deref(),
                registro.data_fim.as_deref(),
            ),
        ];
        for (tipo, rotulo_campo, campo, cnis_raw, doc_raw) in checks {
            let (Some(cnis_raw), Some(doc_raw)) = (cnis_raw, doc_raw) else {
                continue;
            };
            let (Some(cnis_comp), Some(doc_comp)) =
                (parse_competencia(cnis_raw), parse_competencia(doc_raw))
            else {
                continue;
            };
            if cnis_comp == doc_comp {
                continue;
            }
            inconsistencias.push(inconsistencia(
                derived_id("inc", &[caso_id, doc.rotulo.as_str(), tipo, &vinculo.id]),
                tipo,
                SeveridadeInconsistencia::Media,
                (
                    format!("Data de {rotulo_campo} divergente: {}", vinculo.empregador),
                    format!(
                        "CNIS indica {rotulo_campo} em {cnis_comp}; {} indica {doc_comp}.",
                        doc.rotulo
                    ),
                ),
                Some(vinculo.id.clone()),
                (
                    Some(json!({ campo: cnis_raw })),
                    Some(json!({ campo: doc_raw })),
                ),
                "Conferir o documento original e requerer o acerto da data no CNIS.",
            ));
        }
    }

    (inconsistencias, pendencias)
}

/// Merge a secondary document's findings into the case.
pub fn compare_document<S: CaseStore>(
    store: &S,
    ctx: &RunContext<'_>,
    caso_id: &str,
    extraction: Result<ExtractedDocument, ExtractionError>,
) -> Result<ComparisonReport, ReconcileError> {
    let doc = match extraction.and_then(ExtractedDocument::into_secondary) {
        Ok(doc) => doc,
        Err(e) => {
            log::warn!("Case {caso_id}: secondary document rejected: {e}");
            return Err(e.into());
        }
    };

    let _guard = ctx.locks.acquire(caso_id);
    let started_at = Utc::now().to_rfc3339();
    log::info!(
        "Case {caso_id}: comparing {} ({} records, {} inconsistencies, {} pendencies)",
        doc.rotulo,
        doc.registros.len(),
        doc.inconsistencias.len(),
        doc.pendencias.len()
    );

    let result = store.with_transaction(|tx| apply_comparison(tx, ctx, caso_id, &doc, &started_at));
    match &result {
        Ok(report) => log::info!(
            "Case {caso_id}: {} merged ({} inconsistências, {} pendências, {} already present)",
            doc.rotulo,
            report.inconsistencias.len(),
            report.pendencias.len(),
            report.ja_registradas
        ),
        Err(e) => log::error!("Case {caso_id}: comparison of {} rolled back: {e}", doc.rotulo),
    }
    result
}

fn apply_comparison<S: CaseStore>(
    tx: &S,
    ctx: &RunContext<'_>,
    caso_id: &str,
    doc: &SecondaryDocument,
    now: &str,
) -> Result<ComparisonReport, ReconcileError> {
    let fail = |phase| ReconcileError::persistence(caso_id, phase);

    if tx.get_caso(caso_id).map_err(fail(Phase::Comparacao))?.is_none() {
        return Err(ReconcileError::CaseNotFound(caso_id.to_string()));
    }
    let vinculos = tx.get_vinculos(caso_id).map_err(fail(Phase::Comparacao))?;
    let by_seq: HashMap<u32, &str> = vinculos
        .iter()
        .map(|v| (v.sequencia, v.id.as_str()))
        .collect();

    let mut sequencias_desconhecidas = Vec::new();
    let mut link = |seq: Option<u32>| -> Option<String> {
        let seq = seq?;
        match by_seq.get(&seq) {
            Some(id) => Some(id.to_string()),
            None => {
                log::warn!("Case {caso_id}: finding cites unknown vínculo sequence {seq}");
                if !sequencias_desconhecidas.contains(&seq) {
                    sequencias_desconhecidas.push(seq);
                }
                None
            }
        }
    };

    let mut inconsistencias: Vec<DbInconsistencia> = Vec::new();
    for i in &doc.inconsistencias {
        inconsistencias.push(DbInconsistencia {
            id: uuid::Uuid::new_v4().to_string(),
            caso_id: caso_id.to_string(),
            tipo: i.tipo.trim().to_string(),
            severidade: i.severidade,
            titulo: i.titulo.trim().to_string(),
            descricao: i.descricao.clone(),
            documento_origem: "CNIS".to_string(),
            documento_comparacao: doc.rotulo.clone(),
            vinculo_id: link(i.vinculo_sequencia),
            dados_origem: i.dados_origem.clone(),
            dados_comparacao: i.dados_comparacao.clone(),
            correcao_sugerida: i.correcao_sugerida.clone(),
            status: StatusInconsistencia::Pendente,
            created_at: now.to_string(),
        });
    }

    let mut pendencias: Vec<DbPendencia> = Vec::new();
    for p in &doc.pendencias {
        pendencias.push(DbPendencia {
            id: uuid::Uuid::new_v4().to_string(),
            caso_id: caso_id.to_string(),
            titulo: p.titulo.trim().to_string(),
            descricao: p.descricao.clone(),
            tipo: p.tipo.trim().to_string(),
            prioridade: p.prioridade,
            acao_necessaria: p.acao_necessaria.clone(),
            documentos_necessarios: p.documentos_necessarios.clone(),
            vinculo_id: link(p.vinculo_sequencia),
            status: StatusPendencia::Aberta,
            data_resolucao: None,
            impacta_calculo: p.impacta_calculo,
            contexto: p.contexto.clone(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        });
    }

    // Record-derived findings: skip ids already stored or repeated in this document.
    let mut known: HashSet<String> = tx
        .get_inconsistencias(caso_id)
        .map_err(fail(Phase::Comparacao))?
        .into_iter()
        .map(|i| i.id)
        .chain(
            tx.get_pendencias(caso_id)
                .map_err(fail(Phase::Comparacao))?
                .into_iter()
                .map(|p| p.id),
        )
        .collect();
    let (derived_inc, derived_pen) =
        compare_records(caso_id, doc, &vinculos, ctx.config.employer_match_threshold, now);
    let mut ja_registradas = 0;
    for i in derived_inc {
        if known.insert(i.id.clone()) {
            inconsistencias.push(i);
        } else {
            ja_registradas += 1;
        }
    }
    for p in derived_pen {
        if known.insert(p.id.clone()) {
            pendencias.push(p);
        } else {
            ja_registradas += 1;
        }
    }

    for i in &inconsistencias {
        tx.create_inconsistencia(i).map_err(fail(Phase::Comparacao))?;
    }
    for p in &pendencias {
        tx.create_pendencia(p).map_err(fail(Phase::Comparacao))?;
    }

    let digest = fingerprint(&[
        &serde_json::to_string(&inconsistencias)
            .map_err(|e| fail(Phase::RunLog)(e.into()))?,
        &serde_json::to_string(&pendencias).map_err(|e| fail(Phase::RunLog)(e.into()))?,
    ]);
    let run = DbReconciliationRun {
        id: uuid::Uuid::new_v4().to_string(),
        caso_id: caso_id.to_string(),
        evento: EventoReconciliacao::DocumentoComparado,
        vinculos: 0,
        analises: 0,
        problemas: 0,
        alertas: 0,
        pendencias: pendencias.len() as u32,
        inconsistencias: inconsistencias.len() as u32,
        fingerprint: digest,
        started_at: now.to_string(),
        finished_at: Utc::now().to_rfc3339(),
    };
    tx.create_run(&run).map_err(fail(Phase::RunLog))?;

    Ok(ComparisonReport {
        run,
        inconsistencias,
        pendencias,
        ja_registradas,
        sequencias_desconhecidas,
    })
}
