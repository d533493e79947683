//! CNIS reconciliation: rebuild every derived row of a case from one extraction.
//!
//! Two entry events:
//! - [`analyze_cnis`]: a (re-)analyzed CNIS replaces the identification,
//!   vínculos, contributions, gap analyses, remuneration problems and the
//!   auto-generated pendencies of the case.
//! - [`edit_claimant_identity`]: the practice corrected the claimant's name or
//!   CPF, so only the identity alerts are re-derived.
//!
//! Each event computes all new rows first, then deletes and recreates inside
//! one transaction while holding the case lock. Derived ids are fingerprints
//! of their inputs, which makes a re-run over unchanged data a no-op.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;

use crate::analysis::constants::{DOCUMENTOS_IDENTIFICACAO, DOCUMENTOS_REMUNERACAO};
use crate::analysis::{
    self, ContribuicaoRef, GapPolicy, GapSummary, IdentidadeExtraida, IdentidadeRegistrada,
    RemuneracaoPolicy, ValidacaoIdentidade,
};
use crate::competencia::normalize_token;
use crate::db::{
    DbAlerta, DbAnaliseCompetencia, DbCaso, DbContribuicao, DbError, DbIdentificacao,
    DbPendencia, DbProblemaRemuneracao, DbReconciliationRun, DbVinculo,
};
use crate::error::{Phase, ReconcileError};
use crate::extraction::{CnisExtraction, ExtractedDocument, ExtractionError};
use crate::services::RunContext;
use crate::store::CaseStore;
use crate::types::{
    EventoReconciliacao, Impacto, Prioridade, Severidade, StatusPendencia, TipoAlerta,
    TipoPendenciaAuto, TipoProblema,
};
use crate::util::{derived_id, fingerprint};

/// Outcome of one orchestrator event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run: DbReconciliationRun,
    pub resumo_lacunas: GapSummary,
    /// `None` when the case has no stored CNIS identification.
    pub identificacao_validada: Option<bool>,
}

// =============================================================================
// Auto-generated pendencies
// =============================================================================

/// Content of an auto pendency before ids and timestamps are assigned.
struct Draft {
    titulo: String,
    descricao: String,
    prioridade: Prioridade,
    acao_necessaria: &'static str,
    documentos: &'static [&'static str],
    vinculo_id: Option<String>,
    impacta_calculo: bool,
    contexto: Option<String>,
}

/// Builds auto pendencies with deterministic ids.
///
/// When a row with the same id existed before the run, its status, resolution
/// date and timestamps carry over, so a practitioner's triage survives a
/// rebuild that reproduces the same finding.
struct AutoPendencias<'a> {
    caso_id: &'a str,
    previous: HashMap<&'a str, &'a DbPendencia>,
    now: &'a str,
}

impl<'a> AutoPendencias<'a> {
    fn new(caso_id: &'a str, previous: &'a [DbPendencia], now: &'a str) -> Self {
        Self {
            caso_id,
            previous: previous
                .iter()
                .filter(|p| TipoPendenciaAuto::is_auto(&p.tipo))
                .map(|p| (p.id.as_str(), p))
                .collect(),
            now,
        }
    }

    fn build(&self, tipo: TipoPendenciaAuto, key: &str, draft: Draft) -> DbPendencia {
        let mut p = DbPendencia {
            id: derived_id("pen", &[self.caso_id, tipo.as_str(), key]),
            caso_id: self.caso_id.to_string(),
            titulo: draft.titulo,
            descricao: draft.descricao,
            tipo: tipo.as_str().to_string(),
            prioridade: draft.prioridade,
            acao_necessaria: Some(draft.acao_necessaria.to_string()),
            documentos_necessarios: draft.documentos.iter().map(|d| d.to_string()).collect(),
            vinculo_id: draft.vinculo_id,
            status: StatusPendencia::Aberta,
            data_resolucao: None,
            impacta_calculo: Some(draft.impacta_calculo),
            contexto: draft.contexto,
            created_at: self.now.to_string(),
            updated_at: self.now.to_string(),
        };

        if let Some(prev) = self.previous.get(p.id.as_str()) {
            p.status = prev.status;
            p.data_resolucao = prev.data_resolucao.clone();
            p.created_at = prev.created_at.clone();
            if same_content(prev, &p) {
                p.updated_at = prev.updated_at.clone();
            }
        }
        p
    }
}

fn same_content(a: &DbPendencia, b: &DbPendencia) -> bool {
    a.titulo == b.titulo
        && a.descricao == b.descricao
        && a.prioridade == b.prioridade
        && a.acao_necessaria == b.acao_necessaria
        && a.documentos_necessarios == b.documentos_necessarios
        && a.vinculo_id == b.vinculo_id
        && a.impacta_calculo == b.impacta_calculo
        && a.contexto == b.contexto
}

// =============================================================================
// Planning (pure)
// =============================================================================

struct IdentityPlan {
    identificacao: Option<DbIdentificacao>,
    validacao: Option<ValidacaoIdentidade>,
    alertas: Vec<DbAlerta>,
    pendencias: Vec<DbPendencia>,
}

struct CnisPlan {
    identity: IdentityPlan,
    vinculos: Vec<(DbVinculo, Vec<DbContribuicao>)>,
    analises: Vec<DbAnaliseCompetencia>,
    pendencias_faltantes: Vec<DbPendencia>,
    problemas: Vec<DbProblemaRemuneracao>,
    pendencias_remuneracao: Vec<DbPendencia>,
}

fn titulo_alerta(tipo: TipoAlerta) -> &'static str {
    match tipo {
        TipoAlerta::CpfDivergente => "CPF divergente entre CNIS e cadastro",
        TipoAlerta::NomeDivergente => "Nome divergente entre CNIS e cadastro",
        TipoAlerta::MultiplosNits => "Múltiplos NITs no CNIS",
        TipoAlerta::NomeMaeAusente => "Nome da mãe ausente no CNIS",
    }
}

/// Validate a stored or extracted identification against the case.
fn plan_identity_alerts(
    caso: &DbCaso,
    identificacao_id: &str,
    dados: &IdentidadeExtraida,
    auto: &AutoPendencias<'_>,
) -> (ValidacaoIdentidade, Vec<DbAlerta>, Vec<DbPendencia>) {
    let validacao = analysis::validate_identification(
        dados,
        IdentidadeRegistrada {
            nome: Some(caso.nome.as_str()),
            cpf: caso.cpf.as_deref(),
        },
    );

    let mut alertas = Vec::new();
    let mut pendencias = Vec::new();
    for alerta in &validacao.alertas {
        if alerta.severidade == Severidade::Alta {
            pendencias.push(auto.build(
                TipoPendenciaAuto::IdentificacaoDivergente,
                alerta.tipo.as_str(),
                Draft {
                    titulo: titulo_alerta(alerta.tipo).to_string(),
                    descricao: alerta.mensagem.clone(),
                    prioridade: Prioridade::Alta,
                    acao_necessaria: "Conferir documentos pessoais e, se necessário, requerer a atualização cadastral no INSS.",
                    documentos: DOCUMENTOS_IDENTIFICACAO,
                    vinculo_id: None,
                    impacta_calculo: false,
                    contexto: Some(alerta.tipo.as_str().to_string()),
                },
            ));
        }
        alertas.push(DbAlerta {
            id: derived_id("ale", &[&caso.id, alerta.tipo.as_str()]),
            caso_id: caso.id.clone(),
            identificacao_id: identificacao_id.to_string(),
            alerta: alerta.clone(),
        });
    }
    (validacao, alertas, pendencias)
}

fn plan_identity(
    caso: &DbCaso,
    extraida: Option<&IdentidadeExtraida>,
    auto: &AutoPendencias<'_>,
) -> IdentityPlan {
    match extraida {
        Some(dados) => {
            let id = derived_id("idt", &[&caso.id]);
            let (validacao, alertas, pendencias) = plan_identity_alerts(caso, &id, dados, auto);
            IdentityPlan {
                identificacao: Some(DbIdentificacao {
                    id,
                    caso_id: caso.id.clone(),
                    dados: dados.clone(),
                    validada: validacao.tudo_ok,
                }),
                validacao: Some(validacao),
                alertas,
                pendencias,
            }
        }
        None => IdentityPlan {
            identificacao: None,
            validacao: None,
            alertas: Vec::new(),
            pendencias: vec![auto.build(
                TipoPendenciaAuto::IdentificacaoAusente,
                "",
                Draft {
                    titulo: "Identificação do segurado ausente no CNIS".to_string(),
                    descricao: "Não foi possível extrair nome, CPF e NIT do CNIS. Conferir a identificação manualmente.".to_string(),
                    prioridade: Prioridade::Media,
                    acao_necessaria: "Conferir a identificação do segurado no CNIS original.",
                    documentos: DOCUMENTOS_IDENTIFICACAO,
                    vinculo_id: None,
                    impacta_calculo: false,
                    contexto: None,
                },
            )],
        },
    }
}

fn problem_draft(
    problema: &crate::analysis::ProblemaDetectado,
    empregador: &str,
    vinculo_id: &str,
) -> Draft {
    let (titulo, acao) = match problema.tipo {
        TipoProblema::Zerada => (
            format!("Remuneração zerada em {} ({empregador})", problema.competencia),
            "Comprovar a remuneração efetivamente recebida na competência.",
        ),
        TipoProblema::Ausente => (
            format!("Remuneração ausente em {} ({empregador})", problema.competencia),
            "Obter comprovante da remuneração da competência e requerer o acerto no CNIS.",
        ),
        TipoProblema::MuitoBaixa => (
            format!("Remuneração abaixo do mínimo em {} ({empregador})", problema.competencia),
            "Verificar se houve complementação da contribuição.",
        ),
    };
    Draft {
        titulo,
        descricao: problema.mensagem.clone(),
        prioridade: Prioridade::Alta,
        acao_necessaria: acao,
        documentos: DOCUMENTOS_REMUNERACAO,
        vinculo_id: Some(vinculo_id.to_string()),
        impacta_calculo: true,
        contexto: Some(problema.competencia.clone()),
    }
}

/// Compute every row a CNIS run will write. Nothing is deleted yet.
fn plan_cnis(
    caso: &DbCaso,
    cnis: &CnisExtraction,
    auto: &AutoPendencias<'_>,
    observacoes: &HashMap<String, String>,
    ctx: &RunContext<'_>,
) -> CnisPlan {
    let gap_policy = GapPolicy::from(ctx.config);
    let rem_policy = RemuneracaoPolicy::from(ctx.config);

    let identity = plan_identity(caso, cnis.identificacao.as_ref(), auto);
    let mut vinculos = Vec::with_capacity(cnis.vinculos.len());
    let mut analises = Vec::new();
    let mut pendencias_faltantes = Vec::new();
    let mut problemas = Vec::new();
    let mut pendencias_remuneracao = Vec::new();

    for v in &cnis.vinculos {
        let vinculo_id = derived_id("vin", &[&caso.id, &v.sequencia.to_string()]);
        let row = DbVinculo {
            id: vinculo_id.clone(),
            caso_id: caso.id.clone(),
            sequencia: v.sequencia,
            empregador: v.empregador.clone(),
            nit: v.nit.clone(),
            cnpj: v.cnpj.clone(),
            tipo_vinculo: v.tipo_vinculo.clone(),
            data_inicio: v.data_inicio.clone(),
            data_fim: v.data_fim.clone(),
            ultima_remuneracao: v.ultima_remuneracao.clone(),
            indicadores: v.indicadores.clone(),
            observacoes: v.observacoes.clone(),
            documento_origem: "CNIS".to_string(),
            observacoes_usuario: observacoes.get(&vinculo_id).cloned(),
        };
        let contribuicoes: Vec<DbContribuicao> = v
            .contribuicoes
            .iter()
            .enumerate()
            .map(|(ordem, c)| DbContribuicao {
                id: derived_id("con", &[&vinculo_id, &ordem.to_string()]),
                vinculo_id: vinculo_id.clone(),
                ordem: ordem as u32,
                competencia: normalize_token(&c.competencia)
                    .unwrap_or_else(|| c.competencia.clone()),
                remuneracao: c.remuneracao.clone(),
                indicadores: c.indicadores.clone(),
            })
            .collect();

        let registradas =
            analysis::registered_set(contribuicoes.iter().map(|c| c.competencia.as_str()));
        match analysis::analyze_competencies(
            v.data_inicio.as_deref(),
            v.data_fim.as_deref(),
            &registradas,
            ctx.today,
            &gap_policy,
        ) {
            Some(analise) => {
                if analise.impacto == Impacto::Alto && !analise.meses_faltantes.is_empty() {
                    pendencias_faltantes.push(auto.build(
                        TipoPendenciaAuto::RemuneracoesFaltantes,
                        &vinculo_id,
                        Draft {
                            titulo: format!("Competências sem contribuição: {}", v.empregador),
                            descricao: format!(
                                "Vínculo {} ({}): {}",
                                v.sequencia, v.empregador, analise.mensagem
                            ),
                            prioridade: Prioridade::Alta,
                            acao_necessaria: "Reunir comprovantes de remuneração e requerer a inclusão das competências no CNIS.",
                            documentos: DOCUMENTOS_REMUNERACAO,
                            vinculo_id: Some(vinculo_id.clone()),
                            impacta_calculo: true,
                            contexto: Some(format!(
                                "Competências faltantes: {}",
                                analise.meses_faltantes.join(", ")
                            )),
                        },
                    ));
                }
                analises.push(DbAnaliseCompetencia {
                    id: derived_id("ana", &[&vinculo_id]),
                    caso_id: caso.id.clone(),
                    vinculo_id: vinculo_id.clone(),
                    analise,
                });
            }
            None => log::debug!(
                "Case {}: vínculo {} has no usable start date, skipping gap analysis",
                caso.id,
                v.sequencia
            ),
        }

        // Problem ids follow the contribution's position, not the problem count.
        let detectados = contribuicoes.iter().flat_map(|c| {
            let r = ContribuicaoRef {
                competencia: &c.competencia,
                remuneracao: c.remuneracao.as_deref(),
            };
            analysis::detect_remuneration_problems(&v.empregador, &[r], &rem_policy)
                .into_iter()
                .map(move |p| (c.ordem, p))
        });
        for (ordem, problema) in detectados {
            let id = derived_id(
                "pro",
                &[
                    &vinculo_id,
                    &ordem.to_string(),
                    &problema.competencia,
                    problema.tipo.as_str(),
                ],
            );
            if problema.severidade == Severidade::Alta {
                pendencias_remuneracao.push(auto.build(
                    problema.tipo.tipo_pendencia(),
                    &id,
                    problem_draft(&problema, &v.empregador, &vinculo_id),
                ));
            }
            problemas.push(DbProblemaRemuneracao {
                id,
                caso_id: caso.id.clone(),
                vinculo_id: vinculo_id.clone(),
                problema,
            });
        }

        vinculos.push((row, contribuicoes));
    }

    CnisPlan {
        identity,
        vinculos,
        analises,
        pendencias_faltantes,
        problemas,
        pendencias_remuneracao,
    }
}

/// SHA-256 over the serialized rows of every derived family.
fn digest<T: Serialize>(families: &[&[T]]) -> Result<String, DbError> {
    let mut parts = Vec::with_capacity(families.len());
    for family in families {
        parts.push(serde_json::to_string(family)?);
    }
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    Ok(fingerprint(&refs))
}

// =============================================================================
// Events
// =============================================================================

/// Rebuild a case from a CNIS extraction.
///
/// A failed or malformed extraction is rejected here, before the case lock or
/// any transaction is taken, so the previous derived state stays untouched.
pub fn analyze_cnis<S: CaseStore>(
    store: &S,
    ctx: &RunContext<'_>,
    caso_id: &str,
    extraction: Result<ExtractedDocument, ExtractionError>,
) -> Result<RunReport, ReconcileError> {
    let cnis = match extraction.and_then(ExtractedDocument::into_cnis) {
        Ok(cnis) => cnis,
        Err(e) => {
            log::warn!("Case {caso_id}: CNIS extraction rejected, prior state kept: {e}");
            return Err(e.into());
        }
    };

    let _guard = ctx.locks.acquire(caso_id);
    let started_at = Utc::now().to_rfc3339();
    log::info!(
        "Case {caso_id}: CNIS reconciliation started ({} vínculos)",
        cnis.vinculos.len()
    );

    let result = store.with_transaction(|tx| apply_cnis(tx, ctx, caso_id, &cnis, &started_at));
    match &result {
        Ok(report) => log::info!(
            "Case {caso_id}: CNIS reconciliation committed ({} análises, {} problemas, {} pendências)",
            report.run.analises,
            report.run.problemas,
            report.run.pendencias
        ),
        Err(e) => log::error!("Case {caso_id}: CNIS reconciliation rolled back: {e}"),
    }
    result
}

fn apply_cnis<S: CaseStore>(
    tx: &S,
    ctx: &RunContext<'_>,
    caso_id: &str,
    cnis: &CnisExtraction,
    started_at: &str,
) -> Result<RunReport, ReconcileError> {
    let fail = |phase| ReconcileError::persistence(caso_id, phase);

    let caso = tx
        .get_caso(caso_id)
        .map_err(fail(Phase::Identificacao))?
        .ok_or_else(|| ReconcileError::CaseNotFound(caso_id.to_string()))?;
    let previous = tx.get_pendencias(caso_id).map_err(fail(Phase::Identificacao))?;
    // Practitioner notes survive when the vínculo keeps its sequence number.
    let observacoes: HashMap<String, String> = tx
        .get_vinculos(caso_id)
        .map_err(fail(Phase::Vinculos))?
        .into_iter()
        .filter_map(|v| Some((v.id, v.observacoes_usuario?)))
        .collect();
    // Manual pendencies and inconsistencies are not rebuilt. Their links are
    // restored below when the same vínculo id comes back.
    let pendencia_links: Vec<(String, String)> = previous
        .iter()
        .filter(|p| !TipoPendenciaAuto::is_auto(&p.tipo))
        .filter_map(|p| Some((p.id.clone(), p.vinculo_id.clone()?)))
        .collect();
    let inconsistencia_links: Vec<(String, String)> = tx
        .get_inconsistencias(caso_id)
        .map_err(fail(Phase::Vinculos))?
        .into_iter()
        .filter_map(|i| Some((i.id, i.vinculo_id?)))
        .collect();
    let auto = AutoPendencias::new(caso_id, &previous, started_at);
    let plan = plan_cnis(&caso, cnis, &auto, &observacoes, ctx);

    // Identification, alerts and identity pendencies.
    log::debug!("Case {caso_id}: phase {}", Phase::Identificacao);
    tx.delete_alertas_by_case(caso_id)
        .map_err(fail(Phase::Identificacao))?;
    tx.delete_identificacao_by_case(caso_id)
        .map_err(fail(Phase::Identificacao))?;
    for tipo in [
        TipoPendenciaAuto::IdentificacaoDivergente,
        TipoPendenciaAuto::IdentificacaoAusente,
    ] {
        tx.delete_pendencias_by_tipo(caso_id, tipo.as_str())
            .map_err(fail(Phase::Identificacao))?;
    }
    if let Some(identificacao) = &plan.identity.identificacao {
        tx.create_identificacao(identificacao)
            .map_err(fail(Phase::Identificacao))?;
    }
    for alerta in &plan.identity.alertas {
        tx.create_alerta(alerta).map_err(fail(Phase::Identificacao))?;
    }
    for p in &plan.identity.pendencias {
        tx.create_pendencia(p).map_err(fail(Phase::Identificacao))?;
    }

    // Vínculos and contributions.
    log::debug!("Case {caso_id}: phase {}", Phase::Vinculos);
    tx.delete_problemas_remuneracao_by_case(caso_id)
        .map_err(fail(Phase::Vinculos))?;
    tx.delete_vinculos_by_case(caso_id)
        .map_err(fail(Phase::Vinculos))?;
    for (vinculo, contribuicoes) in &plan.vinculos {
        tx.create_vinculo(vinculo).map_err(fail(Phase::Vinculos))?;
        for c in contribuicoes {
            tx.create_contribuicao(c).map_err(fail(Phase::Vinculos))?;
        }
    }
    let rebuilt: HashSet<&str> = plan.vinculos.iter().map(|(v, _)| v.id.as_str()).collect();
    for (id, vinculo_id) in &pendencia_links {
        if rebuilt.contains(vinculo_id.as_str()) {
            tx.relink_pendencia(id, vinculo_id)
                .map_err(fail(Phase::Vinculos))?;
        }
    }
    for (id, vinculo_id) in &inconsistencia_links {
        if rebuilt.contains(vinculo_id.as_str()) {
            tx.relink_inconsistencia(id, vinculo_id)
                .map_err(fail(Phase::Vinculos))?;
        }
    }

    // Competency gaps.
    log::debug!("Case {caso_id}: phase {}", Phase::Competencias);
    tx.delete_analise_competencias_by_case(caso_id)
        .map_err(fail(Phase::Competencias))?;
    tx.delete_pendencias_by_tipo(caso_id, TipoPendenciaAuto::RemuneracoesFaltantes.as_str())
        .map_err(fail(Phase::Competencias))?;
    for analise in &plan.analises {
        tx.create_analise_competencia(analise)
            .map_err(fail(Phase::Competencias))?;
    }
    for p in &plan.pendencias_faltantes {
        tx.create_pendencia(p).map_err(fail(Phase::Competencias))?;
    }

    // Remuneration problems.
    log::debug!("Case {caso_id}: phase {}", Phase::Remuneracao);
    for tipo in TipoPendenciaAuto::REMUNERACAO {
        tx.delete_pendencias_by_tipo(caso_id, tipo.as_str())
            .map_err(fail(Phase::Remuneracao))?;
    }
    for problema in &plan.problemas {
        tx.create_problema_remuneracao(problema)
            .map_err(fail(Phase::Remuneracao))?;
    }
    for p in &plan.pendencias_remuneracao {
        tx.create_pendencia(p).map_err(fail(Phase::Remuneracao))?;
    }

    let auto_pendencias: Vec<&DbPendencia> = plan
        .identity
        .pendencias
        .iter()
        .chain(&plan.pendencias_faltantes)
        .chain(&plan.pendencias_remuneracao)
        .collect();
    let digests = [
        digest(&[plan.analises.as_slice()]),
        digest(&[plan.problemas.as_slice()]),
        digest(&[plan.identity.alertas.as_slice()]),
        digest(&[auto_pendencias.as_slice()]),
    ]
    .into_iter()
    .collect::<Result<Vec<_>, _>>()
    .map_err(fail(Phase::RunLog))?
    .join(":");

    let run = DbReconciliationRun {
        id: uuid::Uuid::new_v4().to_string(),
        caso_id: caso_id.to_string(),
        evento: EventoReconciliacao::CnisAnalisado,
        vinculos: plan.vinculos.len() as u32,
        analises: plan.analises.len() as u32,
        problemas: plan.problemas.len() as u32,
        alertas: plan.identity.alertas.len() as u32,
        pendencias: auto_pendencias.len() as u32,
        inconsistencias: 0,
        fingerprint: fingerprint(&[digests.as_str()]),
        started_at: started_at.to_string(),
        finished_at: Utc::now().to_rfc3339(),
    };
    tx.create_run(&run).map_err(fail(Phase::RunLog))?;

    Ok(RunReport {
        run,
        resumo_lacunas: GapSummary::from_analyses(plan.analises.iter().map(|a| &a.analise)),
        identificacao_validada: plan.identity.validacao.as_ref().map(|v| v.tudo_ok),
    })
}

/// Re-validate the stored identification after a manual name/CPF edit.
///
/// `identificacao_ausente` is left alone: it reflects the CNIS extraction,
/// not the registered identity.
pub fn edit_claimant_identity<S: CaseStore>(
    store: &S,
    ctx: &RunContext<'_>,
    caso_id: &str,
    nome: &str,
    cpf: Option<&str>,
) -> Result<RunReport, ReconcileError> {
    let nome = nome.trim();
    if nome.is_empty() {
        return Err(ReconcileError::InvalidInput(
            "claimant name cannot be empty".to_string(),
        ));
    }

    let _guard = ctx.locks.acquire(caso_id);
    let started_at = Utc::now().to_rfc3339();
    log::info!("Case {caso_id}: claimant identity edited, re-validating");

    let result = store.with_transaction(|tx| {
        let fail = |phase| ReconcileError::persistence(caso_id, phase);

        let caso = tx
            .update_caso_identidade(caso_id, nome, cpf)
            .map_err(|e| match e {
                DbError::NotFound { .. } => ReconcileError::CaseNotFound(caso_id.to_string()),
                other => fail(Phase::Identificacao)(other),
            })?;
        let previous = tx.get_pendencias(caso_id).map_err(fail(Phase::Identificacao))?;
        let identificacao = tx
            .get_identificacao(caso_id)
            .map_err(fail(Phase::Identificacao))?;
        let auto = AutoPendencias::new(caso_id, &previous, &started_at);
        let planned = identificacao
            .as_ref()
            .map(|i| plan_identity_alerts(&caso, &i.id, &i.dados, &auto));

        tx.delete_alertas_by_case(caso_id)
            .map_err(fail(Phase::Identificacao))?;
        tx.delete_pendencias_by_tipo(
            caso_id,
            TipoPendenciaAuto::IdentificacaoDivergente.as_str(),
        )
        .map_err(fail(Phase::Identificacao))?;

        let (alertas, pendencias, validada) = match (&identificacao, planned) {
            (Some(i), Some((validacao, alertas, pendencias))) => {
                for a in &alertas {
                    tx.create_alerta(a).map_err(fail(Phase::Identificacao))?;
                }
                for p in &pendencias {
                    tx.create_pendencia(p).map_err(fail(Phase::Identificacao))?;
                }
                tx.set_identificacao_validada(&i.id, validacao.tudo_ok)
                    .map_err(fail(Phase::Identificacao))?;
                (alertas, pendencias, Some(validacao.tudo_ok))
            }
            _ => (Vec::new(), Vec::new(), None),
        };

        let analises = tx
            .get_analise_competencias(caso_id)
            .map_err(fail(Phase::RunLog))?;
        let digests = [digest(&[alertas.as_slice()]), digest(&[pendencias.as_slice()])]
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail(Phase::RunLog))?
            .join(":");

        let run = DbReconciliationRun {
            id: uuid::Uuid::new_v4().to_string(),
            caso_id: caso_id.to_string(),
            evento: EventoReconciliacao::IdentidadeEditada,
            vinculos: 0,
            analises: 0,
            problemas: 0,
            alertas: alertas.len() as u32,
            pendencias: pendencias.len() as u32,
            inconsistencias: 0,
            fingerprint: fingerprint(&[digests.as_str()]),
            started_at: started_at.clone(),
            finished_at: Utc::now().to_rfc3339(),
        };
        tx.create_run(&run).map_err(fail(Phase::RunLog))?;

        Ok(RunReport {
            run,
            resumo_lacunas: GapSummary::from_analyses(analises.iter().map(|a| &a.analise)),
            identificacao_validada: validada,
        })
    });

    if let Err(e) = &result {
        log::error!("Case {caso_id}: identity re-validation rolled back: {e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::db::test_utils::test_db;
    use crate::db::{CaseDb, PendenciaPatch};
    use crate::extraction::{CnisPayload, ContribuicaoExtraida, VinculoExtraido};
    use crate::db::DbInconsistencia;
    use crate::services::locks::CaseLocks;
    use crate::types::{ReconcileConfig, SeveridadeInconsistencia, StatusInconsistencia};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn identidade() -> IdentidadeExtraida {
        IdentidadeExtraida {
            nome: Some("João da Silva".to_string()),
            cpf: Some("123.456.789-00".to_string()),
            nome_mae: Some("Maria da Silva".to_string()),
            nits: vec!["123.45678.90-1".to_string()],
            data_nascimento: Some("10/04/1965".to_string()),
        }
    }

    /// Vínculo 2019-01..2019-12 with every month paid except `missing`.
    fn vinculo_2019(seq: u32, empregador: &str, missing: &[u32]) -> VinculoExtraido {
        VinculoExtraido {
            sequencia: seq,
            empregador: empregador.to_string(),
            data_inicio: Some("01/01/2019".to_string()),
            data_fim: Some("31/12/2019".to_string()),
            contribuicoes: (1..=12)
                .filter(|m| !missing.contains(m))
                .map(|m| ContribuicaoExtraida {
                    competencia: format!("{m:02}/2019"),
                    remuneracao: Some("2.500,00".to_string()),
                    indicadores: vec![],
                })
                .collect(),
            ..Default::default()
        }
    }

    fn cnis(
        identificacao: Option<IdentidadeExtraida>,
        vinculos: Vec<VinculoExtraido>,
    ) -> Result<ExtractedDocument, ExtractionError> {
        Ok(ExtractedDocument::Cnis(CnisPayload {
            identificacao,
            vinculos,
        }))
    }

    struct Fixture {
        db: CaseDb,
        config: ReconcileConfig,
        locks: CaseLocks,
        caso_id: String,
    }

    impl Fixture {
        fn new() -> Self {
            let db = test_db();
            let caso = db
                .create_caso("João da Silva", Some("123.456.789-00"))
                .expect("caso");
            Self {
                db,
                config: ReconcileConfig::default(),
                locks: CaseLocks::new(),
                caso_id: caso.id,
            }
        }

        fn ctx(&self) -> RunContext<'_> {
            RunContext::new(&self.config)
                .with_locks(&self.locks)
                .with_today(today())
        }

        fn analyze(
            &self,
            doc: Result<ExtractedDocument, ExtractionError>,
        ) -> Result<RunReport, ReconcileError> {
            analyze_cnis(&self.db, &self.ctx(), &self.caso_id, doc)
        }

        fn pendencias_tipo(&self, tipo: TipoPendenciaAuto) -> Vec<DbPendencia> {
            self.db
                .get_pendencias(&self.caso_id)
                .expect("pendencias")
                .into_iter()
                .filter(|p| p.tipo == tipo.as_str())
                .collect()
        }
    }

    #[test]
    fn test_single_mid_span_gap_is_baixo_without_pendency() {
        let f = Fixture::new();
        let report = f
            .analyze(cnis(Some(identidade()), vec![vinculo_2019(1, "ABC Ltda", &[7])]))
            .expect("run");

        let analises = f.db.get_analise_competencias(&f.caso_id).expect("analises");
        assert_eq!(analises.len(), 1);
        assert_eq!(analises[0].analise.meses_faltantes, vec!["2019-07".to_string()]);
        assert_eq!(analises[0].analise.impacto, Impacto::Baixo);
        assert!(f.db.get_pendencias(&f.caso_id).expect("pendencias").is_empty());
        assert_eq!(report.identificacao_validada, Some(true));
        assert_eq!(report.resumo_lacunas.vinculos_com_lacuna, 1);
    }

    #[test]
    fn test_five_gaps_flip_to_alto_with_one_pendency() {
        let f = Fixture::new();
        f.analyze(cnis(
            Some(identidade()),
            vec![vinculo_2019(1, "ABC Ltda", &[3, 4, 5, 7, 9])],
        ))
        .expect("run");

        let analises = f.db.get_analise_competencias(&f.caso_id).expect("analises");
        assert_eq!(analises[0].analise.impacto, Impacto::Alto);

        let pendencias = f.pendencias_tipo(TipoPendenciaAuto::RemuneracoesFaltantes);
        assert_eq!(pendencias.len(), 1);
        assert_eq!(pendencias[0].vinculo_id.as_deref(), Some(analises[0].vinculo_id.as_str()));
        assert_eq!(pendencias[0].prioridade, Prioridade::Alta);
        assert_eq!(pendencias[0].impacta_calculo, Some(true));
        assert!(pendencias[0]
            .contexto
            .as_deref()
            .unwrap_or_default()
            .contains("2019-03"));
    }

    #[test]
    fn test_rerun_on_unchanged_input_is_identical() {
        let f = Fixture::new();
        let mut v = vinculo_2019(1, "ABC Ltda", &[3, 4, 5, 7, 9]);
        v.contribuicoes[0].remuneracao = Some("0,00".to_string());
        let input = || cnis(Some(identidade()), vec![v.clone()]);

        let first = f.analyze(input()).expect("first");
        let analises = f.db.get_analise_competencias(&f.caso_id).expect("a");
        let problemas = f.db.get_problemas_remuneracao(&f.caso_id).expect("p");
        let pendencias = f.db.get_pendencias(&f.caso_id).expect("pend");

        let second = f.analyze(input()).expect("second");
        assert_eq!(f.db.get_analise_competencias(&f.caso_id).expect("a"), analises);
        assert_eq!(f.db.get_problemas_remuneracao(&f.caso_id).expect("p"), problemas);
        assert_eq!(f.db.get_pendencias(&f.caso_id).expect("pend"), pendencias);
        assert_eq!(first.run.fingerprint, second.run.fingerprint);
        assert_eq!(pendencias.len(), 2);
    }

    #[test]
    fn test_reanalysis_replaces_previous_rows() {
        let f = Fixture::new();
        f.analyze(cnis(
            Some(identidade()),
            vec![
                vinculo_2019(1, "ABC Ltda", &[]),
                vinculo_2019(2, "XYZ S/A", &[]),
                vinculo_2019(3, "Padaria Pão Quente", &[]),
            ],
        ))
        .expect("first");
        assert_eq!(f.db.get_analise_competencias(&f.caso_id).expect("a").len(), 3);
        let old_vinculos = f.db.get_vinculos(&f.caso_id).expect("v");

        f.analyze(cnis(Some(identidade()), vec![vinculo_2019(1, "Outra Ltda", &[])]))
            .expect("second");
        assert_eq!(f.db.get_analise_competencias(&f.caso_id).expect("a").len(), 1);
        assert_eq!(f.db.get_vinculos(&f.caso_id).expect("v").len(), 1);
        for old in old_vinculos.iter().skip(1) {
            assert!(f.db.get_contribuicoes(&old.id).expect("c").is_empty());
        }
    }

    #[test]
    fn test_manual_pendencies_survive_rebuild() {
        let f = Fixture::new();
        f.analyze(cnis(Some(identidade()), vec![vinculo_2019(1, "ABC Ltda", &[1, 2, 3])]))
            .expect("first");

        let now = Utc::now().to_rfc3339();
        f.db.create_pendencia(&DbPendencia {
            id: "manual-1".into(),
            caso_id: f.caso_id.clone(),
            titulo: "Juntar PPP".into(),
            descricao: String::new(),
            tipo: "juntar_ppp".into(),
            prioridade: Prioridade::Media,
            acao_necessaria: None,
            documentos_necessarios: vec!["PPP".into()],
            vinculo_id: None,
            status: StatusPendencia::Aberta,
            data_resolucao: None,
            impacta_calculo: None,
            contexto: None,
            created_at: now.clone(),
            updated_at: now,
        })
        .expect("manual");

        f.analyze(cnis(Some(identidade()), vec![vinculo_2019(1, "ABC Ltda", &[])]))
            .expect("second");
        let pendencias = f.db.get_pendencias(&f.caso_id).expect("pendencias");
        assert_eq!(pendencias.len(), 1);
        assert_eq!(pendencias[0].id, "manual-1");
    }

    #[test]
    fn test_rerun_keeps_links_of_rows_it_does_not_own() {
        let f = Fixture::new();
        let input = || cnis(Some(identidade()), vec![vinculo_2019(1, "ABC Ltda", &[])]);
        f.analyze(input()).expect("first");
        let vinculo = f.db.get_vinculos(&f.caso_id).expect("v").remove(0);

        let now = Utc::now().to_rfc3339();
        let manual = DbPendencia {
            id: "manual-ppp".into(),
            caso_id: f.caso_id.clone(),
            titulo: "Juntar PPP".into(),
            descricao: String::new(),
            tipo: "juntar_ppp".into(),
            prioridade: Prioridade::Media,
            acao_necessaria: None,
            documentos_necessarios: vec!["PPP".into()],
            vinculo_id: Some(vinculo.id.clone()),
            status: StatusPendencia::Aberta,
            data_resolucao: None,
            impacta_calculo: None,
            contexto: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        f.db.create_pendencia(&manual).expect("manual");
        f.db.create_inconsistencia(&DbInconsistencia {
            id: "inc-cargo".into(),
            caso_id: f.caso_id.clone(),
            tipo: "cargo_divergente".into(),
            severidade: SeveridadeInconsistencia::Baixa,
            titulo: "Cargo diferente".into(),
            descricao: String::new(),
            documento_origem: "CNIS".into(),
            documento_comparacao: "CTPS".into(),
            vinculo_id: Some(vinculo.id.clone()),
            dados_origem: None,
            dados_comparacao: None,
            correcao_sugerida: None,
            status: StatusInconsistencia::Pendente,
            created_at: now,
        })
        .expect("inconsistencia");

        f.analyze(input()).expect("second");
        assert!(f.db.get_vinculo(&vinculo.id).expect("v").is_some());
        assert_eq!(f.db.get_pendencia("manual-ppp").expect("p"), Some(manual));
        let inc = f.db.get_inconsistencia("inc-cargo").expect("i").expect("row");
        assert_eq!(inc.vinculo_id, Some(vinculo.id));
    }

    #[test]
    fn test_failed_extraction_leaves_state_intact() {
        let f = Fixture::new();
        f.analyze(cnis(Some(identidade()), vec![vinculo_2019(1, "ABC Ltda", &[7])]))
            .expect("first");
        let before = f.db.get_analise_competencias(&f.caso_id).expect("a");

        let err = f
            .analyze(Err(ExtractionError::Upstream("provider timeout".into())))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.db.get_analise_competencias(&f.caso_id).expect("a"), before);
        assert_eq!(f.db.get_runs(&f.caso_id).expect("runs").len(), 1);
    }

    #[test]
    fn test_empty_cnis_is_a_valid_result() {
        let f = Fixture::new();
        f.analyze(cnis(Some(identidade()), vec![vinculo_2019(1, "ABC Ltda", &[])]))
            .expect("first");
        let report = f.analyze(cnis(Some(identidade()), vec![])).expect("empty");
        assert_eq!(report.run.vinculos, 0);
        assert!(f.db.get_vinculos(&f.caso_id).expect("v").is_empty());
        assert!(f.db.get_analise_competencias(&f.caso_id).expect("a").is_empty());
    }

    #[test]
    fn test_missing_identity_creates_single_ausente_pendency() {
        let f = Fixture::new();
        let report = f.analyze(cnis(None, vec![])).expect("first");
        f.analyze(cnis(None, vec![])).expect("second");

        assert_eq!(report.identificacao_validada, None);
        assert!(f.db.get_identificacao(&f.caso_id).expect("id").is_none());
        assert_eq!(f.pendencias_tipo(TipoPendenciaAuto::IdentificacaoAusente).len(), 1);

        f.analyze(cnis(Some(identidade()), vec![])).expect("with identity");
        assert!(f.pendencias_tipo(TipoPendenciaAuto::IdentificacaoAusente).is_empty());
    }

    #[test]
    fn test_cpf_mismatch_creates_divergente_pendency() {
        let f = Fixture::new();
        let mut ident = identidade();
        ident.cpf = Some("123.456.789-01".to_string());
        let report = f.analyze(cnis(Some(ident), vec![])).expect("run");

        assert_eq!(report.identificacao_validada, Some(false));
        let alertas = f.db.get_alertas(&f.caso_id).expect("alertas");
        assert_eq!(alertas.len(), 1);
        assert_eq!(alertas[0].alerta.tipo, TipoAlerta::CpfDivergente);
        let pendencias = f.pendencias_tipo(TipoPendenciaAuto::IdentificacaoDivergente);
        assert_eq!(pendencias.len(), 1);
        assert!(!f.db.get_identificacao(&f.caso_id).expect("id").expect("row").validada);
    }

    #[test]
    fn test_media_alerts_do_not_create_pendencies() {
        let f = Fixture::new();
        let mut ident = identidade();
        ident.nome_mae = None;
        f.analyze(cnis(Some(ident), vec![])).expect("run");

        assert_eq!(f.db.get_alertas(&f.caso_id).expect("alertas").len(), 1);
        assert!(f.db.get_pendencias(&f.caso_id).expect("pendencias").is_empty());
    }

    #[test]
    fn test_identity_edit_revalidates_stored_identification() {
        let f = Fixture::new();
        let mut ident = identidade();
        ident.cpf = Some("987.654.321-00".to_string());
        f.analyze(cnis(Some(ident), vec![])).expect("run");
        assert_eq!(f.pendencias_tipo(TipoPendenciaAuto::IdentificacaoDivergente).len(), 1);

        let report = edit_claimant_identity(
            &f.db,
            &f.ctx(),
            &f.caso_id,
            "João da Silva",
            Some("987.654.321-00"),
        )
        .expect("edit");

        assert_eq!(report.identificacao_validada, Some(true));
        assert_eq!(report.run.evento, EventoReconciliacao::IdentidadeEditada);
        assert!(f.db.get_alertas(&f.caso_id).expect("alertas").is_empty());
        assert!(f.pendencias_tipo(TipoPendenciaAuto::IdentificacaoDivergente).is_empty());
        let caso = f.db.get_caso(&f.caso_id).expect("caso").expect("row");
        assert_eq!(caso.cpf.as_deref(), Some("987.654.321-00"));
        assert!(f.db.get_identificacao(&f.caso_id).expect("id").expect("row").validada);
    }

    #[test]
    fn test_identity_edit_keeps_ausente_pendency() {
        let f = Fixture::new();
        f.analyze(cnis(None, vec![])).expect("run");

        let report = edit_claimant_identity(&f.db, &f.ctx(), &f.caso_id, "João Silva", None)
            .expect("edit");
        assert_eq!(report.identificacao_validada, None);
        assert_eq!(f.pendencias_tipo(TipoPendenciaAuto::IdentificacaoAusente).len(), 1);
    }

    #[test]
    fn test_identity_edit_rejects_blank_name() {
        let f = Fixture::new();
        let err = edit_claimant_identity(&f.db, &f.ctx(), &f.caso_id, "  ", None).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidInput(_)));
        assert!(f.db.get_runs(&f.caso_id).expect("runs").is_empty());
    }

    #[test]
    fn test_remuneration_problems_create_typed_pendencies() {
        let f = Fixture::new();
        let mut v = vinculo_2019(1, "ABC Ltda", &[]);
        v.contribuicoes[0].remuneracao = Some("0,00".to_string());
        v.contribuicoes[1].remuneracao = None;
        v.contribuicoes[2].remuneracao = Some("50,00".to_string());
        f.analyze(cnis(Some(identidade()), vec![v])).expect("run");

        let problemas = f.db.get_problemas_remuneracao(&f.caso_id).expect("problemas");
        let tipos: Vec<TipoProblema> = problemas.iter().map(|p| p.problema.tipo).collect();
        assert_eq!(
            tipos,
            vec![TipoProblema::Zerada, TipoProblema::Ausente, TipoProblema::MuitoBaixa]
        );
        assert_eq!(f.pendencias_tipo(TipoPendenciaAuto::RemuneracaoZerada).len(), 1);
        assert_eq!(f.pendencias_tipo(TipoPendenciaAuto::RemuneracaoAusente).len(), 1);
        assert!(f.pendencias_tipo(TipoPendenciaAuto::RemuneracaoMuitoBaixa).is_empty());
    }

    #[test]
    fn test_triaged_auto_pendency_keeps_status_across_rerun() {
        let f = Fixture::new();
        let input = || cnis(Some(identidade()), vec![vinculo_2019(1, "ABC Ltda", &[3, 4, 5])]);
        f.analyze(input()).expect("first");

        let pendencia = f.pendencias_tipo(TipoPendenciaAuto::RemuneracoesFaltantes).remove(0);
        f.db.update_pendencia(
            &pendencia.id,
            &PendenciaPatch {
                status: Some(StatusPendencia::Pendente),
                ..Default::default()
            },
        )
        .expect("triage");

        f.analyze(input()).expect("second");
        let after = f.pendencias_tipo(TipoPendenciaAuto::RemuneracoesFaltantes);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, pendencia.id);
        assert_eq!(after[0].status, StatusPendencia::Pendente);
    }

    #[test]
    fn test_clearing_one_problem_keeps_ids_of_the_others() {
        let f = Fixture::new();
        let with_zeros = |months: &[usize]| {
            let mut v = vinculo_2019(1, "ABC Ltda", &[]);
            for &m in months {
                v.contribuicoes[m].remuneracao = Some("0,00".to_string());
            }
            cnis(Some(identidade()), vec![v])
        };
        f.analyze(with_zeros(&[1, 4])).expect("first");

        let zeradas = f.pendencias_tipo(TipoPendenciaAuto::RemuneracaoZerada);
        assert_eq!(zeradas.len(), 2);
        let later = zeradas
            .iter()
            .find(|p| p.descricao.contains("2019-05"))
            .expect("may")
            .clone();
        f.db.update_pendencia(
            &later.id,
            &PendenciaPatch {
                status: Some(StatusPendencia::Pendente),
                ..Default::default()
            },
        )
        .expect("triage");

        f.analyze(with_zeros(&[4])).expect("second");
        let after = f.pendencias_tipo(TipoPendenciaAuto::RemuneracaoZerada);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, later.id);
        assert_eq!(after[0].status, StatusPendencia::Pendente);
    }

    #[test]
    fn test_vinculo_notes_survive_rebuild() {
        let f = Fixture::new();
        let input = || cnis(Some(identidade()), vec![vinculo_2019(1, "ABC Ltda", &[])]);
        f.analyze(input()).expect("first");
        let vinculo = f.db.get_vinculos(&f.caso_id).expect("v").remove(0);
        f.db.update_vinculo_observacoes(&vinculo.id, Some("Conferir CTPS física"))
            .expect("notes");

        f.analyze(input()).expect("second");
        let after = f.db.get_vinculo(&vinculo.id).expect("v").expect("row");
        assert_eq!(after.observacoes_usuario.as_deref(), Some("Conferir CTPS física"));
    }

    #[test]
    fn test_unknown_case_is_rejected_without_writes() {
        let f = Fixture::new();
        let err = analyze_cnis(
            &f.db,
            &f.ctx(),
            "nao-existe",
            cnis(Some(identidade()), vec![vinculo_2019(1, "ABC Ltda", &[])]),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::CaseNotFound(_)));
        let count: i64 = f
            .db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM vinculos", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_run_log_records_counts() {
        let f = Fixture::new();
        let report = f
            .analyze(cnis(
                Some(identidade()),
                vec![vinculo_2019(1, "ABC Ltda", &[3, 4, 5]), vinculo_2019(2, "XYZ", &[])],
            ))
            .expect("run");

        let latest = f.db.get_latest_run(&f.caso_id).expect("run").expect("row");
        assert_eq!(latest, report.run);
        assert_eq!(latest.vinculos, 2);
        assert_eq!(latest.analises, 2);
        assert_eq!(latest.pendencias, 1);
        assert_eq!(latest.evento, EventoReconciliacao::CnisAnalisado);
    }
}
