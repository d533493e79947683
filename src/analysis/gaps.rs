//! Competency gap analysis: expected vs registered contribution months.
//!
//! For one vínculo, enumerates every competency of its period and checks which
//! ones have a contribution on record. Missing months are classified by impact
//! on the benefit calculation.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::competencia::{self, Competencia};
use crate::types::{Impacto, ReconcileConfig};

/// Impact thresholds, split out of [`ReconcileConfig`] so tests can tune them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapPolicy {
    pub max_trailing_gap_months: u32,
    pub high_impact_min_missing_months: u32,
    pub high_impact_missing_ratio: f64,
}

impl From<&ReconcileConfig> for GapPolicy {
    fn from(cfg: &ReconcileConfig) -> Self {
        Self {
            max_trailing_gap_months: cfg.max_trailing_gap_months,
            high_impact_min_missing_months: cfg.high_impact_min_missing_months,
            high_impact_missing_ratio: cfg.high_impact_missing_ratio,
        }
    }
}

impl Default for GapPolicy {
    fn default() -> Self {
        Self::from(&ReconcileConfig::default())
    }
}

/// Result of analyzing one vínculo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAnalysis {
    pub meses_esperados: u32,
    pub meses_registrados: u32,
    /// Missing competencies as `YYYY-MM`, chronological.
    pub meses_faltantes: Vec<String>,
    pub impacto: Impacto,
    pub mensagem: String,
}

/// Aggregate over every analyzed vínculo of a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapSummary {
    pub total_vinculos_analisados: usize,
    pub vinculos_com_lacuna: usize,
    pub vinculos_alto_impacto: usize,
    pub total_meses_faltantes: usize,
}

impl GapSummary {
    pub fn from_analyses<'a>(analyses: impl IntoIterator<Item = &'a GapAnalysis>) -> Self {
        let mut summary = GapSummary::default();
        for a in analyses {
            summary.total_vinculos_analisados += 1;
            if !a.meses_faltantes.is_empty() {
                summary.vinculos_com_lacuna += 1;
            }
            if a.impacto == Impacto::Alto {
                summary.vinculos_alto_impacto += 1;
            }
            summary.total_meses_faltantes += a.meses_faltantes.len();
        }
        summary
    }
}

/// Collapse raw contribution competency tokens into a set of competencies.
///
/// Tokens may be canonical (`2020-01`) or the original free text (`01/2020`);
/// unparseable tokens cannot match any month and are dropped.
pub fn registered_set<'a>(tokens: impl IntoIterator<Item = &'a str>) -> BTreeSet<Competencia> {
    tokens
        .into_iter()
        .filter_map(competencia::parse_competencia)
        .collect()
}

/// Analyze one vínculo's coverage.
///
/// Returns `None` when the start date is unusable: the vínculo cannot be
/// analyzed, which is a valid outcome rather than an error. A present but
/// malformed end date, or an end before the start, yields a zero-month row.
pub fn analyze_competencies(
    inicio: Option<&str>,
    fim: Option<&str>,
    registradas: &BTreeSet<Competencia>,
    today: NaiveDate,
    policy: &GapPolicy,
) -> Option<GapAnalysis> {
    let start = competencia::parse_competencia(inicio?)?;
    let fim = fim.map(str::trim).filter(|f| !f.is_empty());
    let open_ended = fim.is_none();

    let end = match fim {
        Some(text) => match competencia::parse_competencia(text) {
            Some(end) => end,
            None => return Some(invalid_period(&format!("Data de fim ilegível: \"{text}\"."))),
        },
        None => Competencia::from_date(today),
    };
    if end < start {
        return Some(invalid_period(&format!(
            "Período inválido: fim ({end}) anterior ao início ({start})."
        )));
    }

    let months = competencia::enumerate(start, end);
    let expected = months.len() as u32;
    let missing: Vec<Competencia> = months
        .iter()
        .copied()
        .filter(|m| !registradas.contains(m))
        .collect();
    let registered = expected - missing.len() as u32;

    let tolerated = if open_ended {
        let trailing = months
            .iter()
            .rev()
            .take_while(|m| !registradas.contains(m))
            .count() as u32;
        if trailing <= policy.max_trailing_gap_months {
            trailing
        } else {
            0
        }
    } else {
        0
    };
    let counted = missing.len() as u32 - tolerated;
    let impacto = classify_impact(counted, expected, policy);

    Some(GapAnalysis {
        meses_esperados: expected,
        meses_registrados: registered,
        meses_faltantes: missing.iter().map(|m| m.to_string()).collect(),
        impacto,
        mensagem: gap_message(expected, registered, missing.len() as u32, tolerated, impacto),
    })
}

fn classify_impact(counted_missing: u32, expected: u32, policy: &GapPolicy) -> Impacto {
    if counted_missing == 0 || expected == 0 {
        return Impacto::Baixo;
    }
    let ratio = counted_missing as f64 / expected as f64;
    if counted_missing >= policy.high_impact_min_missing_months
        || ratio >= policy.high_impact_missing_ratio
    {
        Impacto::Alto
    } else {
        Impacto::Baixo
    }
}

fn invalid_period(mensagem: &str) -> GapAnalysis {
    GapAnalysis {
        meses_esperados: 0,
        meses_registrados: 0,
        meses_faltantes: Vec::new(),
        impacto: Impacto::Baixo,
        mensagem: mensagem.to_string(),
    }
}

fn gap_message(expected: u32, registered: u32, missing: u32, tolerated: u32, impacto: Impacto) -> String {
    if missing == 0 {
        return format!("Todas as {expected} competências esperadas possuem contribuição registrada.");
    }
    let mut msg = format!(
        "{missing} de {expected} competências sem contribuição registrada ({registered} registradas)."
    );
    if tolerated > 0 {
        msg.push_str(&format!(
            " {tolerated} competência(s) recente(s) podem ainda não ter sido processadas pelo INSS."
        ));
    }
    if impacto == Impacto::Alto {
        msg.push_str(" Impacto alto no cálculo do benefício.");
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn set(tokens: &[&str]) -> BTreeSet<Competencia> {
        registered_set(tokens.iter().copied())
    }

    fn all_months_of(year: i32, except: &[u32]) -> Vec<String> {
        (1..=12)
            .filter(|m| !except.contains(m))
            .map(|m| format!("{year}-{m:02}"))
            .collect()
    }

    #[test]
    fn test_gap_completeness_counts() {
        let registered = set(&["2020-01", "2020-02", "2020-04", "2020-06"]);
        let a = analyze_competencies(
            Some("01/2020"),
            Some("06/2020"),
            &registered,
            today(),
            &GapPolicy::default(),
        )
        .expect("analyzable");
        assert_eq!(a.meses_esperados, 6);
        assert_eq!(a.meses_registrados, 4);
        assert_eq!(a.meses_faltantes, vec!["2020-03", "2020-05"]);
        assert_eq!(a.impacto, Impacto::Baixo);
    }

    #[test]
    fn test_duplicate_and_free_text_tokens_collapse() {
        let registered = set(&["01/2020", "2020-01", "15/02/2020", "lixo"]);
        assert_eq!(registered.len(), 2);
        let a = analyze_competencies(
            Some("01/2020"),
            Some("02/2020"),
            &registered,
            today(),
            &GapPolicy::default(),
        )
        .unwrap();
        assert_eq!(a.meses_registrados, 2);
        assert!(a.meses_faltantes.is_empty());
    }

    #[test]
    fn test_complete_vinculo_still_produces_row() {
        let tokens = all_months_of(2019, &[]);
        let registered = registered_set(tokens.iter().map(String::as_str));
        let a = analyze_competencies(
            Some("01/2019"),
            Some("12/2019"),
            &registered,
            today(),
            &GapPolicy::default(),
        )
        .unwrap();
        assert_eq!(a.meses_esperados, 12);
        assert!(a.meses_faltantes.is_empty());
        assert_eq!(a.impacto, Impacto::Baixo);
    }

    #[test]
    fn test_single_mid_span_gap_is_low_impact() {
        let tokens = all_months_of(2019, &[7]);
        let registered = registered_set(tokens.iter().map(String::as_str));
        let a = analyze_competencies(
            Some("01/2019"),
            Some("12/2019"),
            &registered,
            today(),
            &GapPolicy::default(),
        )
        .unwrap();
        assert_eq!(a.meses_faltantes, vec!["2019-07"]);
        assert_eq!(a.impacto, Impacto::Baixo);
    }

    #[test]
    fn test_five_mid_span_gaps_are_high_impact() {
        let tokens = all_months_of(2019, &[3, 4, 6, 7, 9]);
        let registered = registered_set(tokens.iter().map(String::as_str));
        let a = analyze_competencies(
            Some("01/2019"),
            Some("12/2019"),
            &registered,
            today(),
            &GapPolicy::default(),
        )
        .unwrap();
        assert_eq!(a.meses_faltantes.len(), 5);
        assert_eq!(a.impacto, Impacto::Alto);
        assert!(a.mensagem.contains("5 de 12"));
    }

    #[test]
    fn test_missing_start_is_not_analyzable() {
        let registered = set(&["2020-01"]);
        let policy = GapPolicy::default();
        assert!(analyze_competencies(None, Some("06/2020"), &registered, today(), &policy).is_none());
        assert!(analyze_competencies(Some("n/d"), None, &registered, today(), &policy).is_none());
    }

    #[test]
    fn test_malformed_end_yields_zero_sentinel() {
        let a = analyze_competencies(
            Some("01/2020"),
            Some("??/2020"),
            &BTreeSet::new(),
            today(),
            &GapPolicy::default(),
        )
        .unwrap();
        assert_eq!(a.meses_esperados, 0);
        assert!(a.meses_faltantes.is_empty());
        assert_eq!(a.impacto, Impacto::Baixo);
    }

    #[test]
    fn test_open_ended_uses_reference_month() {
        let registered = set(&["2024-01", "2024-02", "2024-03"]);
        let a = analyze_competencies(Some("01/2024"), None, &registered, today(), &GapPolicy::default())
            .unwrap();
        assert_eq!(a.meses_esperados, 3);
        assert!(a.meses_faltantes.is_empty());
    }

    #[test]
    fn test_short_trailing_gap_on_ongoing_vinculo_is_tolerated() {
        // Ongoing since 2023-01, last three months not yet posted.
        let tokens: Vec<String> = (1..=12).map(|m| format!("2023-{m:02}")).collect();
        let registered = registered_set(tokens.iter().map(String::as_str));
        let a = analyze_competencies(Some("01/2023"), None, &registered, today(), &GapPolicy::default())
            .unwrap();
        assert_eq!(a.meses_faltantes, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(a.impacto, Impacto::Baixo);
        assert!(a.mensagem.contains("recente"));
    }

    #[test]
    fn test_same_trailing_gap_on_closed_vinculo_counts() {
        let tokens: Vec<String> = (1..=12).map(|m| format!("2023-{m:02}")).collect();
        let registered = registered_set(tokens.iter().map(String::as_str));
        let a = analyze_competencies(
            Some("01/2023"),
            Some("03/2024"),
            &registered,
            today(),
            &GapPolicy::default(),
        )
        .unwrap();
        assert_eq!(a.meses_faltantes.len(), 3);
        assert_eq!(a.impacto, Impacto::Alto);
    }

    #[test]
    fn test_long_trailing_gap_is_not_tolerated() {
        let registered = set(&["2023-01", "2023-02"]);
        let a = analyze_competencies(Some("01/2023"), None, &registered, today(), &GapPolicy::default())
            .unwrap();
        assert_eq!(a.meses_faltantes.len(), 13);
        assert_eq!(a.impacto, Impacto::Alto);
    }

    #[test]
    fn test_ratio_threshold_flags_short_vinculos() {
        let registered = set(&["2020-01"]);
        let a = analyze_competencies(
            Some("01/2020"),
            Some("02/2020"),
            &registered,
            today(),
            &GapPolicy::default(),
        )
        .unwrap();
        assert_eq!(a.impacto, Impacto::Alto);

        let relaxed = GapPolicy {
            high_impact_missing_ratio: 0.9,
            ..GapPolicy::default()
        };
        let a = analyze_competencies(Some("01/2020"), Some("02/2020"), &registered, today(), &relaxed)
            .unwrap();
        assert_eq!(a.impacto, Impacto::Baixo);
    }

    #[test]
    fn test_summary_aggregates() {
        let policy = GapPolicy::default();
        let full = registered_set(all_months_of(2019, &[]).iter().map(String::as_str));
        let one_gap = registered_set(all_months_of(2019, &[7]).iter().map(String::as_str));
        let many = registered_set(all_months_of(2019, &[1, 2, 3, 4]).iter().map(String::as_str));
        let analyses: Vec<GapAnalysis> = [full, one_gap, many]
            .iter()
            .filter_map(|r| analyze_competencies(Some("01/2019"), Some("12/2019"), r, today(), &policy))
            .collect();
        let summary = GapSummary::from_analyses(&analyses);
        assert_eq!(summary.total_vinculos_analisados, 3);
        assert_eq!(summary.vinculos_com_lacuna, 2);
        assert_eq!(summary.vinculos_alto_impacto, 1);
        assert_eq!(summary.total_meses_faltantes, 5);
    }
}
