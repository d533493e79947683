//! Remuneration problem detection for a vínculo's contributions.
//!
//! Each contribution is classified independently: absent or unreadable values
//! are `ausente`, exact zero is `zerada`, and positive values under the
//! minimum-wage floor of their competency are `muito_baixa`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::analysis::constants::salario_minimo;
use crate::competencia::parse_competencia;
use crate::types::{ReconcileConfig, Severidade, TipoProblema};

/// Floor policy for `muito_baixa`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemuneracaoPolicy {
    pub min_wage_ratio: f64,
    pub min_meaningful_remuneration: f64,
}

impl From<&ReconcileConfig> for RemuneracaoPolicy {
    fn from(cfg: &ReconcileConfig) -> Self {
        Self {
            min_wage_ratio: cfg.min_wage_ratio,
            min_meaningful_remuneration: cfg.min_meaningful_remuneration,
        }
    }
}

impl Default for RemuneracaoPolicy {
    fn default() -> Self {
        Self::from(&ReconcileConfig::default())
    }
}

impl RemuneracaoPolicy {
    /// Floor (R$) for a competency token.
    pub fn floor_for(&self, competencia: &str) -> f64 {
        parse_competencia(competencia)
            .and_then(salario_minimo)
            .map(|sm| sm * self.min_wage_ratio)
            .unwrap_or(self.min_meaningful_remuneration)
    }
}

/// One contribution as seen by the detector.
#[derive(Debug, Clone, Copy)]
pub struct ContribuicaoRef<'a> {
    pub competencia: &'a str,
    pub remuneracao: Option<&'a str>,
}

/// A classified remuneration problem, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemaDetectado {
    /// Canonical `YYYY-MM` when parseable, otherwise the original text.
    pub competencia: String,
    pub valor: Option<String>,
    pub tipo: TipoProblema,
    pub severidade: Severidade,
    pub mensagem: String,
}

fn money_patterns() -> &'static [Regex; 4] {
    static MONEY_RE: OnceLock<[Regex; 4]> = OnceLock::new();
    MONEY_RE.get_or_init(|| {
        [
            // 1.234.567,89 / 1.234
            Regex::new(r"^\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?$").expect("br grouped regex"),
            // 1234,5 / 1234
            Regex::new(r"^\d+(?:,\d{1,2})?$").expect("br plain regex"),
            // 1,234,567.89
            Regex::new(r"^\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?$").expect("us grouped regex"),
            // 1234.56
            Regex::new(r"^\d+\.\d{1,2}$").expect("us plain regex"),
        ]
    })
}

/// Parse a monetary string in Brazilian (or plain decimal) notation.
///
/// Accepts an optional `R$` prefix and surrounding whitespace. Returns `None`
/// for anything else, including negative values.
pub fn parse_money(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("R$")
        .or_else(|| trimmed.strip_prefix("r$"))
        .unwrap_or(trimmed);
    let body: String = body
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if body.is_empty() {
        return None;
    }

    let [br_grouped, br_plain, us_grouped, us_plain] = money_patterns();
    let normalized = if br_grouped.is_match(&body) || br_plain.is_match(&body) {
        body.replace('.', "").replace(',', ".")
    } else if us_grouped.is_match(&body) || us_plain.is_match(&body) {
        body.replace(',', "")
    } else {
        return None;
    };
    normalized.parse::<f64>().ok()
}

/// Classify every contribution of one vínculo.
///
/// Records with a normal positive value produce nothing. Never fails:
/// unreadable values are reported as `ausente`.
pub fn detect_remuneration_problems(
    empregador: &str,
    contribuicoes: &[ContribuicaoRef<'_>],
    policy: &RemuneracaoPolicy,
) -> Vec<ProblemaDetectado> {
    let mut problems = Vec::new();

    for c in contribuicoes {
        let competencia = parse_competencia(c.competencia)
            .map(|comp| comp.to_string())
            .unwrap_or_else(|| c.competencia.trim().to_string());
        let raw = c.remuneracao.map(str::trim).filter(|v| !v.is_empty());

        let classified = match raw.map(|v| (v, parse_money(v))) {
            None => Some((
                TipoProblema::Ausente,
                Severidade::Alta,
                format!("Competência {competencia} sem remuneração informada ({empregador})."),
            )),
            Some((v, None)) => Some((
                TipoProblema::Ausente,
                Severidade::Alta,
                format!(
                    "Competência {competencia} com remuneração ilegível \"{v}\" ({empregador})."
                ),
            )),
            Some((_, Some(value))) if value == 0.0 => Some((
                TipoProblema::Zerada,
                Severidade::Alta,
                format!("Competência {competencia} com remuneração zerada ({empregador})."),
            )),
            Some((_, Some(value))) => {
                let floor = policy.floor_for(&competencia);
                if value < floor {
                    Some((
                        TipoProblema::MuitoBaixa,
                        Severidade::Media,
                        format!(
                            "Competência {competencia} com remuneração de R$ {} abaixo do piso de R$ {} ({empregador}).",
                            format_brl(value),
                            format_brl(floor)
                        ),
                    ))
                } else {
                    None
                }
            }
        };

        if let Some((tipo, severidade, mensagem)) = classified {
            problems.push(ProblemaDetectado {
                competencia,
                valor: c.remuneracao.map(str::to_string),
                tipo,
                severidade,
                mensagem,
            });
        }
    }

    problems
}

/// Format a value as `1.234,56`.
pub fn format_brl(value: f64) -> String {
    let cents = (value * 100.0).round() as i64;
    let int_part = (cents / 100).abs().to_string();
    let frac = (cents % 100).abs();

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if cents < 0 { "-" } else { "" };
    format!("{sign}{grouped},{frac:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contrib<'a>(competencia: &'a str, remuneracao: Option<&'a str>) -> ContribuicaoRef<'a> {
        ContribuicaoRef {
            competencia,
            remuneracao,
        }
    }

    #[test]
    fn test_parse_money_brazilian_formats() {
        assert_eq!(parse_money("3200,00"), Some(3200.0));
        assert_eq!(parse_money("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_money("1.234.567,8"), Some(1234567.8));
        assert_eq!(parse_money("  0,00 "), Some(0.0));
        assert_eq!(parse_money("1.234"), Some(1234.0));
        assert_eq!(parse_money("50"), Some(50.0));
    }

    #[test]
    fn test_parse_money_plain_decimal() {
        assert_eq!(parse_money("1234.56"), Some(1234.56));
        assert_eq!(parse_money("1,234.56"), Some(1234.56));
    }

    #[test]
    fn test_parse_money_rejects_garbage() {
        assert_eq!(parse_money(""), None);
        assert_eq!(parse_money("R$"), None);
        assert_eq!(parse_money("abc"), None);
        assert_eq!(parse_money("-100,00"), None);
        assert_eq!(parse_money("12,34,56"), None);
    }

    #[test]
    fn test_zero_value_is_zerada_alta() {
        let problems = detect_remuneration_problems(
            "ABC Ltda",
            &[contrib("2021-05", Some("0,00"))],
            &RemuneracaoPolicy::default(),
        );
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].tipo, TipoProblema::Zerada);
        assert_eq!(problems[0].severidade, Severidade::Alta);
        assert_eq!(problems[0].competencia, "2021-05");
        assert_eq!(problems[0].valor.as_deref(), Some("0,00"));
    }

    #[test]
    fn test_null_value_is_ausente_alta() {
        let problems = detect_remuneration_problems(
            "ABC Ltda",
            &[contrib("2021-05", None)],
            &RemuneracaoPolicy::default(),
        );
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].tipo, TipoProblema::Ausente);
        assert_eq!(problems[0].severidade, Severidade::Alta);
        assert!(problems[0].valor.is_none());
    }

    #[test]
    fn test_unparseable_value_is_ausente() {
        let problems = detect_remuneration_problems(
            "ABC Ltda",
            &[contrib("05/2021", Some("ver anexo"))],
            &RemuneracaoPolicy::default(),
        );
        assert_eq!(problems[0].tipo, TipoProblema::Ausente);
        assert_eq!(problems[0].competencia, "2021-05");
    }

    #[test]
    fn test_low_value_is_muito_baixa_media() {
        let problems = detect_remuneration_problems(
            "ABC Ltda",
            &[contrib("2021-05", Some("50,00"))],
            &RemuneracaoPolicy::default(),
        );
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].tipo, TipoProblema::MuitoBaixa);
        assert_eq!(problems[0].severidade, Severidade::Media);
        assert!(problems[0].mensagem.contains("1.100,00"));
    }

    #[test]
    fn test_normal_value_produces_nothing() {
        let problems = detect_remuneration_problems(
            "ABC Ltda",
            &[contrib("2021-05", Some("3200,00"))],
            &RemuneracaoPolicy::default(),
        );
        assert!(problems.is_empty());
    }

    #[test]
    fn test_floor_follows_competency() {
        let policy = RemuneracaoPolicy::default();
        // R$ 900 was above the 2016 minimum wage but below the 2019 one.
        let problems = detect_remuneration_problems(
            "ABC Ltda",
            &[contrib("2016-03", Some("900,00")), contrib("2019-03", Some("900,00"))],
            &policy,
        );
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].competencia, "2019-03");
    }

    #[test]
    fn test_unknown_competency_uses_flat_floor() {
        let policy = RemuneracaoPolicy::default();
        assert_eq!(policy.floor_for("sem competência"), 100.0);
        assert_eq!(policy.floor_for("1990-01"), 100.0);
    }

    #[test]
    fn test_format_brl() {
        assert_eq!(format_brl(1100.0), "1.100,00");
        assert_eq!(format_brl(50.5), "50,50");
        assert_eq!(format_brl(1234567.891), "1.234.567,89");
    }
}
