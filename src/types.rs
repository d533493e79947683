//! Shared domain vocabulary: classification enums and runtime configuration.
//!
//! Enum labels are the exact strings stored in SQLite and returned to the
//! presentation layer, so `as_str` and `parse` must stay in sync with serde.

use serde::{Deserialize, Serialize};

use crate::analysis::constants::{
    HIGH_IMPACT_MIN_MISSING_MONTHS, HIGH_IMPACT_MISSING_RATIO, MAX_TRAILING_GAP_MONTHS,
    MIN_MEANINGFUL_REMUNERATION, MIN_WAGE_RATIO,
};

/// Generates `as_str`, strict `parse`, and `Display` for a label enum.
macro_rules! labeled_enum {
    ($name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            /// String label for SQL storage.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            /// Parse from SQL / user input. Unknown labels are rejected.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Impact of a competency gap on the benefit calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impacto {
    Baixo,
    Alto,
}
labeled_enum!(Impacto { Baixo => "baixo", Alto => "alto" });

/// Severity shared by remuneration problems and identity alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severidade {
    Alta,
    Media,
}
labeled_enum!(Severidade { Alta => "alta", Media => "media" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipoProblema {
    Zerada,
    Ausente,
    MuitoBaixa,
}
labeled_enum!(TipoProblema {
    Zerada => "zerada",
    Ausente => "ausente",
    MuitoBaixa => "muito_baixa",
});

impl TipoProblema {
    /// Pendency type generated for an `alta` problem of this kind.
    pub fn tipo_pendencia(&self) -> TipoPendenciaAuto {
        match self {
            TipoProblema::Zerada => TipoPendenciaAuto::RemuneracaoZerada,
            TipoProblema::Ausente => TipoPendenciaAuto::RemuneracaoAusente,
            TipoProblema::MuitoBaixa => TipoPendenciaAuto::RemuneracaoMuitoBaixa,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipoAlerta {
    NomeDivergente,
    CpfDivergente,
    MultiplosNits,
    NomeMaeAusente,
}
labeled_enum!(TipoAlerta {
    NomeDivergente => "nome_divergente",
    CpfDivergente => "cpf_divergente",
    MultiplosNits => "multiplos_nits",
    NomeMaeAusente => "nome_mae_ausente",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prioridade {
    Baixa,
    Media,
    Alta,
    Urgente,
}
labeled_enum!(Prioridade {
    Baixa => "baixa",
    Media => "media",
    Alta => "alta",
    Urgente => "urgente",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPendencia {
    Aberta,
    Pendente,
    Resolvida,
}
labeled_enum!(StatusPendencia {
    Aberta => "aberta",
    Pendente => "pendente",
    Resolvida => "resolvida",
});

impl StatusPendencia {
    /// Whether a manual status change from `self` to `next` is allowed.
    ///
    /// Resolved items can only be reopened (`aberta`), never parked as
    /// `pendente` directly. Same-status updates are accepted as no-ops.
    pub fn can_transition_to(&self, next: StatusPendencia) -> bool {
        use StatusPendencia::*;
        matches!(
            (self, next),
            (Aberta, Aberta)
                | (Pendente, Pendente)
                | (Resolvida, Resolvida)
                | (Aberta, Pendente)
                | (Pendente, Aberta)
                | (Aberta, Resolvida)
                | (Pendente, Resolvida)
                | (Resolvida, Aberta)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeveridadeInconsistencia {
    Critica,
    Alta,
    Media,
    Baixa,
}
labeled_enum!(SeveridadeInconsistencia {
    Critica => "critica",
    Alta => "alta",
    Media => "media",
    Baixa => "baixa",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusInconsistencia {
    Pendente,
    Resolvida,
    Descartada,
}
labeled_enum!(StatusInconsistencia {
    Pendente => "pendente",
    Resolvida => "resolvida",
    Descartada => "descartada",
});

/// Pendency types owned by the reconciliation orchestrator.
///
/// Rows of these types are purged and regenerated on every run; any other
/// `tipo` belongs to the user and is never touched by a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipoPendenciaAuto {
    IdentificacaoDivergente,
    IdentificacaoAusente,
    RemuneracoesFaltantes,
    RemuneracaoZerada,
    RemuneracaoAusente,
    RemuneracaoMuitoBaixa,
}
labeled_enum!(TipoPendenciaAuto {
    IdentificacaoDivergente => "identificacao_divergente",
    IdentificacaoAusente => "identificacao_ausente",
    RemuneracoesFaltantes => "remuneracoes_faltantes",
    RemuneracaoZerada => "remuneracao_zerada",
    RemuneracaoAusente => "remuneracao_ausente",
    RemuneracaoMuitoBaixa => "remuneracao_muito_baixa",
});

impl TipoPendenciaAuto {
    pub const ALL: [TipoPendenciaAuto; 6] = [
        TipoPendenciaAuto::IdentificacaoDivergente,
        TipoPendenciaAuto::IdentificacaoAusente,
        TipoPendenciaAuto::RemuneracoesFaltantes,
        TipoPendenciaAuto::RemuneracaoZerada,
        TipoPendenciaAuto::RemuneracaoAusente,
        TipoPendenciaAuto::RemuneracaoMuitoBaixa,
    ];

    pub const REMUNERACAO: [TipoPendenciaAuto; 3] = [
        TipoPendenciaAuto::RemuneracaoZerada,
        TipoPendenciaAuto::RemuneracaoAusente,
        TipoPendenciaAuto::RemuneracaoMuitoBaixa,
    ];

    /// True when `tipo` names an orchestrator-owned category.
    pub fn is_auto(tipo: &str) -> bool {
        Self::parse(tipo).is_some()
    }
}

/// Which orchestrator entry point produced a run-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventoReconciliacao {
    CnisAnalisado,
    IdentidadeEditada,
    DocumentoComparado,
}
labeled_enum!(EventoReconciliacao {
    CnisAnalisado => "cnis_analisado",
    IdentidadeEditada => "identidade_editada",
    DocumentoComparado => "documento_comparado",
});

// =============================================================================
// Configuration
// =============================================================================

/// Tunable classification policy, loaded from `~/.prevdesk/config.json`.
///
/// Every field has a default so a partial (or absent) file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    /// Trailing missing months of an ongoing vínculo tolerated before they
    /// count toward impact (contributions not yet posted).
    pub max_trailing_gap_months: u32,
    /// Counted missing months at which impact becomes `alto`.
    pub high_impact_min_missing_months: u32,
    /// Counted-missing / expected ratio at which impact becomes `alto`.
    pub high_impact_missing_ratio: f64,
    /// Multiplier applied to the minimum wage in force at the competency.
    pub min_wage_ratio: f64,
    /// Flat floor used when the competency has no minimum-wage entry.
    pub min_meaningful_remuneration: f64,
    /// Jaro-Winkler score at which two employer names are the same employer.
    pub employer_match_threshold: f64,
    /// Database file override. Defaults to `~/.prevdesk/prevdesk.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_trailing_gap_months: MAX_TRAILING_GAP_MONTHS,
            high_impact_min_missing_months: HIGH_IMPACT_MIN_MISSING_MONTHS,
            high_impact_missing_ratio: HIGH_IMPACT_MISSING_RATIO,
            min_wage_ratio: MIN_WAGE_RATIO,
            min_meaningful_remuneration: MIN_MEANINGFUL_REMUNERATION,
            employer_match_threshold: crate::analysis::constants::EMPLOYER_MATCH_THRESHOLD,
            database_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_through_parse() {
        for tipo in TipoPendenciaAuto::ALL {
            assert_eq!(TipoPendenciaAuto::parse(tipo.as_str()), Some(tipo));
        }
        assert_eq!(TipoProblema::MuitoBaixa.as_str(), "muito_baixa");
        assert_eq!(Prioridade::parse("urgente"), Some(Prioridade::Urgente));
        assert_eq!(Prioridade::parse("URGENTE"), None);
    }

    #[test]
    fn test_serde_labels_match_sql_labels() {
        let json = serde_json::to_string(&TipoAlerta::NomeMaeAusente).unwrap();
        assert_eq!(json, format!("\"{}\"", TipoAlerta::NomeMaeAusente.as_str()));
        let json = serde_json::to_string(&SeveridadeInconsistencia::Critica).unwrap();
        assert_eq!(json, "\"critica\"");
    }

    #[test]
    fn test_is_auto_distinguishes_manual_types() {
        assert!(TipoPendenciaAuto::is_auto("remuneracoes_faltantes"));
        assert!(TipoPendenciaAuto::is_auto("identificacao_ausente"));
        assert!(!TipoPendenciaAuto::is_auto("juntar_ppp"));
    }

    #[test]
    fn test_status_transitions() {
        use StatusPendencia::*;
        assert!(Aberta.can_transition_to(Resolvida));
        assert!(Pendente.can_transition_to(Resolvida));
        assert!(Resolvida.can_transition_to(Aberta));
        assert!(Aberta.can_transition_to(Aberta));
        assert!(!Resolvida.can_transition_to(Pendente));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: ReconcileConfig =
            serde_json::from_str(r#"{ "highImpactMinMissingMonths": 6 }"#).unwrap();
        assert_eq!(cfg.high_impact_min_missing_months, 6);
        assert_eq!(cfg.max_trailing_gap_months, MAX_TRAILING_GAP_MONTHS);
        assert!(cfg.database_path.is_none());
    }
}
