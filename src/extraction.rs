//! Typed boundary for AI-extracted document data.
//!
//! The extraction collaborator hands over JSON tagged by `tipoDocumento`.
//! Nothing reaches the reconciliation core until it has been deserialized
//! into [`ExtractedDocument`] and validated into a [`CnisExtraction`] or a
//! [`SecondaryDocument`]. Genuinely missing fields (no end date, no
//! remuneration) stay `None`; structurally broken input is rejected here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::IdentidadeExtraida;
use crate::types::{Prioridade, SeveridadeInconsistencia, TipoPendenciaAuto};

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The extraction collaborator itself failed (timeout, vendor error).
    #[error("Extraction failed upstream: {0}")]
    Upstream(String),

    #[error("Extraction output is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid extraction field {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Expected a {expected} document, got {actual}")]
    WrongDocument {
        expected: &'static str,
        actual: String,
    },
}

impl ExtractionError {
    /// Upstream failures can be retried as-is; malformed output cannot.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractionError::Upstream(_))
    }

    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ExtractionError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Wire shapes
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tipoDocumento", rename_all = "snake_case")]
pub enum ExtractedDocument {
    Cnis(CnisPayload),
    Ctps(SecondaryPayload),
    DeclaracaoEmpregador(SecondaryPayload),
    Outro(SecondaryPayload),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CnisPayload {
    /// `None` when the identification header could not be extracted.
    #[serde(default)]
    pub identificacao: Option<IdentidadeExtraida>,
    #[serde(default)]
    pub vinculos: Vec<VinculoExtraido>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VinculoExtraido {
    pub sequencia: u32,
    pub empregador: String,
    #[serde(default)]
    pub nit: Option<String>,
    #[serde(default)]
    pub cnpj: Option<String>,
    #[serde(default)]
    pub tipo_vinculo: Option<String>,
    #[serde(default)]
    pub data_inicio: Option<String>,
    #[serde(default)]
    pub data_fim: Option<String>,
    #[serde(default)]
    pub ultima_remuneracao: Option<String>,
    #[serde(default)]
    pub indicadores: Vec<String>,
    #[serde(default)]
    pub observacoes: Option<String>,
    #[serde(default)]
    pub contribuicoes: Vec<ContribuicaoExtraida>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContribuicaoExtraida {
    pub competencia: String,
    #[serde(default)]
    pub remuneracao: Option<String>,
    #[serde(default)]
    pub indicadores: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryPayload {
    /// Free label for `outro` documents (e.g. "PPP", "Holerite").
    #[serde(default)]
    pub rotulo: Option<String>,
    /// Employment records found in the document, when it carries any.
    #[serde(default)]
    pub registros: Vec<RegistroEmprego>,
    #[serde(default)]
    pub inconsistencias: Vec<InconsistenciaExtraida>,
    #[serde(default)]
    pub pendencias: Vec<PendenciaExtraida>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistroEmprego {
    pub empregador: String,
    #[serde(default)]
    pub cnpj: Option<String>,
    #[serde(default)]
    pub data_inicio: Option<String>,
    #[serde(default)]
    pub data_fim: Option<String>,
    #[serde(default)]
    pub cargo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InconsistenciaExtraida {
    pub tipo: String,
    pub severidade: SeveridadeInconsistencia,
    pub titulo: String,
    #[serde(default)]
    pub descricao: String,
    #[serde(default)]
    pub vinculo_sequencia: Option<u32>,
    #[serde(default)]
    pub dados_origem: Option<serde_json::Value>,
    #[serde(default)]
    pub dados_comparacao: Option<serde_json::Value>,
    #[serde(default)]
    pub correcao_sugerida: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendenciaExtraida {
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
    pub vinculo_sequencia: Option<u32>,
    #[serde(default)]
    pub impacta_calculo: Option<bool>,
    #[serde(default)]
    pub contexto: Option<String>,
}

// =============================================================================
// Validated shapes
// =============================================================================

/// A validated CNIS extraction, ready for the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CnisExtraction {
    pub identificacao: Option<IdentidadeExtraida>,
    pub vinculos: Vec<VinculoExtraido>,
}

/// A validated secondary document, ready for cross-document comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryDocument {
    /// Display label stored as the comparison document on inconsistencies.
    pub rotulo: String,
    pub registros: Vec<RegistroEmprego>,
    pub inconsistencias: Vec<InconsistenciaExtraida>,
    pub pendencias: Vec<PendenciaExtraida>,
}

impl ExtractedDocument {
    pub fn from_json(raw: &str) -> Result<Self, ExtractionError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Human label for the document type.
    pub fn label(&self) -> String {
        match self {
            ExtractedDocument::Cnis(_) => "CNIS".to_string(),
            ExtractedDocument::Ctps(_) => "CTPS".to_string(),
            ExtractedDocument::DeclaracaoEmpregador(_) => "Declaração do empregador".to_string(),
            ExtractedDocument::Outro(p) => p
                .rotulo
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or("Outro documento")
                .to_string(),
        }
    }

    pub fn into_cnis(self) -> Result<CnisExtraction, ExtractionError> {
        match self {
            ExtractedDocument::Cnis(payload) => CnisExtraction::validate(payload),
            other => Err(ExtractionError::WrongDocument {
                expected: "CNIS",
                actual: other.label(),
            }),
        }
    }

    pub fn into_secondary(self) -> Result<SecondaryDocument, ExtractionError> {
        let rotulo = self.label();
        match self {
            ExtractedDocument::Cnis(_) => Err(ExtractionError::WrongDocument {
                expected: "secondary",
                actual: rotulo,
            }),
            ExtractedDocument::Ctps(p)
            | ExtractedDocument::DeclaracaoEmpregador(p)
            | ExtractedDocument::Outro(p) => SecondaryDocument::validate(rotulo, p),
        }
    }
}

impl CnisExtraction {
    pub fn validate(payload: CnisPayload) -> Result<Self, ExtractionError> {
        let mut seen = HashSet::new();
        let mut vinculos = payload.vinculos;

        for (idx, v) in vinculos.iter_mut().enumerate() {
            let field = format!("vinculos[{idx}]");
            if v.sequencia == 0 {
                return Err(ExtractionError::invalid(
                    format!("{field}.sequencia"),
                    "sequence numbers are 1-based",
                ));
            }
            if !seen.insert(v.sequencia) {
                return Err(ExtractionError::invalid(
                    format!("{field}.sequencia"),
                    format!("duplicate sequence number {}", v.sequencia),
                ));
            }
            v.empregador = v.empregador.trim().to_string();
            if v.empregador.is_empty() {
                return Err(ExtractionError::invalid(
                    format!("{field}.empregador"),
                    "employer name is empty",
                ));
            }
            for (cidx, c) in v.contribuicoes.iter_mut().enumerate() {
                c.competencia = c.competencia.trim().to_string();
                if c.competencia.is_empty() {
                    return Err(ExtractionError::invalid(
                        format!("{field}.contribuicoes[{cidx}].competencia"),
                        "competency is empty",
                    ));
                }
            }
        }

        vinculos.sort_by_key(|v| v.sequencia);
        Ok(Self {
            identificacao: payload.identificacao,
            vinculos,
        })
    }
}

impl SecondaryDocument {
    pub fn validate(rotulo: String, payload: SecondaryPayload) -> Result<Self, ExtractionError> {
        for (idx, r) in payload.registros.iter().enumerate() {
            if r.empregador.trim().is_empty() {
                return Err(ExtractionError::invalid(
                    format!("registros[{idx}].empregador"),
                    "employer name is empty",
                ));
            }
        }
        for (idx, i) in payload.inconsistencias.iter().enumerate() {
            if i.titulo.trim().is_empty() || i.tipo.trim().is_empty() {
                return Err(ExtractionError::invalid(
                    format!("inconsistencias[{idx}]"),
                    "tipo and titulo are required",
                ));
            }
        }
        for (idx, p) in payload.pendencias.iter().enumerate() {
            if p.titulo.trim().is_empty() || p.tipo.trim().is_empty() {
                return Err(ExtractionError::invalid(
                    format!("pendencias[{idx}]"),
                    "tipo and titulo are required",
                ));
            }
            // Reserved types are purged by every CNIS rebuild.
            if TipoPendenciaAuto::is_auto(p.tipo.trim()) {
                return Err(ExtractionError::invalid(
                    format!("pendencias[{idx}].tipo"),
                    format!("\"{}\" is reserved for CNIS reconciliation", p.tipo),
                ));
            }
        }
        Ok(Self {
            rotulo,
            registros: payload.registros,
            inconsistencias: payload.inconsistencias,
            pendencias: payload.pendencias,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CNIS_JSON: &str = r#"{
        "tipoDocumento": "cnis",
        "identificacao": {
            "nome": "João da Silva",
            "cpf": "123.456.789-00",
            "nomeMae": "Maria da Silva",
            "nits": ["123.45678.90-1"]
        },
        "vinculos": [
            {
                "sequencia": 2,
                "empregador": " XYZ S/A ",
                "dataInicio": "01/2020"
            },
            {
                "sequencia": 1,
                "empregador": "ABC Ltda",
                "dataInicio": "01/2019",
                "dataFim": "12/2019",
                "contribuicoes": [
                    { "competencia": "01/2019", "remuneracao": "2.500,00" }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_cnis_parses_and_validates() {
        let doc = ExtractedDocument::from_json(CNIS_JSON).unwrap();
        assert_eq!(doc.label(), "CNIS");
        let cnis = doc.into_cnis().unwrap();
        assert_eq!(cnis.vinculos.len(), 2);
        assert_eq!(cnis.vinculos[0].sequencia, 1);
        assert_eq!(cnis.vinculos[1].empregador, "XYZ S/A");
        assert_eq!(cnis.vinculos[0].contribuicoes.len(), 1);
        assert_eq!(
            cnis.identificacao.unwrap().nome_mae.as_deref(),
            Some("Maria da Silva")
        );
    }

    #[test]
    fn test_duplicate_sequence_rejected() {
        let payload = CnisPayload {
            identificacao: None,
            vinculos: vec![
                VinculoExtraido {
                    sequencia: 1,
                    empregador: "A".into(),
                    ..Default::default()
                },
                VinculoExtraido {
                    sequencia: 1,
                    empregador: "B".into(),
                    ..Default::default()
                },
            ],
        };
        let err = CnisExtraction::validate(payload).unwrap_err();
        assert!(matches!(err, ExtractionError::Invalid { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_blank_employer_rejected() {
        let payload = CnisPayload {
            identificacao: None,
            vinculos: vec![VinculoExtraido {
                sequencia: 1,
                empregador: "   ".into(),
                ..Default::default()
            }],
        };
        assert!(CnisExtraction::validate(payload).is_err());
    }

    #[test]
    fn test_empty_cnis_is_valid() {
        let doc = ExtractedDocument::from_json(r#"{ "tipoDocumento": "cnis" }"#).unwrap();
        let cnis = doc.into_cnis().unwrap();
        assert!(cnis.vinculos.is_empty());
        assert!(cnis.identificacao.is_none());
    }

    #[test]
    fn test_wrong_document_type() {
        let doc = ExtractedDocument::from_json(r#"{ "tipoDocumento": "ctps" }"#).unwrap();
        assert!(matches!(
            doc.clone().into_cnis(),
            Err(ExtractionError::WrongDocument { .. })
        ));
        let secondary = doc.into_secondary().unwrap();
        assert_eq!(secondary.rotulo, "CTPS");
    }

    #[test]
    fn test_secondary_rejects_reserved_pendency_type() {
        let raw = r#"{
            "tipoDocumento": "declaracao_empregador",
            "pendencias": [
                { "titulo": "x", "tipo": "remuneracoes_faltantes", "prioridade": "alta" }
            ]
        }"#;
        let doc = ExtractedDocument::from_json(raw).unwrap();
        assert!(doc.into_secondary().is_err());
    }

    #[test]
    fn test_outro_uses_custom_label() {
        let raw = r#"{ "tipoDocumento": "outro", "rotulo": "PPP" }"#;
        let doc = ExtractedDocument::from_json(raw).unwrap();
        assert_eq!(doc.into_secondary().unwrap().rotulo, "PPP");
    }

    #[test]
    fn test_malformed_json_is_not_retryable() {
        let err = ExtractedDocument::from_json("{ nope").unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
        assert!(ExtractionError::Upstream("timeout".into()).is_retryable());
    }
}
