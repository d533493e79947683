//! Claimant identity validation: CNIS identification vs the case's claimant.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{Severidade, TipoAlerta};

/// Identity fields as extracted from the CNIS header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentidadeExtraida {
    pub nome: Option<String>,
    pub cpf: Option<String>,
    pub nome_mae: Option<String>,
    #[serde(default)]
    pub nits: Vec<String>,
    pub data_nascimento: Option<String>,
}

/// Identity registered on the case by the practice.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentidadeRegistrada<'a> {
    pub nome: Option<&'a str>,
    pub cpf: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertaDetectado {
    pub tipo: TipoAlerta,
    pub severidade: Severidade,
    pub mensagem: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidacaoIdentidade {
    pub tudo_ok: bool,
    pub alertas: Vec<AlertaDetectado>,
}

/// Strip everything but ASCII digits.
pub fn only_digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lower-case, trim and collapse inner whitespace.
pub fn normalize_name(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Compare extracted identity against the registered claimant.
///
/// Pure: the caller persists alerts and derives pendencies from the `alta` ones.
pub fn validate_identification(
    extraida: &IdentidadeExtraida,
    registrada: IdentidadeRegistrada<'_>,
) -> ValidacaoIdentidade {
    let mut alertas = Vec::new();

    if let (Some(ext), Some(reg)) = (present(extraida.cpf.as_deref()), present(registrada.cpf)) {
        let (ext_digits, reg_digits) = (only_digits(ext), only_digits(reg));
        if !ext_digits.is_empty() && !reg_digits.is_empty() && ext_digits != reg_digits {
            alertas.push(AlertaDetectado {
                tipo: TipoAlerta::CpfDivergente,
                severidade: Severidade::Alta,
                mensagem: format!("CPF do CNIS ({ext}) diverge do CPF cadastrado no caso ({reg})."),
            });
        }
    }

    if let (Some(ext), Some(reg)) = (present(extraida.nome.as_deref()), present(registrada.nome)) {
        let (ext_norm, reg_norm) = (normalize_name(ext), normalize_name(reg));
        if ext_norm != reg_norm {
            let similarity = strsim::jaro_winkler(&ext_norm, &reg_norm);
            let hint = if similarity >= 0.9 {
                "provável erro de grafia"
            } else {
                "verificar se é a mesma pessoa"
            };
            alertas.push(AlertaDetectado {
                tipo: TipoAlerta::NomeDivergente,
                severidade: Severidade::Alta,
                mensagem: format!(
                    "Nome no CNIS (\"{ext}\") diverge do nome cadastrado (\"{reg}\"): {hint}."
                ),
            });
        }
    }

    let nits: BTreeSet<String> = extraida
        .nits
        .iter()
        .map(|n| only_digits(n))
        .filter(|n| !n.is_empty())
        .collect();
    if nits.len() > 1 {
        alertas.push(AlertaDetectado {
            tipo: TipoAlerta::MultiplosNits,
            severidade: Severidade::Media,
            mensagem: format!(
                "{} NITs distintos vinculados ao segurado ({}); revisar unificação no INSS.",
                nits.len(),
                nits.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        });
    }

    if present(extraida.nome_mae.as_deref()).is_none() {
        alertas.push(AlertaDetectado {
            tipo: TipoAlerta::NomeMaeAusente,
            severidade: Severidade::Media,
            mensagem: "Nome da mãe ausente no CNIS; necessário para alguns requerimentos administrativos."
                .to_string(),
        });
    }

    ValidacaoIdentidade {
        tudo_ok: alertas.is_empty(),
        alertas,
    }
}
