//! Default classification thresholds and the minimum-wage reference table.

use crate::competencia::Competencia;

/// Trailing missing months of an ongoing vínculo ignored for impact.
pub const MAX_TRAILING_GAP_MONTHS: u32 = 3;

/// Counted missing months at which a gap becomes `alto`.
pub const HIGH_IMPACT_MIN_MISSING_MONTHS: u32 = 3;

/// Share of the expected span missing at which a gap becomes `alto`.
pub const HIGH_IMPACT_MISSING_RATIO: f64 = 0.5;

/// Remuneration below `MIN_WAGE_RATIO` × minimum wage is `muito_baixa`.
pub const MIN_WAGE_RATIO: f64 = 1.0;

/// Flat floor (R$) for competencies outside the minimum-wage table.
pub const MIN_MEANINGFUL_REMUNERATION: f64 = 100.0;

/// Jaro-Winkler score at which two employer names are treated as one employer.
pub const EMPLOYER_MATCH_THRESHOLD: f64 = 0.85;

/// Documents usually requested to prove a missing remuneration period.
pub const DOCUMENTOS_REMUNERACAO: &[&str] = &[
    "CTPS",
    "Holerites do período",
    "Declaração do empregador",
    "Extrato do FGTS",
];

/// Documents usually requested to fix claimant identification at the INSS.
pub const DOCUMENTOS_IDENTIFICACAO: &[&str] = &["RG", "CPF", "Certidão de nascimento ou casamento"];

/// Proof of an employment relationship missing from the CNIS.
pub const DOCUMENTOS_VINCULO: &[&str] = &[
    "CTPS",
    "Contrato de trabalho",
    "Termo de rescisão",
    "Extrato do FGTS",
];

/// National minimum wage (R$) by effective competency, oldest first.
///
/// Values since the Real plan. A competency uses the last entry whose
/// effective month is not after it.
const SALARIO_MINIMO: &[(i32, u32, f64)] = &[
    (1994, 7, 64.79),
    (1994, 9, 70.00),
    (1995, 5, 100.00),
    (1996, 5, 112.00),
    (1997, 5, 120.00),
    (1998, 5, 130.00),
    (1999, 5, 136.00),
    (2000, 4, 151.00),
    (2001, 4, 180.00),
    (2002, 4, 200.00),
    (2003, 4, 240.00),
    (2004, 5, 260.00),
    (2005, 5, 300.00),
    (2006, 4, 350.00),
    (2007, 4, 380.00),
    (2008, 3, 415.00),
    (2009, 2, 465.00),
    (2010, 1, 510.00),
    (2011, 1, 540.00),
    (2011, 3, 545.00),
    (2012, 1, 622.00),
    (2013, 1, 678.00),
    (2014, 1, 724.00),
    (2015, 1, 788.00),
    (2016, 1, 880.00),
    (2017, 1, 937.00),
    (2018, 1, 954.00),
    (2019, 1, 998.00),
    (2020, 1, 1039.00),
    (2020, 2, 1045.00),
    (2021, 1, 1100.00),
    (2022, 1, 1212.00),
    (2023, 1, 1302.00),
    (2023, 5, 1320.00),
    (2024, 1, 1412.00),
    (2025, 1, 1518.00),
];

/// Minimum wage in force at `competencia`, or `None` before July 1994.
pub fn salario_minimo(competencia: Competencia) -> Option<f64> {
    SALARIO_MINIMO
        .iter()
        .rev()
        .find(|(year, month, _)| (*year, *month) <= (competencia.year(), competencia.month()))
        .map(|(_, _, value)| *value)
}
