//! Pure analysis over extracted CNIS data. No I/O in this module tree.

pub mod constants;
pub mod gaps;
pub mod identity;
pub mod remuneracao;

pub use gaps::{analyze_competencies, registered_set, GapAnalysis, GapPolicy, GapSummary};
pub use identity::{
    validate_identification, AlertaDetectado, IdentidadeExtraida, IdentidadeRegistrada,
    ValidacaoIdentidade,
};
pub use remuneracao::{
    detect_remuneration_problems, parse_money, ContribuicaoRef, ProblemaDetectado,
    RemuneracaoPolicy,
};
