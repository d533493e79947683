//! `prevdesk` command line.
//!
//! Reads extraction JSON from files, runs the reconciliation services against
//! the local case database, and prints results as JSON. Failures are printed
//! to stderr as an `ErrorPayload` with a non-zero exit code.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;

use prevdesk_lib::db::CaseDb;
use prevdesk_lib::db_backup::{backup_database, default_backup_path};
use prevdesk_lib::error::{ErrorPayload, ReconcileError};
use prevdesk_lib::extraction::{ExtractedDocument, ExtractionError};
use prevdesk_lib::services::cross_document::compare_document;
use prevdesk_lib::services::pendencias::{
    case_summary, change_pendencia_status, create_manual_pendencia, edit_vinculo_observacoes,
    set_inconsistencia_status, NovaPendencia,
};
use prevdesk_lib::services::reconciliation::{analyze_cnis, edit_claimant_identity};
use prevdesk_lib::services::RunContext;
use prevdesk_lib::state::{config_path, create_or_update_config, load_config, load_config_from};
use prevdesk_lib::types::{ReconcileConfig, StatusInconsistencia, StatusPendencia};

#[derive(Parser, Debug)]
#[command(name = "prevdesk", version)]
#[command(about = "CNIS reconciliation and pendency tracking", long_about = None)]
struct Cli {
    /// Database file (defaults to the config value, then ~/.prevdesk/prevdesk.db)
    #[arg(long, env = "PREVDESK_DB", global = true)]
    db: Option<PathBuf>,

    /// Config file (defaults to ~/.prevdesk/config.json)
    #[arg(long, env = "PREVDESK_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config file and create the database
    Init,

    /// Manage cases
    Caso {
        #[command(subcommand)]
        command: CasoCommand,
    },

    /// Rebuild a case from a CNIS extraction
    AnalisarCnis {
        caso: String,
        /// Extraction JSON (`tipoDocumento: "cnis"`)
        arquivo: PathBuf,
        /// Reference date for open-ended vínculos (YYYY-MM-DD)
        #[arg(long)]
        hoje: Option<NaiveDate>,
    },

    /// Correct the claimant's registered name or CPF and re-validate
    EditarIdentidade {
        caso: String,
        #[arg(long)]
        nome: String,
        #[arg(long)]
        cpf: Option<String>,
    },

    /// Merge a secondary document (CTPS, employer declaration, ...) into a case
    Comparar { caso: String, arquivo: PathBuf },

    /// List and edit pendências
    Pendencias {
        #[command(subcommand)]
        command: PendenciaCommand,
    },

    /// Mark a pendência as resolved
    Resolver { pendencia: String },

    /// Change an inconsistência's status
    Inconsistencia {
        id: String,
        #[arg(value_parser = parse_status_inconsistencia)]
        status: StatusInconsistencia,
    },

    /// Set (or clear, when omitted) the practitioner's note on a vínculo
    Observacao { vinculo: String, texto: Option<String> },

    /// Case overview
    Resumo { caso: String },

    /// Hot copy of the database
    Backup {
        /// Destination (defaults to ~/.prevdesk/prevdesk.db.bak)
        #[arg(long)]
        destino: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum CasoCommand {
    Novo {
        nome: String,
        #[arg(long)]
        cpf: Option<String>,
    },
    Listar,
    Mostrar { id: String },
}

#[derive(Subcommand, Debug)]
enum PendenciaCommand {
    Listar { caso: String },
    /// Create a manual pendência from a JSON file
    Nova { caso: String, arquivo: PathBuf },
    Status {
        id: String,
        #[arg(value_parser = parse_status_pendencia)]
        status: StatusPendencia,
    },
}

fn parse_status_pendencia(s: &str) -> Result<StatusPendencia, String> {
    StatusPendencia::parse(s).ok_or_else(|| format!("expected aberta, pendente or resolvida: {s}"))
}

fn parse_status_inconsistencia(s: &str) -> Result<StatusInconsistencia, String> {
    StatusInconsistencia::parse(s)
        .ok_or_else(|| format!("expected pendente, resolvida or descartada: {s}"))
}

/// A read failure is reported like an upstream extraction failure: nothing
/// has been touched and the command can be retried.
fn read_extraction(path: &Path) -> Result<ExtractedDocument, ExtractionError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| ExtractionError::Upstream(format!("{}: {}", path.display(), e)))?;
    ExtractedDocument::from_json(&raw)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ReconcileError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| ReconcileError::Db(e.into()))?;
    println!("{out}");
    Ok(())
}

fn open_db(cli: &Cli, config: &ReconcileConfig) -> Result<CaseDb, ReconcileError> {
    Ok(match &cli.db {
        Some(path) => CaseDb::open_at(path.clone())?,
        None => CaseDb::open_with_config(config)?,
    })
}

fn run(cli: Cli) -> Result<(), ReconcileError> {
    let config_file = match &cli.config {
        Some(path) => path.clone(),
        None => config_path()?,
    };

    if let Command::Init = cli.command {
        let config = create_or_update_config(&config_file, |_| {})?;
        let db = open_db(&cli, &config)?;
        return print_json(&serde_json::json!({
            "config": config_file,
            "casos": db.list_casos()?.len(),
        }));
    }

    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let db = open_db(&cli, &config)?;
    let ctx = RunContext::new(&config);

    match cli.command {
        Command::Init => Ok(()),
        Command::Caso { command } => match command {
            CasoCommand::Novo { nome, cpf } => {
                if nome.trim().is_empty() {
                    return Err(ReconcileError::InvalidInput("claimant name cannot be empty".into()));
                }
                print_json(&db.create_caso(&nome, cpf.as_deref())?)
            }
            CasoCommand::Listar => print_json(&db.list_casos()?),
            CasoCommand::Mostrar { id } => {
                let caso = db
                    .get_caso(&id)?
                    .ok_or_else(|| ReconcileError::CaseNotFound(id.clone()))?;
                print_json(&caso)
            }
        },
        Command::AnalisarCnis { caso, arquivo, hoje } => {
            let ctx = match hoje {
                Some(date) => ctx.with_today(date),
                None => ctx,
            };
            print_json(&analyze_cnis(&db, &ctx, &caso, read_extraction(&arquivo))?)
        }
        Command::EditarIdentidade { caso, nome, cpf } => print_json(&edit_claimant_identity(
            &db,
            &ctx,
            &caso,
            &nome,
            cpf.as_deref(),
        )?),
        Command::Comparar { caso, arquivo } => {
            print_json(&compare_document(&db, &ctx, &caso, read_extraction(&arquivo))?)
        }
        Command::Pendencias { command } => match command {
            PendenciaCommand::Listar { caso } => print_json(&db.get_pendencias(&caso)?),
            PendenciaCommand::Nova { caso, arquivo } => {
                let raw = fs::read_to_string(&arquivo).map_err(|e| {
                    ReconcileError::InvalidInput(format!("{}: {}", arquivo.display(), e))
                })?;
                let nova: NovaPendencia = serde_json::from_str(&raw)
                    .map_err(|e| ReconcileError::InvalidInput(e.to_string()))?;
                print_json(&create_manual_pendencia(&db, &ctx, &caso, nova)?)
            }
            PendenciaCommand::Status { id, status } => {
                print_json(&change_pendencia_status(&db, &ctx, &id, status)?)
            }
        },
        Command::Resolver { pendencia } => print_json(&change_pendencia_status(
            &db,
            &ctx,
            &pendencia,
            StatusPendencia::Resolvida,
        )?),
        Command::Inconsistencia { id, status } => {
            print_json(&set_inconsistencia_status(&db, &ctx, &id, status)?)
        }
        Command::Observacao { vinculo, texto } => print_json(&edit_vinculo_observacoes(
            &db,
            &ctx,
            &vinculo,
            texto.as_deref(),
        )?),
        Command::Resumo { caso } => print_json(&case_summary(&db, &caso)?),
        Command::Backup { destino } => {
            let dest = match destino {
                Some(path) => path,
                None => default_backup_path()?,
            };
            let written = backup_database(&db, &dest)?;
            print_json(&serde_json::json!({ "backup": written }))
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            let payload = ErrorPayload::from(&e);
            match serde_json::to_string_pretty(&payload) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{}", payload.message),
            }
            ExitCode::FAILURE
        }
    }
}
