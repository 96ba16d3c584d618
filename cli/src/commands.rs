//! CLI parser and command dispatch.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use leasedrop_browser::ChromiumLauncher;
use leasedrop_core::{
    AppConfig, Extraction, IdentifierType, QueryResult, QueryStatus, RetrievalRequest,
};
use leasedrop_db::Database;
use leasedrop_portal::PortalDefinition;
use leasedrop_retrieval::{trend_report, RetryController};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "leasedrop")]
#[command(about = "Texas Comptroller lease production retrieval")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides ~/.config/leasedrop/config.toml)
    #[arg(short, long, global = true, env = "LEASEDROP_CONFIG")]
    config: Option<PathBuf>,

    /// Portal definition TOML (overrides config and the built-in definition)
    #[arg(long, global = true)]
    portal: Option<PathBuf>,

    /// History database file (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Identifier kinds accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum IdentifierKind {
    /// Production lease number
    Lease,
    /// Drilling permit number
    Permit,
}

impl From<IdentifierKind> for IdentifierType {
    fn from(kind: IdentifierKind) -> Self {
        match kind {
            IdentifierKind::Lease => Self::LeaseNumber,
            IdentifierKind::Permit => Self::DrillingPermitNumber,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve production data for a lease or drilling permit
    Retrieve {
        /// Identifier type
        #[arg(short = 't', long = "type", value_enum, default_value = "lease")]
        identifier_type: IdentifierKind,
        /// 6-digit lease or permit number
        identifier: String,
        /// Beginning period (yymm or yy)
        beg_period: String,
        /// Ending period (yymm or yy)
        end_period: String,
        /// Run the browser with a visible window
        #[arg(long)]
        headed: bool,
        /// Do not record the result in the history database
        #[arg(long)]
        no_history: bool,
    },

    /// List past retrievals, newest first
    History {
        /// Limit number of entries shown (0 = all)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Show the stored result of one retrieval
    Detail {
        /// Query id from `history`
        id: i64,
    },

    /// Trend analysis of one stored successful retrieval
    Trend {
        /// Query id from `history`
        id: i64,
    },
}

/// Run the parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::load_with_env(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(database) = cli.database {
        config.storage.database_path = Some(database);
    }

    match cli.command {
        Commands::Retrieve {
            identifier_type,
            identifier,
            beg_period,
            end_period,
            headed,
            no_history,
        } => {
            if headed {
                config.browser.headless = false;
            }
            let request = RetrievalRequest::new(
                identifier_type.into(),
                identifier,
                beg_period,
                end_period,
            );
            let portal = cli.portal.or_else(|| config.storage.portal_definition.clone());
            cmd_retrieve(&config, portal.as_deref(), &request, !no_history).await
        }
        Commands::History { limit } => {
            let db = open_database(&config).await?;
            let mut queries = db.list_queries().await?;
            if limit > 0 {
                queries.truncate(limit);
            }
            print_json(&queries)?;
            db.close().await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Detail { id } => {
            let db = open_database(&config).await?;
            let result = stored_result(&db, id).await?;
            print_json(&result.payload())?;
            db.close().await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Trend { id } => {
            let db = open_database(&config).await?;
            let result = stored_result(&db, id).await?;
            db.close().await;
            print_json(&trend_report(&stored_extraction(&result)?))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn cmd_retrieve(
    config: &AppConfig,
    portal: Option<&Path>,
    request: &RetrievalRequest,
    record: bool,
) -> anyhow::Result<ExitCode> {
    let definition =
        PortalDefinition::load_or_default(portal).context("failed to load portal definition")?;
    let diagnostics_dir = config.diagnostics_dir()?;

    let mut controller = RetryController::new(
        ChromiumLauncher::new(config.browser.clone()),
        config,
        definition,
        diagnostics_dir,
    );
    let db = if record {
        let db = open_database(config).await?;
        controller = controller.with_history(Arc::new(db.clone()));
        Some(db)
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling retrieval");
            on_interrupt.cancel();
        }
    });

    let result = controller.run(request, &cancel).await;
    print_json(&result.payload())?;
    if let Some(db) = db {
        db.close().await;
    }

    Ok(match result.status {
        QueryStatus::Success => ExitCode::SUCCESS,
        QueryStatus::Cancelled => ExitCode::from(130),
        QueryStatus::Pending | QueryStatus::Failed => ExitCode::FAILURE,
    })
}

async fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    let path = config.database_path()?;
    info!(path = %path.display(), "Opening history database");
    Database::open(&path)
        .await
        .with_context(|| format!("failed to open history database {}", path.display()))
}

async fn stored_result(db: &Database, id: i64) -> anyhow::Result<QueryResult> {
    match db.get_query_detail(id).await? {
        Some(result) => Ok(result),
        None => bail!("no stored query with id {id}"),
    }
}

/// Rebuild the extraction a stored successful result was computed from.
fn stored_extraction(result: &QueryResult) -> anyhow::Result<Extraction> {
    if result.status != QueryStatus::Success {
        bail!(
            "query {} ended {}; trend analysis needs a successful retrieval",
            result.query.id.unwrap_or_default(),
            result.status
        );
    }
    match (&result.production_column, &result.date_column) {
        (Some(production_column), Some(date_column)) => Ok(Extraction {
            production_column: production_column.clone(),
            date_column: date_column.clone(),
            rows: result.rows.clone(),
        }),
        _ => bail!("query returned no production records"),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasedrop_core::{QueryInfo, ResultRow, Statistics};

    fn stored(status: QueryStatus, column: Option<&str>) -> QueryResult {
        let request = RetrievalRequest::new(IdentifierType::LeaseNumber, "011457", "1601", "2001");
        QueryResult {
            query: QueryInfo::from_request(&request, status),
            status,
            production_column: column.map(str::to_string),
            date_column: column.map(|_| "Period".to_string()),
            rows: column
                .map(|c| vec![ResultRow::new("1601", c, 10.0)])
                .unwrap_or_default(),
            statistics: Statistics::default(),
            percentage_change: None,
            percentage_change_note: None,
            trend: None,
            diagnostics: Vec::new(),
            error: None,
            attempts: 1,
        }
    }

    #[test]
    fn test_parse_retrieve_defaults_to_lease() {
        let cli = Cli::try_parse_from(["leasedrop", "retrieve", "011457", "1601", "2001"]).unwrap();
        match cli.command {
            Commands::Retrieve {
                identifier_type,
                identifier,
                headed,
                no_history,
                ..
            } => {
                assert_eq!(identifier_type, IdentifierKind::Lease);
                assert_eq!(identifier, "011457");
                assert!(!headed);
                assert!(!no_history);
            }
            _ => panic!("expected retrieve"),
        }
    }

    #[test]
    fn test_parse_permit_with_global_flags() {
        let cli = Cli::try_parse_from([
            "leasedrop", "retrieve", "--type", "permit", "123456", "20", "21", "-v",
            "--database", "/tmp/h.db",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/h.db")));
        match cli.command {
            Commands::Retrieve {
                identifier_type, ..
            } => assert_eq!(
                IdentifierType::from(identifier_type),
                IdentifierType::DrillingPermitNumber
            ),
            _ => panic!("expected retrieve"),
        }
    }

    #[test]
    fn test_detail_requires_numeric_id() {
        assert!(Cli::try_parse_from(["leasedrop", "detail", "abc"]).is_err());
        assert!(Cli::try_parse_from(["leasedrop", "trend", "7"]).is_ok());
    }

    #[test]
    fn test_stored_extraction() {
        let extraction =
            stored_extraction(&stored(QueryStatus::Success, Some("Gross Barrels"))).unwrap();
        assert_eq!(extraction.production_column, "Gross Barrels");
        assert_eq!(extraction.rows.len(), 1);

        assert!(stored_extraction(&stored(QueryStatus::Failed, None)).is_err());
        assert!(stored_extraction(&stored(QueryStatus::Success, None)).is_err());
    }
}
