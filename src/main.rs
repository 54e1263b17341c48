use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_rules::config::RunnerConfig;
use mail_rules::error::{ConfigError, Error};
use mail_rules::rules::{EmailRecord, MatchMode, RuleEngine, RuleFile};
use mail_rules::store::{LibSqlBackend, RuleSource};

#[derive(Parser, Debug)]
#[command(name = "mail-rules", version, about = "Apply declarative rules to stored email")]
struct Cli {
    /// Database path (overrides MAIL_RULES_DB_PATH).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Rule file (overrides MAIL_RULES_RULES_FILE).
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or migrate the database.
    SetupDb,
    /// Load a JSON array of email records into the database.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },
    /// Run the rules against stored emails.
    Process {
        /// Only process the newest N emails (overrides MAIL_RULES_MAX_EMAILS).
        #[arg(long)]
        max_emails: Option<usize>,
    },
    /// Load and validate the rule file without touching any email.
    Validate,
    /// Show the audit records for one email.
    History {
        email_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match RunnerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(Error::from(e).exit_code());
        }
    };
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(rules) = cli.rules {
        config.rules_file = rules;
    }
    if let Command::Process {
        max_emails: Some(n),
    } = cli.command
    {
        config.max_emails = Some(n);
    }

    let _log_guard = match init_tracing(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(Error::from(e).exit_code());
        }
    };

    match run(cli.command, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "mail-rules aborted");
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Install the stderr subscriber, plus a file layer when a log file is set.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(config: &RunnerConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let Some(path) = &config.log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    };

    let (writer, guard) = tracing_appender::non_blocking(log_file_appender(path)?);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Ok(Some(guard))
}

/// Non-rotating appender for `path`, creating its directory.
fn log_file_appender(path: &Path) -> Result<RollingFileAppender, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "log_file".into(),
        message,
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| invalid(format!("{} has no file name", path.display())))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    std::fs::create_dir_all(dir)
        .map_err(|e| invalid(format!("cannot create {}: {e}", dir.display())))?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| invalid(format!("cannot open {}: {e}", path.display())))
}

async fn run(command: Command, config: &RunnerConfig) -> Result<u8, Error> {
    match command {
        Command::SetupDb => {
            LibSqlBackend::new_local(&config.db_path).await?;
            println!("Database ready at {}", config.db_path.display());
            Ok(0)
        }
        Command::Import { file } => {
            let json = std::fs::read_to_string(&file).map_err(|e| ConfigError::InvalidValue {
                key: "import file".into(),
                message: format!("cannot read {}: {e}", file.display()),
            })?;
            let emails: Vec<EmailRecord> = serde_json::from_str(&json)
                .map_err(|e| ConfigError::ParseError(format!("{}: {e}", file.display())))?;

            let db = LibSqlBackend::new_local(&config.db_path).await?;
            let mut stored = 0;
            for email in &emails {
                if db.insert_email(email).await? {
                    stored += 1;
                }
            }
            tracing::info!(total = emails.len(), stored, "Import complete");
            println!("Stored {stored} of {} emails", emails.len());
            Ok(0)
        }
        Command::Process { .. } => {
            // Rules are validated before any collaborator is touched.
            let rules = RuleFile::new(&config.rules_file).load_rules()?;
            let db = Arc::new(
                LibSqlBackend::new_local(&config.db_path)
                    .await?
                    .with_fetch_limit(config.max_emails),
            );
            let engine = RuleEngine::new(db.clone(), db.clone());
            let report = engine.run(db.as_ref(), &rules).await?;

            for record in report.records.iter().filter(|r| !r.success) {
                for outcome in record.actions.iter().filter(|o| !o.success) {
                    println!(
                        "FAILED [{}] {}: {}",
                        record.rule_name, record.email_id, outcome.detail
                    );
                }
            }
            println!("Rule processing completed ({})", report.run_id);
            println!("  {}", report.summary);
            Ok(report.summary.exit_code())
        }
        Command::Validate => {
            let rules = RuleFile::new(&config.rules_file).load_rules()?;
            for rule in &rules {
                let mode = match rule.mode {
                    MatchMode::All => "All",
                    MatchMode::Any => "Any",
                };
                println!(
                    "{} ({mode}, {} conditions, {} actions)",
                    rule.name,
                    rule.conditions.len(),
                    rule.actions.len()
                );
            }
            println!("{} rules OK", rules.len());
            Ok(0)
        }
        Command::History { email_id } => {
            let db = LibSqlBackend::new_local(&config.db_path).await?;
            let records = db.executions_for_email(&email_id).await?;
            if records.is_empty() {
                println!("No rule executions for {email_id}");
            }
            for record in records {
                let status = if record.success { "ok" } else { "failed" };
                println!(
                    "{} {} [{status}]",
                    record.executed_at.to_rfc3339(),
                    record.rule_name
                );
                for outcome in record.actions {
                    let mark = if outcome.success { "+" } else { "!" };
                    println!("    {mark} {}", outcome.detail);
                }
            }
            Ok(0)
        }
    }
}
