use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use bizledger_lib::ledger::{self, AuditReport, AuditStatus, CascadeOutcome, RepairReport};
use bizledger_lib::migrate::{self, MigrationStatus, SchemaReport};
use bizledger_lib::error::response::MASKED_MESSAGE;
use bizledger_lib::{
    db, logging, state, AppError, Config, DetachedIdentityGateway, ErrorResponse, LedgerContext,
};

#[derive(Debug, Parser)]
#[command(name = "bizledger", about = "Business ledger maintenance", version)]
struct Cli {
    /// SQLite database file. Defaults to $BIZLEDGER_DB or the user data directory.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Also write JSON logs to a daily rolling file in this directory.
    #[arg(long, global = true, value_name = "PATH")]
    log_dir: Option<PathBuf>,
    /// Print only caller-facing error messages; internal details go to the log.
    #[arg(long, global = true)]
    production: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Schema and consistency commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Repair known data defects.
    #[command(subcommand)]
    Repair(RepairCommand),
    /// Account maintenance.
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply pending migrations and reconcile columns.
    Migrate,
    /// List migrations with their applied timestamp, without applying any.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Run the read-only ledger audit. Exits 1 when offenders are found.
    Audit {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum RepairCommand {
    /// Swap transaction descriptions that hold timestamps back into `date`.
    FieldSwap {
        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Recompute like, hype and comment counters on every post.
    Counters,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Delete a user and everything they own.
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config.with_overrides(cli.db.clone(), cli.log_dir.clone(), cli.production),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(2);
        }
    };
    let _guard = match logging::init(&config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(2);
        }
    };

    match handle_cli(cli.command, &config).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {}", failure_message(&err, config.production));
            process::exit(1);
        }
    }
}

/// What the operator sees for a failed command. Production mode shows only
/// caller-facing messages; the full chain goes to the log.
fn failure_message(err: &anyhow::Error, production: bool) -> String {
    if let Some(app) = err.downcast_ref::<AppError>() {
        return ErrorResponse::from_app_error(app, production).error;
    }
    if production {
        tracing::error!(target: "bizledger", event = "command_failed", error = %format!("{err:#}"));
        MASKED_MESSAGE.to_string()
    } else {
        format!("{err:#}")
    }
}

async fn handle_cli(command: Commands, config: &Config) -> Result<i32> {
    if let Commands::Db(DbCommand::Status { json }) = command {
        return handle_db_status(config, json).await;
    }

    let (ctx, report) = state::bootstrap(config, Arc::new(DetachedIdentityGateway)).await?;
    let ctx = ctx.with_production(config.production);
    let code = match command {
        Commands::Db(DbCommand::Migrate) => {
            print_schema_report(&report);
            0
        }
        Commands::Db(DbCommand::Status { .. }) => 0,
        Commands::Db(DbCommand::Audit { json }) => handle_db_audit(&ctx, json).await?,
        Commands::Repair(RepairCommand::FieldSwap { dry_run, json }) => {
            handle_field_swap(&ctx, dry_run, json).await?
        }
        Commands::Repair(RepairCommand::Counters) => {
            let updated = ledger::recount_posts(ctx.pool())
                .await
                .map_err(AppError::from)?;
            println!("Recounted {updated} posts.");
            0
        }
        Commands::User(UserCommand::Delete { id }) => handle_user_delete(&ctx, &id).await?,
    };
    ctx.pool().close().await;
    Ok(code)
}

async fn handle_db_status(config: &Config, json: bool) -> Result<i32> {
    let pool = db::open_sqlite_pool(&config.db_path).await?;
    let status = migrate::migration_status(&pool)
        .await
        .map_err(AppError::from)
        .context("read migration status")?;
    pool.close().await;
    if json {
        print_json(&status)?;
    } else {
        print_status_table(&status);
    }
    Ok(0)
}

async fn handle_db_audit(ctx: &LedgerContext, json: bool) -> Result<i32> {
    let report = ledger::run_audit(ctx.pool())
        .await
        .map_err(AppError::from)
        .context("run ledger audit")?;
    if json {
        print_json(&report)?;
    } else {
        print_audit_table(&report);
    }
    Ok(match report.status {
        AuditStatus::Ok => 0,
        AuditStatus::Error => 1,
    })
}

async fn handle_field_swap(ctx: &LedgerContext, dry_run: bool, json: bool) -> Result<i32> {
    let report = ledger::repair_field_swap(ctx.pool(), dry_run)
        .await
        .map_err(AppError::from)
        .context("repair field swap")?;
    if json {
        print_json(&report)?;
    } else {
        print_repair_report(&report);
    }
    Ok(0)
}

async fn handle_user_delete(ctx: &LedgerContext, id: &str) -> Result<i32> {
    let outcome = ledger::delete_user(ctx, id).await.map_err(AppError::from);
    match outcome {
        Ok(outcome) => {
            print_cascade(&outcome);
            Ok(if outcome.completed { 0 } else { 1 })
        }
        Err(err) if err.code() == AppError::NOT_FOUND_CODE => {
            eprintln!("Error: user {id} not found");
            Ok(1)
        }
        Err(err) => Err(err.into()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize report")?;
    println!("{json}");
    Ok(())
}

fn print_schema_report(report: &SchemaReport) {
    if report.is_noop() {
        println!("Schema is up to date.");
        return;
    }
    for version in &report.applied {
        println!("applied   {version}");
    }
    for column in &report.columns_added {
        println!("column    {column}");
    }
    if report.rows_repaired > 0 {
        println!("Rows repaired by data migrations: {}", report.rows_repaired);
    }
}

fn print_status_table(status: &[MigrationStatus]) {
    println!("{:<45} {:<5} Applied at", "Migration", "Kind");
    for entry in status {
        println!(
            "{:<45} {:<5} {}",
            entry.version,
            entry.kind,
            entry.applied_at.as_deref().unwrap_or("pending")
        );
    }
}

fn print_audit_table(report: &AuditReport) {
    println!("Ledger audit");
    println!("Status       : {}", if report.is_ok() { "ok" } else { "error" });
    println!("Generated at : {}", report.generated_at);

    println!("\nChecks:");
    println!(
        "{:<22} {:<7} {:>13}  Details",
        "Check", "Passed", "Duration (ms)"
    );
    for check in &report.checks {
        let passed = if check.passed { "yes" } else { "no" };
        println!(
            "{:<22} {:<7} {:>13}  {}",
            check.name,
            passed,
            check.duration_ms,
            check.details.as_deref().unwrap_or("-")
        );
    }

    if report.offenders.is_empty() {
        println!("\nOffenders: none");
    } else {
        println!("\nOffenders:");
        println!("{:<24} {:<38} Message", "Table", "Id");
        for offender in &report.offenders {
            println!(
                "{:<24} {:<38} {}",
                offender.table,
                offender.id,
                offender.message.replace('\n', " ")
            );
        }
    }
}

fn print_repair_report(report: &RepairReport) {
    let verb = if report.dry_run { "would swap" } else { "swapped" };
    println!(
        "Scanned {} transactions, {verb} {}.",
        report.scanned,
        report.ids.len()
    );
    for id in &report.ids {
        println!("  {id}");
    }
    if !report.ambiguous.is_empty() {
        println!("Needs manual review:");
        for id in &report.ambiguous {
            println!("  {id}");
        }
    }
}

fn print_cascade(outcome: &CascadeOutcome) {
    println!("{:<24} {:>8}  Result", "Step", "Rows");
    for step in &outcome.steps {
        println!(
            "{:<24} {:>8}  {}",
            step.phase.name(),
            step.affected,
            step.error.as_deref().unwrap_or("ok")
        );
    }
    println!(
        "Deleted {} rows for user {}{}",
        outcome.total_deleted,
        outcome.user_id,
        if outcome.completed { "." } else { " with failed steps." }
    );
}
