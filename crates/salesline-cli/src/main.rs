//! salesline - batch sales ETL
//!
//! Extracts a delimited sales file, cleans and validates it, and upserts
//! the result into a DuckDB table. Each stage is a subcommand so an
//! external scheduler can run, retry, and sequence them.

use anyhow::Result;
use clap::{Parser, Subcommand};

use salesline_core::{CancelFlag, ProgressContext};
use salesline_runner::{PipelineConfig, exit_code};

mod cmd;

#[derive(Parser)]
#[command(name = "salesline")]
#[command(about = "Batch sales ETL: extract, transform, load")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./salesline.toml or ~/.config/salesline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Stage the source file; prints the raw handle
    Extract(cmd::extract::ExtractArgs),
    /// Clean a staged raw set; prints the clean handle
    Transform(cmd::transform::TransformArgs),
    /// Upsert a staged clean set into the target
    Load(cmd::load::LoadArgs),
    /// Run extract, transform and load in one process
    Run(cmd::run::RunArgs),
    /// Manage the staging store
    Store(cmd::store::StoreArgs),
    /// Show current configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    // Logging:
    //   TTY:     warn unless --debug, stage lines show activity
    //   non-TTY: info unless --debug, logs are what the scheduler keeps
    let progress = ProgressContext::new();
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = is_tty && !cli.debug;
    salesline_core::init_logging(quiet, cli.debug, multi);

    let cancel = CancelFlag::new();
    if let Err(e) = cancel.register_signals() {
        log::warn!("signal handlers not installed: {e}");
    }

    if let Err(err) = dispatch(cli, &progress, &cancel) {
        let code = exit_code(&err);
        log::error!("{err:#}");
        if code == salesline_runner::EXIT_RETRYABLE {
            log::error!("failure is retryable (exit {code})");
        }
        std::process::exit(code);
    }
}

fn dispatch(cli: Cli, progress: &ProgressContext, cancel: &CancelFlag) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Extract(args) => cmd::extract::run(args, config, progress, cancel),
        Command::Transform(args) => cmd::transform::run(args, config, progress, cancel),
        Command::Load(args) => cmd::load::run(args, config, progress, cancel),
        Command::Run(args) => cmd::run::run(args, config, progress, cancel),
        Command::Store(args) => cmd::store::run(args, &config),
        Command::Config => {
            print_config(&config);
            Ok(())
        }
    }
}

fn print_config(config: &PipelineConfig) {
    let mut table = cmd::table(&["Setting", "Value"]);
    let source = &config.source;
    let policy = &config.policy;
    let target = &config.target;

    table.add_row(vec!["Source".to_string(), source.path.display().to_string()]);
    table.add_row(vec![
        "Delimiter".to_string(),
        format!("{:?}", char::from(source.delimiter.byte())),
    ]);
    table.add_row(vec!["Encoding".to_string(), format!("{:?}", source.encoding)]);
    table.add_row(vec![
        "Columns".to_string(),
        format!(
            "{}, {}, {}, {}, {}, {}",
            config.columns.order_id,
            config.columns.product_id,
            config.columns.quantity,
            config.columns.unit_price,
            config.columns.timestamp,
            config.columns.customer_id
        ),
    ]);
    table.add_row(vec![
        "Quantity policy".to_string(),
        format!("{:?}", policy.quantity_policy),
    ]);
    table.add_row(vec![
        "Outlier limits".to_string(),
        format!(
            "quantity <= {}, unit price <= {}",
            policy.max_quantity, policy.max_unit_price
        ),
    ]);
    table.add_row(vec![
        "High value over".to_string(),
        policy.high_value_threshold.to_string(),
    ]);
    table.add_row(vec!["Database".to_string(), target.database.display().to_string()]);
    table.add_row(vec![
        "Tables".to_string(),
        format!("{} / {}", target.table, target.summary_table),
    ]);
    table.add_row(vec![
        "Memory limit".to_string(),
        target.memory_limit.clone().unwrap_or_else(|| "default".into()),
    ]);
    table.add_row(vec![
        "On conflict".to_string(),
        format!("{:?}", target.on_conflict),
    ]);
    table.add_row(vec![
        "Store".to_string(),
        config.store.dir.display().to_string(),
    ]);

    eprintln!("\n{table}");
}
