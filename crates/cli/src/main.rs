//! patchport command-line tool.
//!
//! Replays squash-merged community pull requests into an enterprise
//! repository, one downstream pull request per upstream one.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use patchport_core::git::remote_url::pr_ref;
use patchport_core::models::{MigrationBatch, MigrationSummary};
use patchport_core::{AppConfig, GitClient, GitHubClient, MigrationRunner, Notifier};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "patchport",
    version,
    about = "Migrate merged community pull requests into an enterprise repository"
)]
struct Cli {
    /// Path to the TOML configuration file. Without it, the user config
    /// directory is tried, then GitHub Actions inputs from the environment.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (overrides RUST_LOG and the config file).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Migrate pending commits until the first one that cannot be merged.
    Run,

    /// List the commits a run would migrate without changing anything.
    Pending,

    /// Check a configuration file and the secrets it references.
    Validate,

    /// Write a starter configuration file.
    Init {
        #[arg(short, long, default_value = "./patchport.toml")]
        output: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            init_tracing(cli.log_level.as_deref(), "warn");
            cmd_init(&output)
        }
        Commands::Validate => {
            init_tracing(cli.log_level.as_deref(), "warn");
            let path = cli
                .config
                .or_else(default_config_path)
                .context("no configuration file given or found")?;
            cmd_validate(&path)
        }
        Commands::Run => {
            let config = load_config(cli.config.as_deref())?;
            init_tracing(cli.log_level.as_deref(), &config.runner.log_level);
            cmd_run(&config).await
        }
        Commands::Pending => {
            let config = load_config(cli.config.as_deref())?;
            init_tracing(cli.log_level.as_deref(), &config.runner.log_level);
            cmd_pending(&config).await
        }
    }
}

/// `--log-level`, then `RUST_LOG`, then the configured default.
fn init_tracing(flag: Option<&str>, fallback: &str) {
    let filter = match flag {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("patchport").join("config.toml");
    path.exists().then_some(path)
}

fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = explicit.map(Path::to_path_buf).or_else(default_config_path);
    match path {
        Some(path) => AppConfig::load_and_resolve(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => AppConfig::from_env()
            .context("no configuration file found and environment inputs are incomplete"),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig) -> Result<()> {
    let token = config
        .github
        .token
        .as_deref()
        .context("GitHub token is not set")?;
    let api = GitHubClient::new(&config.github.api_url, token)
        .context("failed to create GitHub client")?;
    let vcs = GitClient::new(&config.runner.workdir, Some(token.to_string()))
        .with_context(|| format!("failed to open working copy {}", config.runner.workdir.display()))?;
    let notifier = Notifier::new(&config.notifications);
    debug!(notifications = notifier_state(&notifier), "clients ready");

    let runner = MigrationRunner::new(config, &api, &vcs, &notifier);
    let summary = runner.run().await.context("migration run failed")?;
    info!(attempted = summary.reports.len(), "run complete");

    print_summary(config, &summary);
    Ok(())
}

async fn cmd_pending(config: &AppConfig) -> Result<()> {
    let token = config
        .github
        .token
        .as_deref()
        .context("GitHub token is not set")?;
    let api = GitHubClient::new(&config.github.api_url, token)
        .context("failed to create GitHub client")?;
    let vcs = GitClient::new(&config.runner.workdir, None)
        .with_context(|| format!("failed to open working copy {}", config.runner.workdir.display()))?;
    let notifier = Notifier::new(&Default::default());

    let runner = MigrationRunner::new(config, &api, &vcs, &notifier);
    let batch = runner
        .pending()
        .await
        .context("failed to compute pending commits")?;

    print_pending(config, &batch);
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    match config.resolve_env_vars() {
        Ok(()) => println!("  {}", style::success("API token resolved")),
        Err(e) => println!("  {}", style::warn(&e.to_string())),
    }

    if let Err(e) = config.validate() {
        println!("  {}", style::error(&format!("Validation error: {}", e)));
        bail!("configuration validation failed");
    }
    println!("  {}", style::success("All fields are valid"));

    let n = &config.notifications;
    let set = |v: &Option<String>| if v.is_some() { "set" } else { "not set" };
    println!();
    println!("{}", style::header("Configuration summary"));
    println!("  Source        : {} ({})", config.source.repo, config.source.branch);
    println!("  Target        : {} ({})", config.target.repo, config.target.branch);
    println!("  Working copy  : {}", config.runner.workdir.display());
    println!("  API           : {}", config.github.api_url);
    println!("  Members org   : {}", config.source.members_org());
    println!("  Label         : {}", config.migration.label);
    println!("  Merge method  : {}", config.migration.merge_method);
    println!("  DingTalk      : {}", set(&n.dingtalk_access_token));
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        bail!("{} already exists, refusing to overwrite", output.display());
    }

    let starter = r#"# patchport configuration

[runner]
log_level = "info"
workdir = "."

[source]
repo = "community-org/project"
branch = "master"
remote_name = "community"
# members_org = "community-org"

[target]
repo = "enterprise-org/project"
branch = "master"
remote_name = "origin"

[github]
api_url = "https://api.github.com"
token_env = "GITHUB_TOKEN"

[migration]
label = "auto-sync"
commit_window = 101
merge_method = "squash"
mergeable_poll_attempts = 3
mergeable_poll_interval_secs = 2

[notifications]
# dingtalk_access_token_env = "DINGTALK_ACCESS_TOKEN"
# dingtalk_secret_env = "DINGTALK_SECRET"
"#;

    std::fs::write(output, starter)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "{}",
        style::success(&format!("Configuration written to {}", output.display()))
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn notifier_state(notifier: &Notifier) -> &'static str {
    use patchport_core::NotificationSink;
    if notifier.is_configured() {
        "enabled"
    } else {
        "disabled"
    }
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

fn print_pending(config: &AppConfig, batch: &MigrationBatch) {
    if batch.is_empty() {
        println!("No commits to migrate.");
        return;
    }

    println!();
    println!(
        "{}",
        style::header(&format!("{} commit(s) pending", batch.len()))
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Commit", "Pull request", "Title", "Author"]);
    for (i, commit) in batch.iter().enumerate() {
        let source = commit.source();
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(short(commit.sha())),
            Cell::new(
                commit
                    .pr_number()
                    .map(|n| pr_ref(&config.source.repo, n))
                    .unwrap_or_else(|| "—".into()),
            ),
            Cell::new(commit.title().unwrap_or_default()),
            Cell::new(source.login.as_deref().unwrap_or(&source.author_name)),
        ]);
    }
    println!("{table}");
}

fn print_summary(config: &AppConfig, summary: &MigrationSummary) {
    if summary.reports.is_empty() {
        println!("No commits to migrate.");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Upstream", "Downstream", "Status", "Author"]);
    for report in &summary.reports {
        let commit = &report.commit;
        let upstream = commit
            .pr_number()
            .map(|n| pr_ref(&config.source.repo, n))
            .unwrap_or_else(|| short(commit.sha()).to_string());
        let downstream = report
            .workflow
            .downstream_pr
            .map(|n| pr_ref(&config.target.repo, n))
            .unwrap_or_else(|| "—".into());
        let status = match &report.workflow.halt {
            None if report.workflow.merged => Cell::new("✓ merged").fg(Color::Green),
            None => Cell::new("—"),
            Some(reason) => Cell::new(format!("✗ {}", reason)).fg(Color::Red),
        };
        let source = commit.source();
        table.add_row(vec![
            Cell::new(upstream),
            Cell::new(downstream),
            status,
            Cell::new(source.login.as_deref().unwrap_or(&source.author_name)),
        ]);
    }

    println!();
    println!("{}", style::header("Migration summary"));
    println!("{table}");

    let merged = summary.succeeded().count();
    if summary.is_halted() {
        println!(
            "{}",
            style::warn(&format!(
                "{} merged, halted; {} commit(s) not attempted",
                merged,
                summary.skipped()
            ))
        );
    } else {
        println!("{}", style::success(&format!("{} merged", merged)));
    }
    if let Some(done) = summary.completed_at {
        println!(
            "{}",
            style::dim(&format!(
                "finished in {}s",
                (done - summary.started_at).num_seconds()
            ))
        );
    }
}
