use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use hoohu_core::client::{MediaWikiClient, MediaWikiClientConfig};
use hoohu_core::config::{BotConfig, load_config};
use hoohu_core::error::BotError;
use hoohu_core::interlang_fix::{InterlangFixOptions, fix_interlanguage_links};
use hoohu_core::redirect_fix::{RedirectFixOptions, fix_redirects};
use hoohu_core::remote::{HttpConnector, RemoteHandles};
use hoohu_core::resolver::resolve_title;
use hoohu_core::sandbox::{SandboxResetOptions, reset_sandboxes};
use hoohu_core::timestamp::print_timestamp;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "hoohu",
    version,
    about = "Maintenance bot for redirects, interlanguage links and sandboxes"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = "hoohu.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Write a signature timestamp to the bot's timestamp page")]
    Timestamp(DryRunArgs),
    #[command(
        name = "redirect-fix",
        about = "Repair double and broken redirects from the maintenance reports"
    )]
    RedirectFix(PageSelectionArgs),
    #[command(
        name = "interlang-fix",
        about = "Resolve and rewrite interlanguage link footers"
    )]
    InterlangFix(PageSelectionArgs),
    #[command(name = "sandbox-reset", about = "Restore idle sandbox pages to their clean text")]
    SandboxReset(DryRunArgs),
    #[command(about = "Print the redirect/move resolution of a title as JSON")]
    Resolve(ResolveArgs),
}

#[derive(Debug, Args)]
struct PageSelectionArgs {
    #[arg(long, help = "Report planned changes without editing")]
    dry_run: bool,
    #[arg(long = "title", value_name = "TITLE", help = "Process this page (repeatable)")]
    titles: Vec<String>,
}

#[derive(Debug, Args)]
struct DryRunArgs {
    #[arg(long, help = "Report planned changes without editing")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    title: String,
    #[arg(long, value_name = "CODE", help = "Resolve on the configured foreign wiki for CODE")]
    lang: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    tracing::debug!(config = %cli.config.display(), api = %config.api_url(), "configuration loaded");

    let result = run(cli.command, &config);
    if let Err(error) = &result {
        if error.downcast_ref::<BotError>().is_some_and(BotError::is_fatal) {
            tracing::error!(error = %error, "fatal error; aborting run");
        }
    }
    result
}

fn run(command: Commands, config: &BotConfig) -> Result<()> {
    match command {
        Commands::Timestamp(args) => print_json(&print_timestamp(config, args.dry_run)?),
        Commands::RedirectFix(args) => run_redirect_fix(config, args),
        Commands::InterlangFix(args) => run_interlang_fix(config, args),
        Commands::SandboxReset(args) => {
            let options = SandboxResetOptions {
                dry_run: args.dry_run,
                ..SandboxResetOptions::from_config(config)
            };
            let report = reset_sandboxes(config, &options)?;
            print_json(&report)
        }
        Commands::Resolve(args) => run_resolve(config, args),
    }
}

fn run_redirect_fix(config: &BotConfig, args: PageSelectionArgs) -> Result<()> {
    let options = RedirectFixOptions {
        extra_titles: args.titles,
        dry_run: args.dry_run,
        ..RedirectFixOptions::from_config(config)
    };
    let report = fix_redirects(config, &options)?;
    print_json(&report)
}

fn run_interlang_fix(config: &BotConfig, args: PageSelectionArgs) -> Result<()> {
    let options = InterlangFixOptions {
        titles: args.titles,
        max_depth: config.interlang.max_depth,
        dry_run: args.dry_run,
    };
    let report = fix_interlanguage_links(config, &options)?;
    print_json(&report)
}

fn run_resolve(config: &BotConfig, args: ResolveArgs) -> Result<()> {
    let client_config = MediaWikiClientConfig::from_config(config);
    let resolution = match args.lang {
        Some(lang) => {
            let connector = HttpConnector::new(client_config, config.interlang.auth.clone());
            let mut handles = RemoteHandles::new(connector, config.interlang.sites.clone());
            handles.resolve(&lang, &args.title, config.interlang.max_depth)
        }
        None => {
            let mut client = MediaWikiClient::new(client_config)?;
            resolve_title(&mut client, &args.title, config.redirect.max_depth)
        }
    };
    print_json(&resolution)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
