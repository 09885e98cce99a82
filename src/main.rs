/*
 * qvm-task - Task package manager for the Qubes OS admin domain.
 * Copyright (C) 2025  qvm-task contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, Instrument};

mod config;
mod error;
mod install;
mod installed;
mod lock;
mod logging;
mod release;
mod repo;
mod search;

use config::Config;
use error::TaskError;
use install::Installer;
use installed::{InstalledSet, PackageStatus};
use lock::InstanceLock;
use release::ReleaseResolver;
use repo::{
    channel, format_size, latest_by_name, total_download_size, OutputLimits, PackageRecord, QrexecChannel,
    RepoClient,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Copyright (C) 2025  qvm-task contributors\n",
    "License GPLv3+: GNU GPL version 3 or later <https://gnu.org/licenses/gpl.html>\n\n",
    "This is free software; you are free to change and redistribute it.\n",
    "There is NO WARRANTY, to the extent permitted by law."
);

#[derive(Parser)]
#[command(name = "qvm-task")]
#[command(version = VERSION)]
#[command(long_version = LONG_VERSION)]
#[command(about = "Install and query task packages for Qubes OS dom0.")]
struct Cli {
    #[arg(long, global = true, value_name = "VM", help = "Query through this qube instead of the global UpdateVM")]
    updatevm: Option<String>,
    #[arg(long, global = true, value_name = "VERSION", help = "Qubes release to query for")]
    releasever: Option<String>,
    #[arg(long = "repo-file", global = true, value_name = "PATH", help = "Repository definition (repeatable)")]
    repo_files: Vec<PathBuf>,
    #[arg(long, global = true, help = "Refresh repository metadata")]
    refresh: bool,
    #[arg(long, global = true, value_name = "SECS", help = "Deadline for one repository query")]
    timeout: Option<u64>,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List task packages
    List {
        #[arg(value_name = "SPEC")]
        specs: Vec<String>,
        #[arg(long, conflicts_with = "available", help = "Only packages that are installed")]
        installed: bool,
        #[arg(long, help = "Only packages that can be installed or upgraded")]
        available: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show details of task packages
    Info {
        #[arg(value_name = "SPEC", required = true)]
        specs: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Search task packages by keyword
    Search {
        #[arg(value_name = "KEYWORD", required = true)]
        keywords: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Install task packages
    Install {
        #[arg(value_name = "SPEC", required = true)]
        specs: Vec<String>,
        #[arg(short = 'y', long, help = "Bypass confirmation prompts")]
        yes: bool,
        #[arg(long, help = "Install even when the same version is installed")]
        reinstall: bool,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::List { .. } => "list",
            Commands::Info { .. } => "info",
            Commands::Search { .. } => "search",
            Commands::Install { .. } => "install",
        }
    }
}

/// A record with its local status, as printed by `--json`
#[derive(Serialize)]
struct StatusEntry<'a> {
    #[serde(flatten)]
    record: &'a PackageRecord,
    status: PackageStatus,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<TaskError>()
        .map(|e| e.kind().exit_code())
        .unwrap_or(1)
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = Config::load()?;
    if let Some(vm) = &cli.updatevm {
        cfg.update_vm = vm.clone();
    }
    if let Some(release) = &cli.releasever {
        cfg.releasever = release.clone();
    }
    if !cli.repo_files.is_empty() {
        cfg.repo_files = cli.repo_files.clone();
    }
    if let Some(secs) = cli.timeout {
        cfg.channel.timeout_secs = secs;
    }
    cfg.validate()?;

    let level = logging::effective_level(&cfg.logging.level, cli.verbose, cli.quiet);
    logging::init(level, cfg.logging.file.as_deref());

    let _lock = InstanceLock::acquire(&cfg.lock_file)?;
    let span = crate::span_command!(cli.command.name());
    dispatch(&cli, &cfg).instrument(span).await
}

async fn dispatch(cli: &Cli, cfg: &Config) -> Result<()> {
    let client = repo_client(cfg).await?;
    match &cli.command {
        Commands::List {
            specs,
            installed,
            available,
            json,
        } => list(&client, cfg, cli, specs, *installed, *available, *json).await,
        Commands::Info { specs, json } => info(&client, cfg, cli, specs, *json).await,
        Commands::Search { keywords, json } => search_packages(&client, cfg, cli, keywords, *json).await,
        Commands::Install { specs, yes, reinstall } => install_packages(&client, cfg, cli, specs, *yes, *reinstall).await,
    }
}

async fn repo_client(cfg: &Config) -> Result<RepoClient<QrexecChannel>> {
    let target = if cfg.update_vm.is_empty() {
        channel::default_target().await?
    } else {
        cfg.update_vm.clone()
    };
    let release = if cfg.releasever.is_empty() {
        ReleaseResolver::default().resolve()?
    } else {
        cfg.releasever.clone()
    };
    debug!(update_vm = %target, release = %release, "repository client ready");

    let channel = QrexecChannel::with_command(&cfg.channel.command, cfg.channel.args.clone(), target)
        .timeout(Duration::from_secs(cfg.channel.timeout_secs))
        .limits(OutputLimits {
            stdout: cfg.channel.stdout_limit,
            stderr: cfg.channel.stderr_limit,
        });

    Ok(RepoClient::new(channel, &cfg.service, &cfg.package_prefix, cfg.repo_files.clone(), release)
        .force_refresh(cfg.channel.force_refresh))
}

fn spinner(message: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg}")
    {
        pb.set_style(spinner_style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Query `specs` behind a spinner
async fn fetch(client: &RepoClient<QrexecChannel>, cli: &Cli, specs: &[String]) -> Result<Vec<PackageRecord>> {
    let pb = spinner("querying repositories...", cli.quiet);
    let result = client.query_all(cli.refresh, specs).await;
    pb.finish_and_clear();
    Ok(result?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status_cell(status: PackageStatus) -> String {
    match status {
        PackageStatus::Installed => style("installed").green().to_string(),
        PackageStatus::Upgradable => style("upgradable").yellow().to_string(),
        PackageStatus::Available => style("available").dim().to_string(),
    }
}

async fn list(
    client: &RepoClient<QrexecChannel>,
    cfg: &Config,
    cli: &Cli,
    specs: &[String],
    only_installed: bool,
    only_available: bool,
    json: bool,
) -> Result<()> {
    let specs = if specs.is_empty() {
        vec!["*".to_string()]
    } else {
        specs.to_vec()
    };
    let records = latest_by_name(fetch(client, cli, &specs).await?);
    let installed = InstalledSet::query(&cfg.package_prefix).await;

    let entries: Vec<StatusEntry> = records
        .iter()
        .map(|record| StatusEntry {
            record,
            status: installed.status_of(record),
        })
        .filter(|e| !only_installed || e.status != PackageStatus::Available)
        .filter(|e| !only_available || e.status != PackageStatus::Installed)
        .collect();

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("no matching task packages.");
        return Ok(());
    }

    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(vec!["task", "version", "repository", "status"]);
    for e in &entries {
        t.add_row(vec![
            e.record.name.clone(),
            e.record.evr.to_string(),
            e.record.repository.clone(),
            e.status.to_string(),
        ]);
    }
    println!("{}", t);
    Ok(())
}

async fn info(client: &RepoClient<QrexecChannel>, cfg: &Config, cli: &Cli, specs: &[String], json: bool) -> Result<()> {
    let records = fetch(client, cli, specs).await?;
    if records.is_empty() {
        return Err(TaskError::NotFound { spec: specs.join(" ") }.into());
    }
    let installed = InstalledSet::query(&cfg.package_prefix).await;

    if json {
        let entries: Vec<StatusEntry> = records
            .iter()
            .map(|record| StatusEntry {
                record,
                status: installed.status_of(record),
            })
            .collect();
        return print_json(&entries);
    }

    for p in &records {
        println!("{}", style(format!("Task: {}", p.name)).bold().cyan());
        println!("  Package      : {}", p.package_name(&cfg.package_prefix));
        println!("  Epoch        : {}", p.evr.epoch);
        println!("  Version      : {}", p.evr.version);
        println!("  Release      : {}", p.evr.release);
        println!("  Repository   : {}", p.repository);
        println!("  Download Size: {}", format_size(p.download_size));
        println!("  Build Date   : {}", p.build_time.format("%Y-%m-%d %H:%M"));
        println!("  License      : {}", p.license);
        println!("  URL          : {}", p.url);
        println!("  Status       : {}", status_cell(installed.status_of(p)));
        println!("  Summary      : {}", p.summary);
        println!("  Description  :");
        for line in p.description.lines() {
            println!("    {}", line);
        }
        println!();
    }
    Ok(())
}

async fn search_packages(
    client: &RepoClient<QrexecChannel>,
    cfg: &Config,
    cli: &Cli,
    keywords: &[String],
    json: bool,
) -> Result<()> {
    let records = latest_by_name(fetch(client, cli, &["*".to_string()]).await?);
    let hits = search::search(records, keywords);

    if json {
        let records: Vec<&PackageRecord> = hits.iter().map(|(_, r)| r).collect();
        return print_json(&records);
    }
    if hits.is_empty() {
        println!("no matches found.");
        return Ok(());
    }

    let installed = InstalledSet::query(&cfg.package_prefix).await;
    for (_, p) in &hits {
        let marker = match installed.status_of(p) {
            PackageStatus::Available => String::new(),
            status => format!(" [{}]", status),
        };
        println!(
            "{}/{} {}{}\n    {}",
            style(&p.repository).cyan().bold(),
            style(&p.name).bold(),
            style(p.evr.to_string()).green(),
            style(marker).yellow(),
            p.summary
        );
    }
    Ok(())
}

async fn install_packages(
    client: &RepoClient<QrexecChannel>,
    cfg: &Config,
    cli: &Cli,
    specs: &[String],
    yes: bool,
    reinstall: bool,
) -> Result<()> {
    let pb = spinner("resolving...", cli.quiet);
    let mut resolved: Vec<PackageRecord> = Vec::new();
    for (i, spec) in specs.iter().enumerate() {
        let record = match client.resolve(cli.refresh && i == 0, spec).await {
            Ok(record) => record,
            Err(e) => {
                pb.finish_and_clear();
                return Err(e.into());
            }
        };
        if !resolved.iter().any(|r| r.name == record.name) {
            resolved.push(record);
        }
    }
    pb.finish_and_clear();

    let installed = InstalledSet::query(&cfg.package_prefix).await;
    let (targets, skipped): (Vec<PackageRecord>, Vec<PackageRecord>) = resolved.into_iter().partition(|r| {
        reinstall || installed.get(&r.name).map_or(true, |evr| evr != &r.evr)
    });

    for p in &skipped {
        println!(
            "{}",
            style(format!(":: {} {} is already installed, skipping", p.name, p.evr)).yellow()
        );
    }
    if targets.is_empty() {
        println!("nothing to do.");
        return Ok(());
    }

    println!("{}", style("\nINSTALLATION").green().bold());
    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(vec!["task", "version", "download", "repository"]);
    for p in &targets {
        t.add_row(vec![
            p.name.clone(),
            p.evr.to_string(),
            format_size(p.download_size),
            p.repository.clone(),
        ]);
    }
    println!("{}", t);
    println!("\nTotal Download:  {}", format_size(total_download_size(&targets)));

    let installer = Installer::new(&cfg.install.command, &cfg.package_prefix, cfg.install.use_sudo);
    installer.install(&targets, yes).await?;
    println!("{}", style(":: installation complete.").green().bold());
    Ok(())
}
