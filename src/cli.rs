use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Parser)]
#[command(
    name = "aistudio-compressor",
    about = "Inspect, rebuild and replay AI Studio chat compressions",
    version
)]
struct Cli {
    /// Print the report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a captured GenerateContent request body into turns.
    DecodeHistory(DecodeHistoryArgs),
    /// Extract the summary from a captured GenerateContent response stream.
    ExtractSummary(ExtractSummaryArgs),
    /// Rebuild the injected conversation from captured traffic.
    Rebuild(RebuildArgs),
    /// Show, change or reset the persisted compression settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Send one request through the interception layer.
    Replay(ReplayArgs),
    /// Show resolved paths, timing and environment overrides.
    Status,
}

#[derive(Args)]
struct DecodeHistoryArgs {
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
}

#[derive(Args)]
struct ExtractSummaryArgs {
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
    /// Snapshot pattern; `.` also matches newlines.
    #[arg(long, value_name = "REGEX")]
    pattern: Option<String>,
}

#[derive(Args)]
struct RebuildArgs {
    /// Captured GenerateContent request body.
    #[arg(long, value_name = "PATH")]
    history: PathBuf,
    /// Captured GenerateContent response stream.
    #[arg(long, value_name = "PATH")]
    response: PathBuf,
    /// CreatePrompt request body to rewrite.
    #[arg(long, value_name = "PATH")]
    create_body: Option<PathBuf>,
    /// Directory for resolve.json, list.json and create.json.
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Reset,
    Set(SettingsSetArgs),
}

#[derive(Args)]
struct SettingsSetArgs {
    #[arg(long)]
    tail_percent: Option<f64>,
    #[arg(long)]
    tail_min_chars: Option<u64>,
    #[arg(long, value_name = "REGEX")]
    snapshot_regex: Option<String>,
    /// File holding the compression prompt.
    #[arg(long, value_name = "PATH")]
    prompt_file: Option<PathBuf>,
}

#[derive(Args)]
struct ReplayArgs {
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "POST")]
    method: String,
    #[arg(long, value_name = "PATH")]
    body_file: Option<PathBuf>,
    /// With --response, prepare a pending injection before sending.
    #[arg(long, value_name = "PATH")]
    history: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    response: Option<PathBuf>,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let state = if report.ok { "ok" } else { "failed" };
    println!("{}: {state}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Command::DecodeHistory(args) => commands::decode_history::run(&args.file)?,
        Command::ExtractSummary(args) => {
            commands::extract_summary::run(&args.file, args.pattern.as_deref())?
        }
        Command::Rebuild(args) => commands::rebuild::run(&commands::rebuild::RebuildOptions {
            history: args.history,
            response: args.response,
            create_body: args.create_body,
            out: args.out,
        })?,
        Command::Settings { action } => match action {
            SettingsAction::Show => commands::settings::show()?,
            SettingsAction::Reset => commands::settings::reset()?,
            SettingsAction::Set(args) => commands::settings::set(commands::settings::SetOptions {
                tail_percent: args.tail_percent,
                tail_min_chars: args.tail_min_chars,
                snapshot_regex: args.snapshot_regex,
                prompt_file: args.prompt_file.as_deref(),
            })?,
        },
        Command::Replay(args) => commands::replay::run(&commands::replay::ReplayOptions {
            url: args.url,
            method: args.method,
            body_file: args.body_file,
            history: args.history,
            response: args.response,
        })?,
        Command::Status => commands::status::run()?,
    };

    render(&report, cli.json)?;
    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}
