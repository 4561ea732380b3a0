// src/bin/cli.rs

//! platefeed: bulk-import CLI for the restaurant catalog.
//!
//! Reads a free-form text file, resolves each line against the place
//! search service, checks for duplicates and submits the result in
//! chunks. Ambiguous lines prompt for a selection unless an `--auto`
//! policy is given.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use platefeed::error::Result;
use platefeed::models::{Config, ItemRecord, ItemStatus};
use platefeed::pipeline::{Pipeline, PipelineEvent, parse_items};
use platefeed::utils::log;

#[derive(Parser, Debug)]
#[command(
    name = "platefeed",
    version,
    about = "Bulk-imports restaurant and dish records into the catalog store"
)]

/// CLI Arguments
struct Cli {
    #[arg(short, long, default_value = "platefeed.toml")]
    config: String,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI Commands
#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration file
    Validate,
    /// Parse an input file and show what a run would work on
    Parse { file: PathBuf },
    /// Run the full import: parse, resolve, classify, submit
    Run {
        file: PathBuf,

        /// Resolve ambiguous lines without prompting
        #[arg(long, value_enum)]
        auto: Option<AutoPolicy>,

        /// Submit items flagged as duplicates anyway
        #[arg(long)]
        force_duplicates: bool,
    },
}

/// What to do with an ambiguous line when nobody is at the keyboard.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum AutoPolicy {
    /// Take the best-scored candidate
    Top,
    /// Skip the line
    Skip,
}

/// Main entry point
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    log::init(if cli.quiet { "warn" } else { "info" });

    match cli.command {
        Command::Validate => run_validate(&cli.config)?,
        Command::Parse { file } => run_parse(&file)?,
        Command::Run {
            file,
            auto,
            force_duplicates,
        } => {
            let config = Config::load_or_default(&cli.config);
            config.validate()?;
            run_import(config, &file, auto, force_duplicates).await?;
        }
    }

    Ok(())
}

/// Validate the configuration without touching any service.
fn run_validate(path: &str) -> Result<()> {
    let config = Config::load(path)?;
    config.validate()?;
    log::success(&format!("Configuration at {path} is valid"));
    Ok(())
}

/// Parse only: show what the run would work on, line by line.
fn run_parse(file: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let items = parse_items(&raw)?;

    log::info(&format!("Parsed {} items from {:?}", items.len(), file));
    for item in &items {
        match item.status {
            ItemStatus::Error => log::sub_item(&format!(
                "line {}: ERROR {}",
                item.line_number,
                item.message.as_deref().unwrap_or("unparseable")
            )),
            _ => log::sub_item(&format!(
                "line {}: {} '{}'{}",
                item.line_number,
                item.kind.as_str(),
                item.name,
                item.location_hint
                    .as_deref()
                    .map(|h| format!(" ({h})"))
                    .unwrap_or_default()
            )),
        }
    }
    Ok(())
}

/// Drive one full import run.
async fn run_import(
    config: Config,
    file: &PathBuf,
    auto: Option<AutoPolicy>,
    force_duplicates: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let mut pipeline = Pipeline::from_config(config)?;

    log::header("platefeed bulk import");

    log::step(1, 4, "Parsing input");
    pipeline.parse(&raw)?;
    log::info(&format!("Parsed {} items", pipeline.items().len()));

    log::step(2, 4, "Resolving places");
    pipeline.resolve_pending().await?;

    for line_number in pipeline.awaiting_selection() {
        resolve_ambiguous(&mut pipeline, line_number, auto).await?;
    }

    for item in pipeline.items() {
        if item.status == ItemStatus::ReviewNeeded {
            log::warn(&format!(
                "line {} '{}' needs manual review: {}",
                item.line_number,
                item.name,
                item.message.as_deref().unwrap_or("unresolved")
            ));
        }
    }

    log::step(3, 4, "Checking for duplicates");
    pipeline.classify().await?;
    let mut duplicate_lines = Vec::new();
    for item in pipeline.items() {
        if item.status == ItemStatus::Duplicate {
            duplicate_lines.push(item.line_number);
            log::warn(&format!(
                "line {} '{}': {}",
                item.line_number,
                item.name,
                item.message.as_deref().unwrap_or("duplicate")
            ));
        }
    }
    if force_duplicates {
        for line in duplicate_lines {
            pipeline.set_force_submit(line, true)?;
        }
    }

    log::step(4, 4, "Submitting");
    let mut events = pipeline.subscribe();
    let progress_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let PipelineEvent::Progress(p) = event {
                log::sub_item(&format!(
                    "{}% ({}/{} items)",
                    p.percent, p.submitted, p.eligible
                ));
            }
        }
    });

    let summary = pipeline.submit().await?;
    drop(pipeline);
    let _ = progress_task.await;

    log::summary(
        "Import finished",
        &[
            ("Total", summary.total.to_string()),
            ("Added", summary.added.to_string()),
            ("Duplicates", summary.duplicates.to_string()),
            ("Errors", summary.errors.to_string()),
            ("Skipped", summary.skipped.to_string()),
        ],
    );
    Ok(())
}

/// Settle one parked item, either by policy or by asking the operator.
async fn resolve_ambiguous(
    pipeline: &mut Pipeline,
    line_number: u32,
    auto: Option<AutoPolicy>,
) -> Result<()> {
    let item = pipeline
        .items()
        .iter()
        .find(|i| i.line_number == line_number)
        .cloned();
    let Some(item) = item else { return Ok(()) };

    match auto {
        Some(AutoPolicy::Top) => {
            let top = item.candidates.first().cloned();
            pipeline.select_place(line_number, top).await?;
        }
        Some(AutoPolicy::Skip) => pipeline.skip(line_number)?,
        None => {
            let choice = prompt_selection(&item)?;
            pipeline.select_place(line_number, choice.map(|i| item.candidates[i].clone())).await?;
        }
    }
    Ok(())
}

/// Interactive candidate prompt. Returns the chosen index, or `None` to skip.
fn prompt_selection(item: &ItemRecord) -> Result<Option<usize>> {
    println!();
    println!(
        "Line {} '{}' matched {} places:",
        item.line_number,
        item.name,
        item.candidates.len()
    );
    for (index, candidate) in item.candidates.iter().enumerate() {
        println!(
            "  [{}] {} - {}",
            index + 1,
            candidate.name,
            candidate.formatted_address
        );
    }

    let stdin = io::stdin();
    loop {
        print!("Select 1-{} or 's' to skip: ", item.candidates.len());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // Stdin closed; treat like a skip.
            return Ok(None);
        }
        let input = line.trim();
        if input.eq_ignore_ascii_case("s") {
            return Ok(None);
        }
        match input.parse::<usize>() {
            Ok(n) if (1..=item.candidates.len()).contains(&n) => return Ok(Some(n - 1)),
            _ => println!("Invalid choice."),
        }
    }
}
