use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use humansize::{format_size, DECIMAL};
use importer::{ImportOptions, Importer, ImporterConfig, Job, JobStatus};
use log::{info, warn};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Import photos and footage from a card into an organized project
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify and count the files on a source
    Scan { source: PathBuf },
    /// Show capture-date groups with sample files
    Dates { source: PathBuf },
    /// Estimate destination size for a preset
    Estimate {
        source: PathBuf,
        #[arg(short, long)]
        preset: Option<String>,
    },
    /// Import a source into a project and wait for it to finish
    Import {
        source: PathBuf,
        project: String,
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value = "")]
        notes: String,
        /// Keep the source layout flat instead of RAW/JPEG/Video/Other
        #[arg(long)]
        flat: bool,
        /// Re-encode GoPro footage after copying
        #[arg(long)]
        convert: bool,
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        delete_originals: bool,
        /// Add to an existing project
        #[arg(long)]
        merge: bool,
        /// Only import these capture dates (YYYY-MM-DD), repeatable
        #[arg(long = "date")]
        dates: Vec<NaiveDate>,
    },
    /// List the conversion presets
    Presets,
    /// Check the ffmpeg binary
    FfmpegStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; --verbose raises the default to debug
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = ImporterConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    info!("Library root: {}", cfg.library_root.display());
    let importer = Importer::new(cfg);

    match args.command {
        Command::Scan { source } => {
            let result = importer.scan(&source).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result.counts)?);
            } else {
                let c = &result.counts;
                println!("{} files, {}", c.total(), format_size(result.total_size, DECIMAL));
                println!("  raw:   {}", c.raw);
                println!("  jpeg:  {}", c.jpeg);
                println!("  video: {}", c.video);
                println!("  gopro: {} ({})", c.gopro, format_size(result.gopro_size(), DECIMAL));
                println!("  other: {}", c.other);
                if result.skipped_entries > 0 {
                    println!("  skipped: {}", result.skipped_entries);
                }
            }
        }
        Command::Dates { source } => {
            let groups = importer.date_preview(&source).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else {
                for group in &groups {
                    println!(
                        "{}  {:>5} files ({} raw, {} jpeg)",
                        group.date, group.total_count, group.raw_count, group.jpeg_count
                    );
                    for sample in &group.samples {
                        println!("    {}", sample.file_name);
                    }
                }
            }
        }
        Command::Estimate { source, preset } => {
            let preset = preset.unwrap_or_else(|| importer.config().default_preset.clone());
            let scan = importer.scan(&source).await?;
            let estimate = importer.estimate_size(&scan, &preset);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&estimate)?);
            } else {
                println!("Estimated: {}", format_size(estimate.estimated_bytes, DECIMAL));
                match estimate.free_bytes {
                    Some(free) => println!("Free:      {}", format_size(free, DECIMAL)),
                    None => println!("Free:      unknown"),
                }
                if !estimate.sufficient {
                    warn!("Not enough free space for this import");
                }
            }
        }
        Command::Import {
            source,
            project,
            prefix,
            notes,
            flat,
            convert,
            preset,
            delete_originals,
            merge,
            dates,
        } => {
            let mut options = ImportOptions::new(source, project);
            options.file_prefix = prefix;
            options.notes = notes;
            options.organize = !flat;
            options.convert = convert;
            options.preset = preset;
            options.delete_originals = delete_originals;
            options.merge_into_existing = merge;
            if !dates.is_empty() {
                options.selected_dates = Some(dates.into_iter().collect::<BTreeSet<_>>());
            }

            let job_id = importer.start_import(options).await?;
            info!("Started import job {}", job_id);
            let job = wait_for_job(&importer, &job_id).await?;
            report(&job, args.json)?;

            if let Some(conversion_id) = job.conversion_job_id {
                let conversion = wait_for_job(&importer, &conversion_id).await?;
                report(&conversion, args.json)?;
            }
        }
        Command::Presets => {
            let presets = importer.presets();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&presets)?);
            } else {
                for p in &presets {
                    println!("{:<14} x{:<5} {}  {}", p.id, p.size_multiplier, p.extension, p.description);
                }
            }
        }
        Command::FfmpegStatus => {
            let status = importer.transcoder_status().await;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else if status.available {
                println!("✅ {} ({})", status.path.display(), status.version.unwrap_or_default());
            } else {
                println!("❌ FFmpeg not found at {}", status.path.display());
            }
        }
    }

    Ok(())
}

/// Poll until the job leaves its running states, printing progress as it changes
async fn wait_for_job(importer: &Importer, job_id: &str) -> Result<Job> {
    let mut last_line = String::new();
    loop {
        let job = importer.get_job(job_id).await?;
        let line = format!(
            "[{:>5.1}%] {}/{} {}",
            job.progress,
            job.completed,
            job.total,
            job.current_item.as_deref().unwrap_or("")
        );
        if line != last_line {
            info!("{:?} {}", job.kind, line);
            last_line = line;
        }

        match job.status {
            JobStatus::Queued | JobStatus::Running => {}
            // conversion is started separately; wait until it is linked
            JobStatus::PendingConversion if importer.config().auto_start_conversion && job.conversion_job_id.is_none() => {}
            _ => return Ok(job),
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

fn report(job: &Job, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(job)?);
        return Ok(());
    }

    let s = &job.summary;
    println!("{:?} job {}: {:?}", job.kind, job.id, job.status);
    for (label, counts) in [("raw", s.raw), ("jpeg", s.jpeg), ("video", s.video), ("gopro", s.gopro), ("other", s.other)] {
        if counts.succeeded + counts.failed > 0 {
            println!("  {:<6} {} ok, {} failed", label, counts.succeeded, counts.failed);
        }
    }
    if s.queued_for_conversion > 0 {
        println!("  {} file(s) queued for conversion", s.queued_for_conversion);
    }
    for failure in &s.failures {
        println!("  ❌ {}: {}", failure.file, failure.error);
    }
    if let Some(error) = &job.error {
        println!("  error: {}", error);
    }
    Ok(())
}
