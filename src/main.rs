use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use rayon::prelude::*;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use listen_stats::aggregate::{compute_user_top_recordings, validate_top_n};
use listen_stats::models::ListenerFilter;
use listen_stats::progress::{
    create_progress_bar, create_spinner, format_duration, log_progress, set_log_only, Phase,
};
use listen_stats::safety::{validate_output_path, STATS_OUTPUT_PATTERN};
use listen_stats::store;

#[derive(Parser)]
#[command(name = "listen-stats")]
#[command(about = "Compute per-listener top recordings from a listens database")]
struct Args {
    source: PathBuf,

    output: PathBuf,

    /// Recordings to keep per listener
    #[arg(long, default_value = "1000", allow_negative_numbers = true)]
    top_n: i64,

    /// Only these listeners (comma-separated ids)
    #[arg(long)]
    users: Option<String>,

    #[arg(long, default_value = "0")]
    workers: usize,

    /// Write run statistics as JSON to this path
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Hide progress bars, log progress lines instead
    #[arg(long)]
    log_only: bool,

    /// Print one listener's stored result after the run
    #[arg(long)]
    show: Option<i64>,
}

/// Listener results in flight between ranking and the SQLite writer
const CHANNEL_CAPACITY: usize = 4_096;

fn show_listener(conn: &Connection, listener_id: i64) -> Result<()> {
    println!("\nTop recordings for listener {}:", listener_id);
    println!("{:-<80}", "");

    let Some(result) = store::read_result(conn, listener_id)? else {
        println!("No listens found.");
        return Ok(());
    };

    for stat in result.top_recordings.iter().rev() {
        println!(
            "#{} [{} plays] {} - {} ({})",
            stat.rank,
            stat.listen_count,
            stat.artist_name,
            stat.track_name,
            stat.release_name.as_deref().unwrap_or("Unknown")
        );
    }
    println!("{} distinct recordings", result.distinct_recording_count);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    set_log_only(args.log_only);

    // Reject bad arguments before touching any database
    let top_n = validate_top_n(args.top_n)?;
    let filter = match args.users.as_deref() {
        Some(users) => ListenerFilter::parse(users)?,
        None => ListenerFilter::all(),
    };
    validate_output_path(&args.output, STATS_OUTPUT_PATTERN, &[args.source.as_path()])?;

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let start = Instant::now();

    println!("Opening source database: {:?}", args.source);
    let source_conn = store::open_source(&args.source).context("Failed to open source database")?;

    if !filter.is_empty() {
        println!("Filtering by listeners: {:?}", filter.sorted_ids());
    }

    let spinner = create_spinner(Phase::LoadCaches);
    let recording_cache = store::read_recording_cache(&source_conn)?;
    let release_cache = store::read_release_cache(&source_conn)?;
    spinner.finish_with_message(Phase::LoadCaches.done_message(format!(
        "Loaded {} recordings, {} releases",
        recording_cache.len(),
        release_cache.len()
    )));

    let events = store::read_listens(&source_conn, &filter)?;
    drop(source_conn);

    let spinner = create_spinner(Phase::Group);
    let results = compute_user_top_recordings(
        &events,
        &filter,
        &recording_cache,
        &release_cache,
        top_n as i64,
    )?;
    let mut stats = results.stats().clone();
    spinner.finish_with_message(Phase::Group.done_message(format!(
        "{} groups across {} listeners",
        stats.groups, stats.listeners
    )));

    if args.output.exists() {
        std::fs::remove_file(&args.output).context("Failed to remove existing output file")?;
    }
    println!("Creating output database: {:?}", args.output);
    let mut output_conn =
        Connection::open(&args.output).context("Failed to create output database")?;
    store::create_output_schema(&output_conn)?;

    // Rank in parallel, single writer
    let total_listeners = stats.listeners as u64;
    let pb = create_progress_bar(total_listeners, Phase::RankAndWrite);
    let (tx, rx) = bounded(CHANNEL_CAPACITY);
    let writer = thread::spawn(move || {
        let written = store::write_results(&mut output_conn, rx);
        (output_conn, written)
    });

    let kept = AtomicUsize::new(0);
    let ranked = AtomicU64::new(0);
    results.into_par_iter().for_each_with(tx, |tx, result| {
        kept.fetch_add(result.top_recordings.len(), Ordering::Relaxed);
        let done = ranked.fetch_add(1, Ordering::Relaxed) + 1;
        log_progress(&pb, Phase::RankAndWrite, done, total_listeners);
        // A closed channel means the writer failed; its error is reported below
        let _ = tx.send(result);
    });

    let (output_conn, written) = writer
        .join()
        .map_err(|_| anyhow::anyhow!("Writer thread panicked"))?;
    let written = written.context("Failed to write results")?;
    pb.finish_with_message(Phase::RankAndWrite.done_message(format!("Wrote {} listeners", written)));

    stats.recordings_kept = kept.into_inner();
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    stats.log_phase("final");
    if let Some(path) = &args.stats_json {
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats to {:?}", path))?;
    }

    let file_size = std::fs::metadata(&args.output)?.len();

    println!("\n{:=<60}", "");
    println!("Aggregation complete!");
    println!("  Listens: {}", stats.events_read);
    println!("  Listeners: {}", written);
    println!("  Recordings kept: {} ({:.1}% of groups)", stats.recordings_kept, stats.kept_rate());
    println!("  Output size: {:.2} MB", file_size as f64 / 1_048_576.0);
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    if let Some(listener_id) = args.show {
        show_listener(&output_conn, listener_id)?;
    }

    Ok(())
}
