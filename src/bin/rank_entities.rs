//! Rank entities by popularity and compose page payloads from JSON files.
//!
//! Usage:
//!   rank-entities release-groups <entities.json> <popularity.json> [--top]
//!   rank-entities artist <artist.json> <release_groups.json> <popularity.json> [--listening-stats <stats.json>]
//!   rank-entities album <release_group_id> <metadata.json> <recordings.json> <popularity.json> [--listening-stats <stats.json>]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use listen_stats::models::{AlbumRecordings, PopularityRecord, RankableEntity};
use listen_stats::payload::{AlbumPayload, ArtistPayload, ListeningStats};
use listen_stats::ranking::{rank_entities_by_popularity, top_entity};

#[derive(Parser)]
#[command(name = "rank-entities")]
#[command(about = "Rank entities by popularity for display")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rank entities, most popular first
    ReleaseGroups {
        entities: PathBuf,
        popularity: PathBuf,
        /// Print only the top entity (null when there are none)
        #[arg(long)]
        top: bool,
    },
    /// Compose an artist page payload
    Artist {
        artist: PathBuf,
        release_groups: PathBuf,
        popularity: PathBuf,
        #[arg(long)]
        listening_stats: Option<PathBuf>,
    },
    /// Compose an album page payload
    Album {
        release_group_id: String,
        metadata: PathBuf,
        /// `{"release_mbid": ..., "mediums": [...]}`
        recordings: PathBuf,
        popularity: PathBuf,
        #[arg(long)]
        listening_stats: Option<PathBuf>,
    },
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {:?}", path))
}

fn read_listening_stats(path: Option<&Path>) -> Result<Option<ListeningStats>> {
    path.map(read_json::<ListeningStats>).transpose()
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = match args.command {
        Command::ReleaseGroups {
            entities,
            popularity,
            top,
        } => {
            let entities: Vec<RankableEntity> = read_json(&entities)?;
            let popularity: Vec<PopularityRecord> = read_json(&popularity)?;
            let ranked = rank_entities_by_popularity(entities, &popularity)?;
            if top {
                serde_json::to_string_pretty(&top_entity(&ranked))?
            } else {
                serde_json::to_string_pretty(&ranked)?
            }
        }
        Command::Artist {
            artist,
            release_groups,
            popularity,
            listening_stats,
        } => {
            let payload = ArtistPayload::compose(
                read_json(&artist)?,
                read_json(&release_groups)?,
                &read_json::<Vec<PopularityRecord>>(&popularity)?,
                read_listening_stats(listening_stats.as_deref())?,
            )?;
            serde_json::to_string_pretty(&payload)?
        }
        Command::Album {
            release_group_id,
            metadata,
            recordings,
            popularity,
            listening_stats,
        } => {
            let recordings: AlbumRecordings = read_json(&recordings)?;
            let payload = AlbumPayload::compose(
                release_group_id,
                read_json(&metadata)?,
                recordings,
                &read_json::<Vec<PopularityRecord>>(&popularity)?,
                read_listening_stats(listening_stats.as_deref())?,
            );
            serde_json::to_string_pretty(&payload)?
        }
    };

    println!("{}", output);
    Ok(())
}
