use crate::replay::{DEFAULT_BATCH_SIZE, DEFAULT_SPEED};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ingest-replay",
    version,
    about = "Replay recorded sensor readings against the ingest API at their original cadence"
)]
pub struct Args {
    /// CSV with timestamp, sensor_id and temperature_c (or value) columns
    #[arg(long)]
    pub csv: PathBuf,
    /// Playback speed multiplier; 0 or less sends without waiting
    #[arg(long, default_value_t = DEFAULT_SPEED, allow_negative_numbers = true)]
    pub speed: f64,
    /// Only replay readings at or after this timestamp
    #[arg(long)]
    pub start: Option<String>,
    /// Only replay readings at or before this timestamp
    #[arg(long)]
    pub end: Option<String>,
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE as i64, allow_negative_numbers = true)]
    pub batch_size: i64,
    /// Device id sent with every request (default: random UUID)
    #[arg(long)]
    pub device_id: Option<String>,
    /// API base URL (default: NEXT_PUBLIC_SITE_URL or http://localhost:3000)
    #[arg(long)]
    pub api_url: Option<String>,
    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}
