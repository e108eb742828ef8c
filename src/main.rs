//! `torrent-leech`: download a single torrent's content to disk, then exit.
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use torrent_leech::config::Config;
use torrent_leech::engine::{Engine, EngineError};
use torrent_leech::torrent::metainfo::DEFAULT_MAX_METAINFO_BYTES;
use torrent_leech::torrent::{Torrent, TorrentError};
use torrent_leech::tracker;
use tracing_subscriber::EnvFilter;

/// Metainfo file failed to parse or didn't pass validation.
const EXIT_INVALID_METAINFO: u8 = 2;
/// Tracker announce failed or returned no peers at cold start.
const EXIT_TRACKER_UNREACHABLE: u8 = 3;
/// Peers ran out before every piece was downloaded.
const EXIT_DOWNLOAD_STALLED: u8 = 4;
/// Writing the assembled output to disk failed.
const EXIT_IO_FAILURE: u8 = 5;

#[derive(Parser, Debug)]
#[command(name = "torrent-leech", about = "Download the content of a .torrent file")]
struct Cli {
    /// Path to the .torrent metainfo file.
    torrent_file: PathBuf,

    /// Path to a YAML config file (log level/file, max peers). Missing
    /// file falls back to built-in defaults.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Local TCP port advertised to the tracker.
    #[arg(short, long, default_value_t = 6881)]
    port: u16,

    /// Directory the downloaded content is written into.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(Some(cli.config.as_path())) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "download failed");
            exit_code_for(&e)
        }
    }
}

/// Maps a fatal error to the exit code that names its kind, per the CLI's
/// documented exit-code contract.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if err.downcast_ref::<TorrentError>().is_some() {
        return ExitCode::from(EXIT_INVALID_METAINFO);
    }
    if let Some(engine_err) = err.downcast_ref::<EngineError>() {
        return match engine_err {
            EngineError::Tracker(_) | EngineError::NoPeers => ExitCode::from(EXIT_TRACKER_UNREACHABLE),
            EngineError::DownloadStalled(_) => ExitCode::from(EXIT_DOWNLOAD_STALLED),
            EngineError::Io(_) => ExitCode::from(EXIT_IO_FAILURE),
        };
    }
    ExitCode::FAILURE
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("log file should be writable");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(move || file.try_clone().expect("log file should be cloneable"))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let torrent = Torrent::load_from_path(&cli.torrent_file, DEFAULT_MAX_METAINFO_BYTES)?;
    tracing::info!(
        name = %torrent.info.name,
        info_hash = %hex::encode(torrent.info_hash),
        pieces = torrent.num_pieces(),
        "loaded torrent"
    );

    let peer_id = tracker::generate_peer_id();
    let client = tracker::Client::new(peer_id, cli.port);

    let engine = Engine::new(torrent, config.max_peers);
    let buffer = engine.download(&client).await?;
    engine.write_output(&buffer, &cli.output_dir)?;

    tracing::info!(output_dir = %cli.output_dir.display(), "download complete");
    Ok(())
}
