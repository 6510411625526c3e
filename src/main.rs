mod arg_parse;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use bencode::Bencode;
use bit_torrust::config;
use bit_torrust::metainfo::Metainfo;
use bit_torrust::peer_pool::PeerPool;
use bit_torrust::pieces_manager::PiecesManager;
use bit_torrust::tracker::TrackerClient;
use bit_torrust::{application, config::peer_id};
use clap::Parser;

fn main() -> ExitCode {
    let cli = arg_parse::Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(log_level).parse_default_env().init();

    if let Some(arg_parse::DebugAction::Decode { bencode }) = cli.debug {
        return run_decode(&bencode);
    }

    let Some(torrent_file) = cli.torrent_file else {
        eprintln!("usage: bit-torrust <TORRENT_FILE> [-o OUTPUT_DIR]");
        return ExitCode::FAILURE;
    };

    match download(&torrent_file, &cli.output_dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Loader → tracker → peer pool → application loop, per the design's §4.8
/// wiring contract. Only [`Metainfo`] loading is fatal; everything past that
/// point recovers locally per the disposition table in the design's §7.
fn download(torrent_file: &std::path::Path, output_dir: &std::path::Path) -> bit_torrust::error::Result<()> {
    let metainfo = Metainfo::load(torrent_file)?;
    log::info!(
        "loaded {}: {} pieces, {} bytes total",
        torrent_file.display(),
        metainfo.pieces.len(),
        metainfo.total_length
    );

    let pieces = Arc::new(PiecesManager::new(
        &metainfo.pieces,
        metainfo.piece_length,
        metainfo.total_length,
        &metainfo.files,
        output_dir,
    ));

    let peer_id = peer_id();
    let tracker = TrackerClient::new();
    // TrackerFailure is never fatal (spec.md §7): once every announce URL
    // has been tried and failed, log it and carry on with no peers rather
    // than aborting the whole download.
    let mut peers = tracker
        .announce(
            &metainfo.announce_list,
            metainfo.info_hash,
            peer_id,
            config::ANNOUNCE_PORT,
            metainfo.total_length,
        )
        .unwrap_or_else(|e| {
            log::warn!("tracker announce exhausted every URL: {}", e);
            Vec::new()
        });
    peers.truncate(config::MAX_PEERS_TRY_CONNECT);
    log::info!("tracker returned {} candidate peers", peers.len());

    let pool = Arc::new(PeerPool::new(
        metainfo.info_hash,
        peer_id,
        metainfo.pieces.len(),
        pieces.clone(),
        config::DEFAULT_RNG_SEED,
    ));
    pool.add_peers(&peers);

    let io_pool = pool.clone();
    let io_thread = thread::spawn(move || io_pool.run_io_loop());

    application::run(pool, pieces);

    io_thread.join().expect("io thread should not panic");
    Ok(())
}

fn run_decode(bencode: &str) -> ExitCode {
    match Bencode::from_bytes(bencode.as_bytes(), |s| match s {
        "pieces" => Some(20),
        _ => None,
    }) {
        Ok((value, _)) => {
            println!("{:?}", value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to decode: {}", e);
            ExitCode::FAILURE
        }
    }
}
