//! Command-line surface (component I). A single positional argument (the
//! metainfo file) plus the ambient flags every CLI in this corpus carries,
//! per the design's §4.8. The teacher's `Decode` debug subcommand is kept
//! as a secondary action: it costs nothing and is handy for inspecting a
//! raw bencode fragment without a full download run.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the .torrent metainfo file to download.
    pub torrent_file: Option<PathBuf>,

    /// Directory the downloaded files are written under. Created if missing.
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Raise the log level. Repeat for more detail (-v = info, -vv = debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub debug: Option<DebugAction>,
}

#[derive(Subcommand)]
pub enum DebugAction {
    /// Decode a raw bencode fragment and print its structure. Debug-only;
    /// not part of the download path.
    Decode { bencode: String },
}
