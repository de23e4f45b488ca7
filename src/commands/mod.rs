//! Command-line surface.

mod batch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reelqueue_core::models::settings::Quality;

pub use batch::{load_catalog, run_check, run_config, run_download, run_manifest};

#[derive(Debug, Parser)]
#[command(name = "reelqueue")]
#[command(about = "Sequential bulk downloader for curated video selections", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download every item of a catalog file, one at a time.
    Download {
        /// JSON array of items as exported by the catalog.
        catalog: PathBuf,

        /// Directory for the media files and the manifest.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// best, 1080, 720, 480 or 360.
        #[arg(long, short)]
        quality: Option<Quality>,

        /// Extract audio to mp3 instead of video.
        #[arg(long)]
        audio_only: bool,

        /// Re-run failed entries up to N times after the batch.
        #[arg(long, default_value = "0", value_name = "N")]
        retries: u32,
    },

    /// Run the availability probe and report which backend would lead.
    Check,

    /// Write the CSV manifest for a catalog without downloading.
    Manifest {
        catalog: PathBuf,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print the effective settings.
    Config {
        /// Write the effective settings to the settings file.
        #[arg(long)]
        init: bool,
    },
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        CliCommand::Download {
            catalog,
            output,
            quality,
            audio_only,
            retries,
        } => run_download(&catalog, output, quality, audio_only, retries).await,
        CliCommand::Check => run_check().await,
        CliCommand::Manifest { catalog, output } => run_manifest(&catalog, output),
        CliCommand::Config { init } => run_config(init),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_download_flags() {
        let cli = Cli::try_parse_from([
            "reelqueue",
            "download",
            "picks.json",
            "--output",
            "out",
            "--quality",
            "1080p",
            "--audio-only",
            "--retries",
            "2",
        ])
        .unwrap();

        match cli.command {
            CliCommand::Download {
                catalog,
                output,
                quality,
                audio_only,
                retries,
            } => {
                assert_eq!(catalog, PathBuf::from("picks.json"));
                assert_eq!(output, Some(PathBuf::from("out")));
                assert_eq!(quality, Some(Quality::P1080));
                assert!(audio_only);
                assert_eq!(retries, 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_quality() {
        assert!(Cli::try_parse_from(["reelqueue", "download", "x.json", "-q", "4k"]).is_err());
    }
}
