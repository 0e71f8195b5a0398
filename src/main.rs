//! Tool to look into Intel flash images
//!
//! A full image in descriptor mode starts with the flash descriptor, which
//! tells us where the regions are. The BIOS region in turn holds a sequence
//! of UEFI firmware volumes. BIOS update images often lack the descriptor, so
//! they can be scanned for firmware volumes directly.

use std::{fs, process};

use clap::{Parser, Subcommand};
use log::{debug, error, info};

mod show;

use intel_flash::{bios::BiosRegion, decode};

#[derive(Subcommand, Debug)]
enum Command {
    /// Display the flash descriptor, regions, masters and firmware volumes
    #[clap(verbatim_doc_comment)]
    Show {
        /// File to read
        file_name: String,
    },
    /// Scan for firmware volumes (BIOS region or update images)
    #[clap(verbatim_doc_comment)]
    Scan {
        /// File to read
        file_name: String,
    },
}

/// Analyze Intel flash images
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command to run
    #[command(subcommand)]
    cmd: Command,
    #[clap(long, short, action)]
    debug: bool,
    #[clap(long, short, action)]
    verbose: bool,
}

fn read(file_name: &str) -> Vec<u8> {
    info!("Reading {file_name}...");
    match fs::read(file_name) {
        Ok(d) => d,
        Err(e) => {
            error!("Cannot read {file_name}: {e}");
            process::exit(1);
        }
    }
}

fn main() {
    let Cli {
        cmd,
        debug,
        verbose,
    } = Cli::parse();

    // Default to log level "info". Otherwise, you get no "regular" logs.
    let level = if debug { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(level);
    env_logger::Builder::from_env(env).init();

    debug!("Command: {cmd:?}");
    match cmd {
        Command::Show { file_name } => {
            let data = read(&file_name);
            match decode(&data) {
                Ok((image, issues)) => show::show(&image, &issues, verbose),
                Err(e) => {
                    error!("Could not decode flash image: {e}");
                    process::exit(1);
                }
            }
        }
        Command::Scan { file_name } => {
            let data = read(&file_name);
            match BiosRegion::parse(&data, 0) {
                Ok(bios) => show::show_bios(&bios, verbose),
                Err(e) => {
                    error!("Could not scan for firmware volumes: {e}");
                    process::exit(1);
                }
            }
        }
    }
}
