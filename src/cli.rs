//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Title install and transfer utility.
///
/// Titleferry copies byte streams between storage, network, and installer
/// backends with progress reporting and cooperative cancellation.
#[derive(Parser, Debug)]
#[command(name = "titleferry")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Hide the progress readout
    #[arg(long)]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy files or directories between host paths.
    Copy {
        /// Source paths.
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Destination directory.
        #[arg(short, long)]
        dest: PathBuf,
        /// Continue with the next item when one fails.
        #[arg(long)]
        skip_failures: bool,
    },

    /// Install ticket files into a staging directory.
    InstallTickets {
        /// Directory to scan for .tik files.
        dir: PathBuf,
        /// Staging directory standing in for the installer.
        #[arg(short, long, default_value = "./staged")]
        stage: PathBuf,
        /// Delete each ticket file after a successful install.
        #[arg(long)]
        delete: bool,
    },

    /// Install titles or tickets fetched from URLs.
    InstallUrl {
        /// URLs to fetch and install.
        #[arg(required = true)]
        urls: Vec<String>,
        /// Staging directory standing in for the installer.
        #[arg(short, long, default_value = "./staged")]
        stage: PathBuf,
        /// Report the older hardware generation for compatibility checks.
        #[arg(long)]
        old_model: bool,
    },

    /// Decode a QR payload file and install the URLs it lists.
    Qr {
        /// File holding the decoded payload text.
        payload: PathBuf,
        /// Staging directory standing in for the installer.
        #[arg(short, long, default_value = "./staged")]
        stage: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_copy_parses() {
        let args = Args::try_parse_from(["titleferry", "copy", "a.bin", "b.bin", "--dest", "out"])
            .unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        match args.command {
            Command::Copy { sources, dest, .. } => {
                assert_eq!(sources.len(), 2);
                assert_eq!(dest, PathBuf::from("out"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_install_url_defaults_stage() {
        let args =
            Args::try_parse_from(["titleferry", "install-url", "https://x.example/a.cia"]).unwrap();
        match args.command {
            Command::InstallUrl {
                urls,
                stage,
                old_model,
            } => {
                assert_eq!(urls, ["https://x.example/a.cia"]);
                assert_eq!(stage, PathBuf::from("./staged"));
                assert!(!old_model);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Args::try_parse_from(["titleferry"]).is_err());
    }
}
