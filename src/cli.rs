use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Writes and replays binary log images.
#[derive(Parser, Debug)]
#[command(name = "frame_logger")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug output from the logger's own tracing
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print every entry of a saved image as text
    Dump {
        /// Include internal bookkeeping entries
        #[arg(long)]
        all: bool,

        /// Image file, plain or lz4-compressed
        image: PathBuf,
    },

    /// Log from a few threads and save the image
    Demo {
        /// Where to write the image
        image: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_with_flags() {
        let cli = Cli::try_parse_from(["frame_logger", "-v", "dump", "--all", "run.flog"])
            .expect("valid arguments");
        assert!(cli.verbose);
        match cli.command {
            Command::Dump { all, image } => {
                assert!(all);
                assert_eq!(image, PathBuf::from("run.flog"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_demo() {
        let cli = Cli::try_parse_from(["frame_logger", "demo", "out.flog"]).expect("valid arguments");
        assert!(!cli.verbose);
        assert!(matches!(
            cli.command,
            Command::Demo { ref image } if *image == PathBuf::from("out.flog")
        ));
    }

    #[test]
    fn test_missing_image_is_rejected() {
        assert!(Cli::try_parse_from(["frame_logger", "dump"]).is_err());
        assert!(Cli::try_parse_from(["frame_logger"]).is_err());
        assert!(Cli::try_parse_from(["frame_logger", "replay", "x"]).is_err());
    }
}
