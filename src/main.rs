mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::thread;

use clap::Parser;

use crate::cli::{Cli, Command};
use frame_logger::image::{self, ImageEncoding};
use frame_logger::{
    init_log, init_tracing, log_debug, log_info, log_warn, here, InternedStr, LogReader,
    LoggerConfig, ReplayError,
};

fn dump(path: &Path, all: bool) -> Result<(), ReplayError> {
    let data = image::load_image(path)?;
    let mut reader = LogReader::new(&data)?;
    let mut shown = 0usize;
    while let Some(entry) = reader.read_entry()? {
        if all || !entry.is_internal() {
            println!("{}", entry.format());
            shown += 1;
        }
    }
    tracing::debug!(
        shown,
        schemas = reader.catalog().schemas.len(),
        segments = reader.segments().len(),
        "dumped image"
    );
    Ok(())
}

fn demo(path: &Path) -> std::io::Result<()> {
    init_log(&LoggerConfig {
        text_file: None,
        ..LoggerConfig::from_env()
    })?;

    let workers: Vec<_> = (0..3u16)
        .map(|worker| {
            thread::spawn(move || {
                let queue = InternedStr::new("ingest");
                for job in 0..4u32 {
                    log_debug!("demo.job.started", worker = worker, job = job, queue = queue);
                }
                log_info!("demo.connected", port = 8080 + worker, origin = here!());
            })
        })
        .collect();
    for worker in workers {
        if worker.join().is_err() {
            log_warn!("demo.worker_panicked");
        }
    }

    image::save_global_image(path, ImageEncoding::Lz4)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Command::Dump { all, image } => dump(image, *all).map_err(|err| err.to_string()),
        Command::Demo { image } => demo(image).map_err(|err| err.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("frame_logger: {}", message);
            ExitCode::FAILURE
        }
    }
}
