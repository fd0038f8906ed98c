use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Install the global subscriber.
///
/// Lines carry the thread name so worker activity (`sql-queue-worker`) stands apart from
/// connection tasks. With a log file, output is teed to it without ANSI colors.
pub(crate) fn init(verbose: bool, log_file: Option<&Path>) -> io::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_names(true)
        .with_max_level(level);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(io::stderr.and(Mutex::new(file)))
                .init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}
