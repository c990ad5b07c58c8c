use slog::{o, Drain, Level, Logger};

/// Asynchronous terminal logger for the binaries.
pub fn terminal_logger(verbose: bool) -> Logger {
    let level = if verbose { Level::Debug } else { Level::Info };
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// Logger that drops everything, for tests and embedding.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}
