use clap::clap_app;
use palaver::config::{DEFAULT_MAX_SESSIONS, DEFAULT_PORT};
use palaver::logging::terminal_logger;
use palaver::{Server, ServerConfig};
use slog::error;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = clap_app!(palaver_server =>
        (version: "0.1.0")
        (author: "Jack Lund <jackl@geekheads.net>")
        (about: "Chat relay server")
        (@arg ADDR: "IP address to listen on (default 127.0.0.1)")
        (@arg PORT: "Port to listen on, 1025-65534 (default 4444)")
        (@arg MAX: -m --max +takes_value "Maximum concurrent clients (default 10)")
        (@arg VERBOSE: -v --verbose "Log every packet")
    )
    .get_matches();

    let logger = terminal_logger(matches.is_present("VERBOSE"));
    let config = ServerConfig::new(
        matches.value_of("ADDR").unwrap_or("127.0.0.1"),
        matches
            .value_of("PORT")
            .unwrap_or(&DEFAULT_PORT.to_string()),
        matches
            .value_of("MAX")
            .unwrap_or(&DEFAULT_MAX_SESSIONS.to_string()),
    )?;

    let server = Server::bind(&config, &logger).await?;
    if let Err(e) = server.run().await {
        error!(logger, "server stopped"; "error" => %e);
        Err(e)?;
    }

    Ok(())
}
