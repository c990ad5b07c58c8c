use clap::clap_app;
use futures::StreamExt;
use palaver::config::{parse_address, DEFAULT_PORT};
use palaver::logging::terminal_logger;
use palaver::{ChatView, Client};
use std::sync::Arc;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

struct Console;

impl ChatView for Console {
    fn on_chat(&self, text: &str) {
        println!("{}", text);
    }

    fn on_direct(&self, text: &str, sender: &str) {
        println!("[{}] {}", sender, text);
    }

    fn on_roster_join(&self, name: &str) {
        println!("* {} joined", name);
    }

    fn on_roster_leave(&self, name: &str) {
        println!("* {} left", name);
    }

    fn on_roster_rename(&self, old_name: &str, new_name: &str) {
        println!("* {} is now {}", old_name, new_name);
    }
}

enum Command<'a> {
    Chat(&'a str),
    Direct { recipient: &'a str, text: &'a str },
    Nickname(&'a str),
    ToggleEncryption,
    Quit,
}

fn parse_line(line: &str) -> Result<Command> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Ok(Command::Chat(line));
    }

    let (command, rest) = match line.find(' ') {
        Some(idx) => (&line[..idx], line[idx + 1..].trim()),
        None => (line, ""),
    };
    Ok(match command {
        "/nick" => Command::Nickname(rest),
        "/dm" => match rest.find(' ') {
            Some(idx) => Command::Direct {
                recipient: &rest[..idx],
                text: rest[idx + 1..].trim(),
            },
            None => Err("usage: /dm <name> <message>")?,
        },
        "/encrypt" => Command::ToggleEncryption,
        "/quit" => Command::Quit,
        other => Err(format!("unknown command {}", other))?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = clap_app!(palaver_client =>
        (version: "0.1.0")
        (author: "Jack Lund <jackl@geekheads.net>")
        (about: "Chat relay client")
        (@arg ADDR: "Server IP address (default 127.0.0.1)")
        (@arg PORT: "Server port (default 4444)")
        (@arg PLAIN: -p --plain "Start with encryption switched off")
        (@arg VERBOSE: -v --verbose "Debug logging")
    )
    .get_matches();

    let logger = terminal_logger(matches.is_present("VERBOSE"));
    let address = parse_address(
        matches.value_of("ADDR").unwrap_or("127.0.0.1"),
        matches
            .value_of("PORT")
            .unwrap_or(&DEFAULT_PORT.to_string()),
    )?;

    let client = Client::new(Arc::new(Console), &logger)?;
    if matches.is_present("PLAIN") {
        client.toggle_encryption();
    }
    if !client.connect(address).await {
        Err(format!("Failed to connect to {}", address))?;
    }
    client.run().await;

    // Set up terminal I/O
    let mut lines_from_stdin = LinesStream::new(BufReader::new(stdin()).lines());

    while let Some(line) = lines_from_stdin.next().await {
        let line = line?;
        let result = match parse_line(&line) {
            Ok(Command::Chat(text)) if text.is_empty() => continue,
            Ok(Command::Chat(text)) => client.send_chat(text).await,
            Ok(Command::Direct { recipient, text }) => client.send_direct(text, recipient).await,
            Ok(Command::Nickname(name)) => client.set_nickname(name).await,
            Ok(Command::ToggleEncryption) => {
                let on = client.toggle_encryption();
                println!("* encryption {}", if on { "on" } else { "off" });
                Ok(())
            }
            Ok(Command::Quit) => break,
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            println!("error: {}", error);
        }
    }

    client.disconnect().await;

    Ok(())
}
