//! Shared fixtures for the end-to-end relay tests.

use palaver::logging::discard;
use palaver::{ChatView, Client, Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Chat(String),
    Direct { text: String, sender: String },
    Join(String),
    Leave(String),
    Rename { old: String, new: String },
}

pub fn chat(text: &str) -> Event {
    Event::Chat(text.into())
}

pub fn direct(text: &str, sender: &str) -> Event {
    Event::Direct {
        text: text.into(),
        sender: sender.into(),
    }
}

pub fn rename(old: &str, new: &str) -> Event {
    Event::Rename {
        old: old.into(),
        new: new.into(),
    }
}

/// Forwards everything the client displays into a channel.
struct Recorder(mpsc::UnboundedSender<Event>);

impl ChatView for Recorder {
    fn on_chat(&self, text: &str) {
        let _ = self.0.send(Event::Chat(text.into()));
    }

    fn on_direct(&self, text: &str, sender: &str) {
        let _ = self.0.send(direct(text, sender));
    }

    fn on_roster_join(&self, name: &str) {
        let _ = self.0.send(Event::Join(name.into()));
    }

    fn on_roster_leave(&self, name: &str) {
        let _ = self.0.send(Event::Leave(name.into()));
    }

    fn on_roster_rename(&self, old_name: &str, new_name: &str) {
        let _ = self.0.send(rename(old_name, new_name));
    }
}

pub struct TestClient {
    pub client: Client,
    events: mpsc::UnboundedReceiver<Event>,
}

impl TestClient {
    /// Wait for `wanted`, returning whatever was displayed before it.
    pub async fn expect(&mut self, wanted: Event) -> Vec<Event> {
        let mut skipped = Vec::new();
        loop {
            match timeout(WAIT, self.events.recv()).await {
                Ok(Some(event)) if event == wanted => return skipped,
                Ok(Some(event)) => skipped.push(event),
                Ok(None) => panic!("view dropped while waiting for {:?}", wanted),
                Err(_) => panic!("timed out waiting for {:?}, saw {:?}", wanted, skipped),
            }
        }
    }

    /// Everything displayed within a short quiet period.
    pub async fn drain(&mut self) -> Vec<Event> {
        let mut seen = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_millis(200), self.events.recv()).await {
            seen.push(event);
        }
        seen
    }
}

pub async fn start_server(max_sessions: usize) -> SocketAddr {
    let config = ServerConfig {
        address: "127.0.0.1:0".parse().unwrap(),
        max_sessions,
    };
    let server = Server::bind(&config, &discard()).await.unwrap();
    let address = server.local_addr().unwrap();
    tokio::spawn(server.run());
    address
}

/// Connect a client without waiting for the server's greeting.
pub async fn connect(address: SocketAddr) -> TestClient {
    let (sender, events) = mpsc::unbounded_channel();
    let client = Client::new(Arc::new(Recorder(sender)), &discard()).unwrap();
    assert!(client.connect(address).await);
    client.run().await;
    TestClient { client, events }
}

/// Connect a client, wait for the server handshake, and take `name`.
/// Every client in `others` waits until it has seen the rename, so once this
/// returns the newcomer is known to all of them.
pub async fn join_as(address: SocketAddr, name: &str, others: &mut [&mut TestClient]) -> TestClient {
    let mut joined = connect(address).await;
    joined.client.await_server_key(WAIT).await.unwrap();

    let default = loop {
        match timeout(WAIT, joined.events.recv()).await {
            Ok(Some(Event::Join(own))) => break own,
            other => panic!("expected own join first, got {:?}", other),
        }
    };
    joined.client.set_nickname(name).await.unwrap();
    joined.expect(rename(&default, name)).await;
    for other in others.iter_mut() {
        other.expect(rename(&default, name)).await;
    }
    joined
}
