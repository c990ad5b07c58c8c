use crate::framed_connection::{split_connection, PacketSink, PacketStream};
use crate::keyring::{encrypt_string, KeyPair, KeyRing, Reply};
use crate::{fingerprint, Packet, Result};
use futures::{SinkExt, StreamExt};
use slog::{debug, info, warn, Logger};
use sodiumoxide::crypto::box_::PublicKey;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

/// How long `send_direct` waits for a peer to answer a key exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whatever displays the conversation. Called from the client's receive task.
pub trait ChatView: Send + Sync {
    fn on_chat(&self, text: &str);
    fn on_direct(&self, text: &str, sender: &str);
    fn on_roster_join(&self, name: &str);
    fn on_roster_leave(&self, name: &str);
    fn on_roster_rename(&self, old_name: &str, new_name: &str);
}

/// One user's connection to the server. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

struct Shared {
    view: Arc<dyn ChatView>,
    keys: KeyPair,
    server_key: RwLock<Option<PublicKey>>,
    keyring: Mutex<KeyRing>,
    // Ticks whenever a server or peer key arrives.
    key_signal: watch::Sender<()>,
    key_watch: watch::Receiver<()>,
    encrypted: AtomicBool,
    reader: Mutex<Option<PacketStream>>,
    writer: Mutex<Option<PacketSink>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    logger: Logger,
}

impl Client {
    /// Encryption starts switched on.
    pub fn new(view: Arc<dyn ChatView>, logger: &Logger) -> Result<Self> {
        crate::init()?;
        let (key_signal, key_watch) = watch::channel(());
        Ok(Self {
            shared: Arc::new(Shared {
                view,
                keys: KeyPair::generate(),
                server_key: RwLock::new(None),
                keyring: Mutex::new(KeyRing::default()),
                key_signal,
                key_watch,
                encrypted: AtomicBool::new(true),
                reader: Mutex::new(None),
                writer: Mutex::new(None),
                listener: Mutex::new(None),
                logger: logger.clone(),
            }),
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        self.shared.keys.public_key()
    }

    pub async fn connect(&self, address: SocketAddr) -> bool {
        match TcpStream::connect(address).await {
            Ok(stream) => {
                self.attach(stream).await;
                info!(self.shared.logger, "connected"; "server" => %address);
                true
            }
            Err(error) => {
                warn!(self.shared.logger, "connection failed"; "server" => %address, "error" => %error);
                false
            }
        }
    }

    pub(crate) async fn attach<T>(&self, connection: T)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = split_connection(connection);
        *self.shared.reader.lock().await = Some(reader);
        *self.shared.writer.lock().await = Some(writer);
    }

    /// Start handling packets from the server. The task ends when the
    /// connection does, or on `disconnect`.
    pub async fn run(&self) {
        let client = self.clone();
        let handle = tokio::spawn(async move { client.listen().await });
        if let Some(previous) = self.shared.listener.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Close the connection and forget every key learned over it. Nothing
    /// read from the old connection is handled after this returns.
    pub async fn disconnect(&self) {
        if let Some(listener) = self.shared.listener.lock().await.take() {
            listener.abort();
        }
        self.shared.reader.lock().await.take();
        if let Some(mut sink) = self.shared.writer.lock().await.take() {
            if let Err(error) = sink.close().await {
                debug!(self.shared.logger, "error closing connection"; "error" => %error);
            }
        }
        *self.shared.server_key.write().await = None;
        self.shared.keyring.lock().await.clear();
    }

    pub async fn reconnect(&self, address: SocketAddr) -> bool {
        self.disconnect().await;
        if self.connect(address).await {
            self.run().await;
            true
        } else {
            false
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.writer.lock().await.is_some()
    }

    /// Flip encryption on or off, returning the new setting.
    pub fn toggle_encryption(&self) -> bool {
        !self.shared.encrypted.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_encrypted(&self) -> bool {
        self.shared.encrypted.load(Ordering::SeqCst)
    }

    pub async fn server_key(&self) -> Option<PublicKey> {
        *self.shared.server_key.read().await
    }

    /// Wait until the server has sent its key, which it does on connect.
    pub async fn await_server_key(&self, within: Duration) -> Result<()> {
        let mut changes = self.shared.key_watch.clone();
        let deadline = Instant::now() + within;
        loop {
            if self.server_key().await.is_some() {
                return Ok(());
            }
            match timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => {}
                _ => Err("no key received from the server")?,
            }
        }
    }

    pub async fn send_chat(&self, text: &str) -> Result<()> {
        if !self.is_encrypted() {
            return self.send(Packet::chat(text)).await;
        }
        let server_key = self.require_server_key().await?;
        self.send(Packet::EncryptedChatMessage {
            message: encrypt_string(text, &server_key),
            sender: None,
        })
        .await
    }

    /// With encryption on, the text is sealed for the recipient and only the
    /// recipient's name is readable by the server. A first message to someone
    /// waits for the key exchange with them to finish.
    pub async fn send_direct(&self, text: &str, recipient: &str) -> Result<()> {
        if !self.is_encrypted() {
            return self.send(Packet::direct(text, recipient)).await;
        }
        let server_key = self.require_server_key().await?;
        let peer_key = self.peer_key(recipient).await?;
        self.send(Packet::EncryptedDirectMessage {
            message: encrypt_string(text, &peer_key),
            recipient: encrypt_string(recipient, &server_key),
        })
        .await
    }

    pub async fn set_nickname(&self, name: &str) -> Result<()> {
        self.send(Packet::nickname(name)).await
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        let mut writer = self.shared.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => Ok(sink.send(packet).await?),
            None => Err("not connected to a server")?,
        }
    }

    async fn require_server_key(&self) -> Result<PublicKey> {
        match self.server_key().await {
            Some(key) => Ok(key),
            None => Err("the server has not sent its key yet")?,
        }
    }

    async fn peer_key(&self, name: &str) -> Result<PublicKey> {
        let mut changes = self.shared.key_watch.clone();
        let start_handshake = {
            let mut keyring = self.shared.keyring.lock().await;
            if let Some(key) = keyring.get(name) {
                return Ok(*key);
            }
            keyring.begin_handshake(name)
        };
        if start_handshake {
            debug!(self.shared.logger, "starting key exchange"; "peer" => name);
            self.send(Packet::PublicKey {
                key: *self.public_key(),
                name: name.into(),
            })
            .await?;
        }

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            match timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => {}
                _ => {
                    self.shared.keyring.lock().await.cancel_handshake(name);
                    Err(format!("no key received from {}", name))?;
                }
            }
            if let Some(key) = self.shared.keyring.lock().await.get(name) {
                return Ok(*key);
            }
        }
    }

    async fn listen(&self) {
        let mut stream = match self.shared.reader.lock().await.take() {
            Some(stream) => stream,
            None => {
                warn!(self.shared.logger, "not connected, nothing to listen to");
                return;
            }
        };

        while let Some(next) = stream.next().await {
            match next {
                Ok(packet) => {
                    let kind = packet.kind();
                    if let Err(error) = self.handle(packet).await {
                        warn!(self.shared.logger, "packet dropped"; "kind" => kind, "error" => %error);
                    }
                }
                Err(error) => {
                    debug!(self.shared.logger, "unreadable frame"; "error" => %error);
                    break;
                }
            }
        }
        info!(self.shared.logger, "disconnected from server");
    }

    async fn handle(&self, packet: Packet) -> Result<()> {
        let shared = &self.shared;
        match packet {
            Packet::ChatMessage { message, sender } => {
                let sender = sender.unwrap_or_else(|| "server".into());
                shared.view.on_chat(&format!("{} says: {}", sender, message));
            }
            Packet::EncryptedChatMessage { message, sender } => {
                let message = shared.keys.decrypt_string(&message)?;
                let sender = match sender {
                    Some(sender) => shared.keys.decrypt_string(&sender)?,
                    None => "server".into(),
                };
                shared.view.on_chat(&format!("{} says: {}", sender, message));
            }
            Packet::DirectMessage { message, recipient } => {
                shared.view.on_direct(&message, &recipient);
            }
            Packet::EncryptedDirectMessage { message, recipient } => {
                let sender = shared.keys.decrypt_string(&recipient)?;
                let message = shared.keys.decrypt_string(&message)?;
                shared.view.on_direct(&message, &sender);
            }
            Packet::UpdateNickname { name, old_name } => match old_name {
                Some(old_name) => {
                    shared.keyring.lock().await.rename_contact(&old_name, &name);
                    shared.view.on_roster_rename(&old_name, &name);
                }
                None => shared.view.on_roster_join(&name),
            },
            Packet::ClientJoin { name } => shared.view.on_roster_join(&name),
            Packet::ClientLeave { name } => {
                shared.keyring.lock().await.remove_contact(&name);
                shared.view.on_roster_leave(&name);
            }
            Packet::ServerKey { key } => {
                debug!(shared.logger, "server key received"; "key" => fingerprint(&key));
                self.send(Packet::ServerKey {
                    key: *self.public_key(),
                })
                .await?;
                *shared.server_key.write().await = Some(key);
                let _ = shared.key_signal.send(());
            }
            Packet::PublicKey { key, name } => {
                let reply = shared.keyring.lock().await.accept_key(&name, key);
                let _ = shared.key_signal.send(());
                if reply == Reply::SendOwnKey {
                    debug!(shared.logger, "answering key exchange"; "peer" => &name);
                    self.send(Packet::PublicKey {
                        key: *self.public_key(),
                        name,
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }
}
