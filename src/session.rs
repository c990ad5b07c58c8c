use crate::framed_connection::{split_connection, PacketSink, PacketStream};
use crate::keyring::KeyPair;
use crate::{default_name, Packet, Result};
use futures::{SinkExt, StreamExt};
use slog::{debug, o, Logger};
use sodiumoxide::crypto::box_::PublicKey;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio::sync::{Mutex, Notify, RwLock};

pub type SessionId = u32;

/// Server-side state for one accepted connection.
///
/// Reads and writes lock separately, so a session can be sent to while its
/// receive loop is waiting for the next frame.
pub struct Session {
    id: SessionId,
    name: RwLock<String>,
    keys: KeyPair,
    peer_key: RwLock<Option<PublicKey>>,
    reader: Mutex<Option<PacketStream>>,
    writer: Mutex<Option<PacketSink>>,
    closed: AtomicBool,
    shutdown: Notify,
    logger: Logger,
}

impl Session {
    pub fn new<T>(id: SessionId, connection: T, logger: &Logger) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = split_connection(connection);
        Self {
            id,
            name: RwLock::new(default_name(id)),
            keys: KeyPair::generate(),
            peer_key: RwLock::new(None),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            logger: logger.new(o!("session" => id)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn name(&self) -> String {
        self.name.read().await.clone()
    }

    /// Only the registry renames sessions, so that it can keep names unique.
    pub(crate) async fn set_name(&self, name: String) -> String {
        std::mem::replace(&mut *self.name.write().await, name)
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// The client's key, once it has answered the server handshake.
    pub async fn peer_key(&self) -> Option<PublicKey> {
        *self.peer_key.read().await
    }

    pub async fn set_peer_key(&self, key: PublicKey) {
        *self.peer_key.write().await = Some(key);
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.keys.decrypt(data)
    }

    pub fn decrypt_string(&self, data: &[u8]) -> Result<String> {
        self.keys.decrypt_string(data)
    }

    /// Write one frame and flush it. Concurrent sends never interleave.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => Ok(sink.send(packet).await?),
            None => Err(format!("session {} is closed", self.id))?,
        }
    }

    /// Wait for the next packet. `None` means the session is over, whether
    /// the peer left, the stream was corrupt, or `close` was called.
    pub async fn receive(&self) -> Option<Packet> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }

        let mut reader = self.reader.lock().await;
        let stream = reader.as_mut()?;
        let next = select! {
            next = stream.next() => next,
            _ = self.shutdown.notified() => None,
        };

        match next {
            Some(Ok(packet)) => Some(packet),
            Some(Err(error)) => {
                debug!(self.logger, "unreadable frame"; "error" => %error);
                None
            }
            None => None,
        }
    }

    /// Shut the connection down. Calling it again does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();

        if let Some(mut sink) = self.writer.lock().await.take() {
            if let Err(error) = sink.close().await {
                debug!(self.logger, "error closing connection"; "error" => %error);
            }
        }
        self.reader.lock().await.take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::keyring::{encrypt_string, encrypt_with};
    use std::sync::Arc;
    use tokio::io::DuplexStream;

    pub use crate::logging::discard;

    /// A session wired to an in-memory pipe, plus the client's end of it.
    pub fn pipe(id: SessionId) -> (Arc<Session>, PacketStream, PacketSink) {
        let (server, client): (DuplexStream, DuplexStream) = tokio::io::duplex(64 * 1024);
        let session = Arc::new(Session::new(id, server, &discard()));
        let (stream, sink) = split_connection(client);
        (session, stream, sink)
    }

    #[tokio::test]
    async fn new_session_has_default_name_and_no_peer_key() {
        let (session, _, _) = pipe(4);
        assert_eq!(session.name().await, "Client 4");
        assert!(session.peer_key().await.is_none());
    }

    #[tokio::test]
    async fn packets_flow_both_ways() {
        let (session, mut from_server, mut to_server) = pipe(0);

        session.send(Packet::chat("down")).await.unwrap();
        assert_eq!(from_server.next().await.unwrap().unwrap(), Packet::chat("down"));

        to_server.send(Packet::chat("up")).await.unwrap();
        assert_eq!(session.receive().await, Some(Packet::chat("up")));
    }

    #[tokio::test]
    async fn concurrent_sends_arrive_whole() {
        let (session, mut from_server, _) = pipe(0);

        let sends = (0..20).map(|n| {
            let session = session.clone();
            tokio::spawn(async move { session.send(Packet::chat(&n.to_string())).await })
        });
        for result in futures::future::join_all(sends).await {
            result.unwrap().unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..20 {
            match from_server.next().await.unwrap().unwrap() {
                Packet::ChatMessage { message, .. } => seen.push(message.parse::<u32>().unwrap()),
                other => panic!("unexpected {:?}", other),
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn peer_disconnect_ends_receive() {
        let (session, from_server, to_server) = pipe(0);
        drop(from_server);
        drop(to_server);
        assert_eq!(session.receive().await, None);
    }

    #[tokio::test]
    async fn corrupt_frame_ends_receive() {
        use tokio::io::AsyncWriteExt;

        let (server, mut client) = tokio::io::duplex(1024);
        let session = Session::new(0, server, &discard());
        client.write_all(&[0, 0, 0, 3, 0xc1, 0xc1, 0xc1]).await.unwrap();
        assert_eq!(session.receive().await, None);
    }

    #[tokio::test]
    async fn close_interrupts_a_waiting_receive() {
        let (session, _from_server, _to_server) = pipe(0);

        let waiting = {
            let session = session.clone();
            tokio::spawn(async move { session.receive().await })
        };
        tokio::task::yield_now().await;
        session.close().await;

        assert_eq!(waiting.await.unwrap(), None);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_sends() {
        let (session, mut from_server, _) = pipe(0);
        session.close().await;
        session.close().await;

        assert!(session.send(Packet::chat("late")).await.is_err());
        assert_eq!(session.receive().await, None);
        assert!(from_server.next().await.is_none());
    }

    #[tokio::test]
    async fn decrypts_what_was_sealed_with_its_key() {
        let (session, _, _) = pipe(0);
        let sealed = encrypt_string("routing", session.public_key());
        assert_eq!(session.decrypt_string(&sealed).unwrap(), "routing");

        let other = KeyPair::generate();
        let sealed = encrypt_with(b"elsewhere", other.public_key());
        assert!(session.decrypt(&sealed).is_err());
        assert_eq!(other.decrypt(&sealed).unwrap(), b"elsewhere");
    }
}
