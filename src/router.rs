use crate::keyring::encrypt_with;
use crate::session::Session;
use crate::{fingerprint, Packet, Registry, Result};
use futures_util::future::join_all;
use slog::{debug, warn, Logger};
use sodiumoxide::crypto::box_::PublicKey;
use std::sync::Arc;

/// Decides, for each packet a client sends, what changes in the registry
/// and who hears about it.
pub struct Router {
    registry: Arc<Registry>,
    logger: Logger,
}

impl Router {
    pub fn new(registry: Arc<Registry>, logger: &Logger) -> Self {
        Self {
            registry,
            logger: logger.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle one packet from `origin`. An error means this packet was
    /// dropped; the session itself is unaffected.
    pub async fn dispatch(&self, origin: &Arc<Session>, packet: Packet) -> Result<()> {
        debug!(origin.logger(), "dispatching"; "kind" => packet.kind());
        match packet {
            Packet::ChatMessage { message, .. } => self.chat(origin, message).await,
            Packet::EncryptedChatMessage { message, .. } => {
                self.encrypted_chat(origin, &message).await
            }
            Packet::DirectMessage { message, recipient } => {
                self.direct(origin, message, &recipient).await
            }
            Packet::EncryptedDirectMessage { message, recipient } => {
                self.encrypted_direct(origin, message, &recipient).await
            }
            Packet::UpdateNickname { name, .. } => self.rename(origin, &name).await,
            Packet::ServerKey { key } => {
                debug!(origin.logger(), "client key received"; "key" => fingerprint(&key));
                origin.set_peer_key(key).await;
                Ok(())
            }
            Packet::PublicKey { key, name } => self.relay_key(origin, key, &name).await,
            Packet::ClientJoin { .. } | Packet::ClientLeave { .. } => {
                debug!(origin.logger(), "ignoring server-only packet");
                Ok(())
            }
        }
    }

    async fn chat(&self, origin: &Session, message: String) -> Result<()> {
        let sender = origin.name().await;
        self.registry
            .broadcast(&Packet::ChatMessage {
                message,
                sender: Some(sender),
            })
            .await;
        Ok(())
    }

    /// The server opens the message once, then seals it again for each
    /// recipient. Recipients that haven't sent their key yet are skipped.
    async fn encrypted_chat(&self, origin: &Session, sealed: &[u8]) -> Result<()> {
        let message = origin.decrypt(sealed)?;
        let sender = origin.name().await;

        let sessions = self.registry.sessions().await;
        let sends = sessions.iter().map(|session| {
            let (message, sender) = (&message, &sender);
            async move {
                let key = match session.peer_key().await {
                    Some(key) => key,
                    None => {
                        debug!(session.logger(), "no client key, skipping encrypted chat");
                        return;
                    }
                };
                let packet = Packet::EncryptedChatMessage {
                    message: encrypt_with(message, &key),
                    sender: Some(encrypt_with(sender.as_bytes(), &key)),
                };
                if let Err(error) = session.send(packet).await {
                    debug!(session.logger(), "encrypted chat not delivered"; "error" => %error);
                }
            }
        });
        join_all(sends).await;
        Ok(())
    }

    async fn direct(&self, origin: &Session, message: String, recipient: &str) -> Result<()> {
        let target = match self.find_recipient(origin, recipient).await {
            Some(target) => target,
            None => return Ok(()),
        };
        target
            .send(Packet::DirectMessage {
                message,
                recipient: origin.name().await,
            })
            .await
    }

    /// Only the recipient's name is opened here. The message body was sealed
    /// for the recipient and is passed on untouched.
    async fn encrypted_direct(
        &self,
        origin: &Session,
        message: Vec<u8>,
        sealed_recipient: &[u8],
    ) -> Result<()> {
        let recipient = origin.decrypt_string(sealed_recipient)?;
        let target = match self.find_recipient(origin, &recipient).await {
            Some(target) => target,
            None => return Ok(()),
        };
        let key = match target.peer_key().await {
            Some(key) => key,
            None => Err(format!("{} has not sent its key yet", recipient))?,
        };

        let sender = origin.name().await;
        target
            .send(Packet::EncryptedDirectMessage {
                message,
                recipient: encrypt_with(sender.as_bytes(), &key),
            })
            .await
    }

    async fn rename(&self, origin: &Session, requested: &str) -> Result<()> {
        let (old_name, name) = match self.registry.rename(origin.id(), requested).await {
            Some(names) => names,
            None => Err(format!("session {} is not registered", origin.id()))?,
        };
        self.registry
            .broadcast(&Packet::UpdateNickname {
                name,
                old_name: Some(old_name),
            })
            .await;
        Ok(())
    }

    /// Pass one client's key on to another, labelled with the sender's name.
    async fn relay_key(&self, origin: &Session, key: PublicKey, recipient: &str) -> Result<()> {
        let target = match self.find_recipient(origin, recipient).await {
            Some(target) => target,
            None => return Ok(()),
        };
        target
            .send(Packet::PublicKey {
                key,
                name: origin.name().await,
            })
            .await
    }

    async fn find_recipient(&self, origin: &Session, recipient: &str) -> Option<Arc<Session>> {
        let target = self.registry.find_by_name(recipient).await;
        if target.is_none() {
            // No way to tell the sender yet; the packet is simply dropped.
            warn!(self.logger, "no such recipient";
                "session" => origin.id(), "recipient" => recipient);
        }
        target
    }
}
