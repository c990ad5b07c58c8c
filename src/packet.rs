use sodiumoxide::crypto::box_::PublicKey;

/// Everything that travels between a client and the server.
///
/// The variant is the tag on the wire. Several fields change meaning with
/// direction: a `DirectMessage` carries the recipient's name on the way in
/// and the sender's name on the way out, and the `name` of a `PublicKey`
/// packet names the addressee going to the server and the owner coming back.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Packet {
    /// Public chat. `sender` is left empty by clients and filled in by the server.
    ChatMessage {
        message: String,
        sender: Option<String>,
    },
    /// Public chat sealed for the server on the way in, and resealed per
    /// recipient on the way out.
    EncryptedChatMessage {
        message: Vec<u8>,
        sender: Option<Vec<u8>>,
    },
    DirectMessage {
        message: String,
        recipient: String,
    },
    /// `message` is sealed for the recipient and never opened by the server.
    /// `recipient` is sealed for the server going in and holds the sender's
    /// name, sealed for the recipient, coming out.
    EncryptedDirectMessage {
        message: Vec<u8>,
        recipient: Vec<u8>,
    },
    UpdateNickname {
        name: String,
        old_name: Option<String>,
    },
    ClientJoin {
        name: String,
    },
    ClientLeave {
        name: String,
    },
    /// Key exchange between a client and its server session.
    ServerKey {
        key: PublicKey,
    },
    /// Key exchange between two clients, relayed by the server.
    PublicKey {
        key: PublicKey,
        name: String,
    },
}

impl Packet {
    pub fn chat(message: &str) -> Self {
        Self::ChatMessage {
            message: message.into(),
            sender: None,
        }
    }

    pub fn direct(message: &str, recipient: &str) -> Self {
        Self::DirectMessage {
            message: message.into(),
            recipient: recipient.into(),
        }
    }

    pub fn nickname(name: &str) -> Self {
        Self::UpdateNickname {
            name: name.into(),
            old_name: None,
        }
    }

    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => "chat",
            Self::EncryptedChatMessage { .. } => "encrypted-chat",
            Self::DirectMessage { .. } => "direct",
            Self::EncryptedDirectMessage { .. } => "encrypted-direct",
            Self::UpdateNickname { .. } => "nickname",
            Self::ClientJoin { .. } => "join",
            Self::ClientLeave { .. } => "leave",
            Self::ServerKey { .. } => "server-key",
            Self::PublicKey { .. } => "public-key",
        }
    }
}
