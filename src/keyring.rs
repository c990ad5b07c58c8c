use crate::Result;
use sodiumoxide::crypto::box_::{self, PublicKey, SecretKey};
use sodiumoxide::crypto::sealedbox;
use std::collections::{HashMap, HashSet};

/// A party's own keys. Generated once and never changed.
pub struct KeyPair {
    public_key: PublicKey,
    secret_key: SecretKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let (public_key, secret_key) = box_::gen_keypair();
        Self {
            public_key,
            secret_key,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Open data sealed for this key pair.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        match sealedbox::open(data, &self.public_key, &self.secret_key) {
            Ok(decrypted) => Ok(decrypted),
            Err(_) => Err("Error decrypting sealed data")?,
        }
    }

    pub fn decrypt_string(&self, data: &[u8]) -> Result<String> {
        Ok(String::from_utf8(self.decrypt(data)?)?)
    }
}

/// Seal data so that only the holder of `public_key` can open it. Every call
/// uses a fresh ephemeral key, so equal inputs give different ciphertexts.
pub fn encrypt_with(data: &[u8], public_key: &PublicKey) -> Vec<u8> {
    sealedbox::seal(data, public_key)
}

pub fn encrypt_string(text: &str, public_key: &PublicKey) -> Vec<u8> {
    encrypt_with(text.as_bytes(), public_key)
}

/// What a client should do after a peer's key arrives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reply {
    /// The key was new and the peer doesn't have ours yet.
    SendOwnKey,
    Nothing,
}

/// A client's view of other clients' public keys, by display name.
///
/// Also tracks names we have sent our own key to, so that two clients who
/// start a handshake with each other at the same time exchange exactly one
/// key each.
#[derive(Clone, Debug, Default)]
pub struct KeyRing {
    contacts: HashMap<String, PublicKey>,
    pending: HashSet<String>,
}

impl KeyRing {
    pub fn get(&self, name: &str) -> Option<&PublicKey> {
        self.contacts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.contacts.contains_key(name)
    }

    /// Record that we are about to send our key to `name`. Returns false if
    /// there is nothing to send: the key is already known or already asked for.
    pub fn begin_handshake(&mut self, name: &str) -> bool {
        if self.contacts.contains_key(name) {
            return false;
        }
        self.pending.insert(name.into())
    }

    /// Forget an unanswered handshake so that a later attempt sends our key again.
    pub fn cancel_handshake(&mut self, name: &str) {
        self.pending.remove(name);
    }

    pub fn accept_key(&mut self, name: &str, key: PublicKey) -> Reply {
        if self.contacts.contains_key(name) {
            return Reply::Nothing;
        }
        self.contacts.insert(name.into(), key);
        if self.pending.remove(name) {
            Reply::Nothing
        } else {
            Reply::SendOwnKey
        }
    }

    pub fn rename_contact(&mut self, old_name: &str, new_name: &str) {
        if let Some(key) = self.contacts.remove(old_name) {
            self.contacts.insert(new_name.into(), key);
        }
        if self.pending.remove(old_name) {
            self.pending.insert(new_name.into());
        }
    }

    pub fn remove_contact(&mut self, name: &str) {
        self.contacts.remove(name);
        self.pending.remove(name);
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_data_opens_only_for_its_owner() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let sealed = encrypt_string("for alice", alice.public_key());
        assert_eq!(alice.decrypt_string(&sealed).unwrap(), "for alice");
        assert!(bob.decrypt(&sealed).is_err());
    }

    #[test]
    fn sealing_is_not_deterministic() {
        let keys = KeyPair::generate();
        let first = encrypt_with(b"same", keys.public_key());
        let second = encrypt_with(b"same", keys.public_key());
        assert_ne!(first, second);
        assert_eq!(keys.decrypt(&first).unwrap(), keys.decrypt(&second).unwrap());
    }

    #[test]
    fn corrupt_ciphertext_fails() {
        let keys = KeyPair::generate();
        let mut sealed = encrypt_with(b"data", keys.public_key());
        sealed[0] ^= 0xff;
        assert!(keys.decrypt(&sealed).is_err());
        assert!(keys.decrypt(&[]).is_err());
    }

    // Simulates the server relay between two key rings, counting every
    // PublicKey packet put on the wire.
    fn deliver(to: &mut KeyRing, from_name: &str, key: PublicKey) -> Reply {
        to.accept_key(from_name, key)
    }

    #[test]
    fn sequential_handshake_sends_two_keys() {
        let (a_key, b_key) = (KeyPair::generate(), KeyPair::generate());
        let (mut a, mut b) = (KeyRing::default(), KeyRing::default());
        let mut sent = 0;

        assert!(a.begin_handshake("B"));
        sent += 1;
        if deliver(&mut b, "A", *a_key.public_key()) == Reply::SendOwnKey {
            sent += 1;
            assert_eq!(deliver(&mut a, "B", *b_key.public_key()), Reply::Nothing);
        }

        assert_eq!(sent, 2);
        assert_eq!(a.get("B"), Some(b_key.public_key()));
        assert_eq!(b.get("A"), Some(a_key.public_key()));
    }

    #[test]
    fn simultaneous_handshake_sends_two_keys() {
        let (a_key, b_key) = (KeyPair::generate(), KeyPair::generate());
        let (mut a, mut b) = (KeyRing::default(), KeyRing::default());

        assert!(a.begin_handshake("B"));
        assert!(b.begin_handshake("A"));

        assert_eq!(deliver(&mut b, "A", *a_key.public_key()), Reply::Nothing);
        assert_eq!(deliver(&mut a, "B", *b_key.public_key()), Reply::Nothing);
        assert_eq!(a.get("B"), Some(b_key.public_key()));
        assert_eq!(b.get("A"), Some(a_key.public_key()));
    }

    #[test]
    fn repeated_keys_are_ignored() {
        let (first, second) = (KeyPair::generate(), KeyPair::generate());
        let mut ring = KeyRing::default();

        assert_eq!(ring.accept_key("A", *first.public_key()), Reply::SendOwnKey);
        assert_eq!(ring.accept_key("A", *second.public_key()), Reply::Nothing);
        assert_eq!(ring.get("A"), Some(first.public_key()));
        assert!(!ring.begin_handshake("A"));
    }

    #[test]
    fn handshake_is_only_started_once() {
        let mut ring = KeyRing::default();
        assert!(ring.begin_handshake("A"));
        assert!(!ring.begin_handshake("A"));

        ring.cancel_handshake("A");
        assert!(ring.begin_handshake("A"));
    }

    #[test]
    fn contacts_follow_renames_and_leaves() {
        let keys = KeyPair::generate();
        let mut ring = KeyRing::default();
        ring.accept_key("Bob", *keys.public_key());

        ring.rename_contact("Bob", "Robert");
        assert!(!ring.contains("Bob"));
        assert_eq!(ring.get("Robert"), Some(keys.public_key()));

        ring.remove_contact("Robert");
        assert!(!ring.contains("Robert"));
    }
}
