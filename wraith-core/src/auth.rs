//! The authentication sub-protocol carried inside the frame codec, and
//! the credential store contract it is checked against.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

pub const AUTH_OK: u8 = 0x00;
pub const AUTH_FAILED: u8 = 0xFF;

/// `u16_be userLen ‖ username ‖ u16_be passLen ‖ password`, the
/// plaintext carried in the Gateway-to-Relay auth frame.
pub fn encode_auth_request(username: &str, password: &str, out: &mut BytesMut) {
    out.put_u16(username.len() as u16);
    out.put_slice(username.as_bytes());
    out.put_u16(password.len() as u16);
    out.put_slice(password.as_bytes());
}

pub fn decode_auth_request(mut buf: &[u8]) -> Result<(String, String)> {
    if buf.len() < 2 {
        return Err(Error::ShortMessage);
    }
    let user_len = buf.get_u16() as usize;
    if buf.len() < user_len + 2 {
        return Err(Error::ShortMessage);
    }
    let username = String::from_utf8_lossy(&buf[..user_len]).into_owned();
    buf.advance(user_len);
    let pass_len = buf.get_u16() as usize;
    if buf.len() < pass_len {
        return Err(Error::ShortMessage);
    }
    let password = String::from_utf8_lossy(&buf[..pass_len]).into_owned();
    Ok((username, password))
}

/// One plaintext status byte: `0x00` on success, anything else on
/// failure (`0xFF` is what this workspace emits, but the Gateway only
/// checks for exact equality with `AUTH_OK`).
pub fn encode_auth_reply(ok: bool, out: &mut BytesMut) {
    out.put_u8(if ok { AUTH_OK } else { AUTH_FAILED });
}

pub fn decode_auth_reply(buf: &[u8]) -> Result<bool> {
    let status = *buf.first().ok_or(Error::ShortMessage)?;
    Ok(status == AUTH_OK)
}

/// Result of checking a username/password pair against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Matches,
    NotFound,
    Mismatch,
}

/// External collaborator: a keyed lookup over `username -> password`.
/// Column naming follows `user_name` (not `UserName`) throughout.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn username_exists(&self, user_name: &str) -> bool;
    async fn add_user(&self, user_name: &str, password: &str) -> Result<()>;
    async fn check_password(&self, user_name: &str, password: &str) -> CheckOutcome;
}

/// In-memory `CredentialStore`, sufficient for local runs and the test
/// suite. A production deployment backed by a relational
/// `(id, user_name, password)` table implements the same trait; nothing
/// in the Relay session driver changes.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: RwLock<HashMap<String, String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        let mut users = HashMap::new();
        users.insert(user_name.into(), password.into());
        Self {
            users: RwLock::new(users),
        }
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn username_exists(&self, user_name: &str) -> bool {
        self.users.read().await.contains_key(user_name)
    }

    async fn add_user(&self, user_name: &str, password: &str) -> Result<()> {
        let mut users = self.users.write().await;
        if users.contains_key(user_name) {
            return Err(Error::DuplicateUser(user_name.to_owned()));
        }
        users.insert(user_name.to_owned(), password.to_owned());
        Ok(())
    }

    async fn check_password(&self, user_name: &str, password: &str) -> CheckOutcome {
        match self.users.read().await.get(user_name) {
            None => CheckOutcome::NotFound,
            Some(stored) if stored == password => CheckOutcome::Matches,
            Some(_) => CheckOutcome::Mismatch,
        }
    }
}
