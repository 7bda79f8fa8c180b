use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::db;

pub const DEFAULT_API_BASE: &str = "https://api.line.me/v2/bot";
const SETTINGS_KEY: &str = "messaging.config";
/// One shot, short timeout, no retry. A failed send is reported, never queued.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channel_access_token: String,
    #[serde(default)]
    pub channel_secret: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Config {
    pub fn ready(&self) -> bool {
        self.enabled && !self.channel_access_token.is_empty()
    }

    fn base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }
}

pub fn load_config(conn: &Connection) -> anyhow::Result<Option<Config>> {
    match db::settings_get_json(conn, SETTINGS_KEY)? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

pub fn store_config(conn: &Connection, config: &Config) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(config)?)
}

#[derive(Debug)]
pub struct SendError {
    pub message: String,
    pub status: Option<u16>,
}

fn post(config: &Config, path: &str, body: &serde_json::Value) -> Result<(), SendError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .map_err(|e| SendError {
            message: e.to_string(),
            status: None,
        })?;
    let url = format!("{}{}", config.base(), path);
    let resp = client
        .post(url)
        .bearer_auth(&config.channel_access_token)
        .json(body)
        .send()
        .map_err(|e| SendError {
            message: e.to_string(),
            status: None,
        })?;
    if !resp.status().is_success() {
        return Err(SendError {
            message: format!("messaging API returned {}", resp.status()),
            status: Some(resp.status().as_u16()),
        });
    }
    Ok(())
}

pub fn push_text(config: &Config, to: &str, text: &str) -> Result<(), SendError> {
    post(
        config,
        "/message/push",
        &json!({
            "to": to,
            "messages": [{ "type": "text", "text": text }],
        }),
    )
}

pub fn broadcast_text(config: &Config, text: &str) -> Result<(), SendError> {
    post(
        config,
        "/message/broadcast",
        &json!({
            "messages": [{ "type": "text", "text": text }],
        }),
    )
}

/// HMAC-SHA256 (RFC 2104) over SHA-256's 64-byte block size.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    const BLOCK: usize = 64;
    let mut key_block = [0u8; BLOCK];
    if key.len() > BLOCK {
        let digest = Sha256::digest(key);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    let ipad: Vec<u8> = key_block.iter().map(|b| b ^ 0x36).collect();
    inner.update(&ipad);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    let opad: Vec<u8> = key_block.iter().map(|b| b ^ 0x5c).collect();
    outer.update(&opad);
    outer.update(inner_digest);
    outer.finalize().into()
}

/// The platform signs the raw webhook body with the channel secret and sends
/// the base64 digest in a header.
pub fn webhook_signature(channel_secret: &str, body: &[u8]) -> String {
    BASE64.encode(hmac_sha256(channel_secret.as_bytes(), body))
}

pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    webhook_signature(channel_secret, body) == signature
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    // RFC 4231 test vectors.
    #[test]
    fn hmac_sha256_rfc4231_case_1() {
        let key = [0x0b_u8; 20];
        let mac = hmac_sha256(&key, b"Hi There");
        assert_eq!(
            hex(&mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
    }

    #[test]
    fn hmac_sha256_rfc4231_case_2() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex(&mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_roundtrip_verifies_and_rejects_tampering() {
        let body = br#"{"events":[]}"#;
        let sig = webhook_signature("secret", body);
        assert!(verify_signature("secret", body, &sig));
        assert!(!verify_signature("secret", b"{\"events\":[1]}", &sig));
        assert!(!verify_signature("other", body, &sig));
    }
}
