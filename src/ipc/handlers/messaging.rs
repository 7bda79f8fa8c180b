use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_bool, get_required_str, get_str, now_string, with_db};
use crate::ipc::types::{AppState, Request};
use crate::messaging::{self, Config, SendError};

fn config_json(config: &Config) -> Value {
    json!({
        "enabled": config.enabled,
        "channel_access_token": config.channel_access_token,
        "channel_secret": config.channel_secret,
        "api_base": config.api_base.clone().unwrap_or_else(|| messaging::DEFAULT_API_BASE.to_string()),
    })
}

fn config_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let config = messaging::load_config(conn)?.unwrap_or_default();
    Ok(json!({ "config": config_json(&config) }))
}

fn config_set(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let config = Config {
        enabled: get_bool(params, "enabled").unwrap_or(true),
        channel_access_token: get_required_str(params, "channel_access_token")?,
        channel_secret: get_required_str(params, "channel_secret")?,
        api_base: get_str(params, "api_base"),
    };
    messaging::store_config(conn, &config)?;
    Ok(json!({ "config": config_json(&config) }))
}

fn ready_config(conn: &Connection) -> Result<Config, HandlerErr> {
    let config = messaging::load_config(conn)?.unwrap_or_default();
    if !config.ready() {
        return Err(HandlerErr::bad_params("訊息服務尚未設定"));
    }
    Ok(config)
}

fn send_failed(e: SendError) -> HandlerErr {
    tracing::warn!(status = ?e.status, error = %e.message, "messaging send failed");
    HandlerErr::upstream(
        "訊息發送失敗",
        Some(json!({ "status": e.status, "detail": e.message })),
    )
}

fn push(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let to = get_required_str(params, "to")?;
    let message = get_required_str(params, "message")?;
    let config = ready_config(conn)?;
    messaging::push_text(&config, &to, &message).map_err(send_failed)?;
    Ok(json!({ "ok": true }))
}

fn test_send(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let to = get_required_str(params, "to")?;
    let message = get_str(params, "message").unwrap_or_else(|| "音樂教室訊息測試".to_string());
    let config = ready_config(conn)?;
    messaging::push_text(&config, &to, &message).map_err(send_failed)?;
    Ok(json!({ "ok": true }))
}

fn broadcast(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let message = get_required_str(params, "message")?;
    let config = ready_config(conn)?;
    messaging::broadcast_text(&config, &message).map_err(send_failed)?;
    Ok(json!({ "ok": true }))
}

fn contacts(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT user_id, display_name, followed_at FROM message_contacts ORDER BY followed_at",
    )?;
    let contacts = stmt
        .query_map([], |r| {
            Ok(json!({
                "user_id": r.get::<_, String>(0)?,
                "display_name": r.get::<_, Option<String>>(1)?,
                "followed_at": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "contacts": contacts }))
}

/// Inbound webhook. `body` is the raw request body as received; the signature
/// check runs over those exact bytes before anything is parsed or written.
fn webhook(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let signature = get_required_str(params, "signature")?;
    let body = get_required_str(params, "body")?;

    let config = messaging::load_config(conn)?.unwrap_or_default();
    if config.channel_secret.is_empty() {
        return Err(HandlerErr::bad_params("訊息服務尚未設定"));
    }
    if !messaging::verify_signature(&config.channel_secret, body.as_bytes(), &signature) {
        return Err(HandlerErr::new("unauthorized", "簽章驗證失敗"));
    }

    let parsed: Value = serde_json::from_str(&body)
        .map_err(|e| HandlerErr::bad_params(format!("invalid webhook body: {}", e)))?;
    let events = parsed
        .get("events")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut received = 0usize;
    for event in &events {
        let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let user_id = event
            .get("source")
            .and_then(|s| s.get("userId"))
            .and_then(|v| v.as_str());
        match (event_type, user_id) {
            ("follow", Some(uid)) => {
                conn.execute(
                    "INSERT INTO message_contacts(user_id, display_name, followed_at)
                     VALUES(?, NULL, ?)
                     ON CONFLICT(user_id) DO UPDATE SET followed_at = excluded.followed_at",
                    rusqlite::params![uid, now_string()],
                )?;
            }
            ("unfollow", Some(uid)) => {
                conn.execute("DELETE FROM message_contacts WHERE user_id = ?", [uid])?;
            }
            _ => {}
        }
        received += 1;
    }
    Ok(json!({ "received": received }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.messaging.configGet" => Some(with_db(state, req, config_get)),
        "admin.messaging.configSet" => Some(with_db(state, req, config_set)),
        "admin.messaging.push" => Some(with_db(state, req, push)),
        "admin.messaging.test" => Some(with_db(state, req, test_send)),
        "admin.messaging.broadcast" => Some(with_db(state, req, broadcast)),
        "admin.messaging.contacts" => Some(with_db(state, req, contacts)),
        "messaging.webhook" => Some(with_db(state, req, webhook)),
        _ => None,
    }
}
