use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, SessionUser};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Resolve the caller's session token to a user. Handlers call this for
/// every method that touches owner-scoped data; the returned user id is
/// what flows into queries and calc contexts.
pub fn require_session(state: &AppState, req: &Request) -> Result<SessionUser, serde_json::Value> {
    let token = req.params.get("sessionToken").and_then(|v| v.as_str());
    let Some(token) = token else {
        return Err(err(&req.id, "auth_required", "log in first", None));
    };
    state
        .sessions
        .get(token)
        .cloned()
        .ok_or_else(|| err(&req.id, "auth_required", "log in first", None))
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if username.is_empty() {
        return err(&req.id, "bad_params", "username must not be empty", None);
    }
    if password.is_empty() {
        return err(&req.id, "bad_params", "password must not be empty", None);
    }

    let user_id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().to_string();
    let password_hash = hash_password(&password, &salt);
    let created_at = Utc::now().to_rfc3339();

    if let Err(e) = conn.execute(
        "INSERT INTO users(id, username, password_hash, salt, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&user_id, &username, &password_hash, &salt, &created_at),
    ) {
        if let rusqlite::Error::SqliteFailure(sqlite_err, _) = &e {
            if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation {
                return err(&req.id, "username_taken", "username already exists", None);
            }
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    tracing::info!(username = %username, "user registered");
    ok(&req.id, json!({ "userId": user_id }))
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT id, password_hash, salt FROM users WHERE username = ?",
            [&username],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Unknown username and wrong password are indistinguishable.
    let Some((user_id, password_hash, salt)) = row else {
        return err(&req.id, "invalid_credentials", "invalid username or password", None);
    };
    if hash_password(&password, &salt) != password_hash {
        return err(&req.id, "invalid_credentials", "invalid username or password", None);
    }

    let token = Uuid::new_v4().to_string();
    state.sessions.insert(
        token.clone(),
        SessionUser {
            user_id: user_id.clone(),
            username: username.clone(),
        },
    );
    tracing::info!(username = %username, "login");
    ok(
        &req.id,
        json!({
            "sessionToken": token,
            "userId": user_id,
            "username": username
        }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Logout is idempotent; an unknown or absent token is still ok.
    if let Some(token) = req.params.get("sessionToken").and_then(|v| v.as_str()) {
        if let Some(user) = state.sessions.remove(token) {
            tracing::info!(username = %user.username, "logout");
        }
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_register(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
