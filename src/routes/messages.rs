use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::Message;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub message: Option<String>,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/message/send/{id}", post(send_message))
        .route("/message/all/{id}", get(get_messages))
}

// --- Handlers ---

/// POST /message/send/{id} — find-or-create the conversation for the
/// unordered participant pair and append the message, in one transaction.
async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(receiver_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Response> {
    let body = req.message.as_deref().map(str::trim).unwrap_or("");
    if body.is_empty() {
        return Err(AppError::BadRequest("Message text is required".into()));
    }
    if receiver_id == user.id {
        return Err(AppError::BadRequest("You cannot message yourself.".into()));
    }

    let mut conn = state.db.get()?;

    let receiver_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
        params![receiver_id],
        |row| row.get(0),
    )?;
    if !receiver_exists {
        return Err(AppError::NotFound("User not found".into()));
    }

    let tx = conn.transaction()?;
    let new_message = append_message(&tx, &user.id, &receiver_id, body)?;
    tx.commit().map_err(|e| {
        tracing::error!(
            "Send failed for pair {}: {}",
            pair_key(&user.id, &receiver_id),
            e
        );
        AppError::from(e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "newMessage": new_message })),
    )
        .into_response())
}

/// GET /message/all/{id} — absence of a conversation is a valid state: an
/// empty list, never an error.
async fn get_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(peer_id): Path<String>,
) -> AppResult<Response> {
    let messages = {
        let conn = state.db.get()?;
        match find_conversation(&conn, &user.id, &peer_id)? {
            Some(conversation_id) => query_messages(&conn, &conversation_id)?,
            None => Vec::new(),
        }
    };

    Ok(Json(json!({ "success": true, "messages": messages })).into_response())
}

// --- Query helpers ---

/// Canonical key for the unordered participant pair. The unique index on
/// this key is what guarantees at most one conversation per pair.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

pub fn find_conversation(conn: &Connection, a: &str, b: &str) -> AppResult<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM conversations WHERE pair_key = ?1",
            params![pair_key(a, b)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Find-or-create the conversation for the pair, then insert the message
/// into it. Run inside a transaction so a first-contact message and its
/// conversation land together. The `INSERT OR IGNORE` against the unique
/// pair key is the conditional upsert that closes the find-then-create race.
pub fn append_message(
    conn: &Connection,
    sender_id: &str,
    receiver_id: &str,
    body: &str,
) -> AppResult<Message> {
    let key = pair_key(sender_id, receiver_id);
    conn.execute(
        "INSERT OR IGNORE INTO conversations (id, user_a, user_b, pair_key) VALUES (?1, ?2, ?3, ?4)",
        params![
            uuid::Uuid::now_v7().to_string(),
            sender_id,
            receiver_id,
            key
        ],
    )?;
    let conversation_id: String = conn.query_row(
        "SELECT id FROM conversations WHERE pair_key = ?1",
        params![key],
        |row| row.get(0),
    )?;

    let message_id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, body) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![message_id, conversation_id, sender_id, receiver_id, body],
    )?;

    let message = conn.query_row(
        "SELECT id, conversation_id, sender_id, receiver_id, body, created_at \
         FROM messages WHERE id = ?1",
        params![message_id],
        |row| {
            Ok(Message {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                receiver_id: row.get(3)?,
                body: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )?;
    Ok(message)
}

/// Messages of a conversation in creation order. Uuid v7 ids are
/// time-ordered, which breaks ties within the same timestamp second.
pub fn query_messages(conn: &Connection, conversation_id: &str) -> AppResult<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, receiver_id, body, created_at \
         FROM messages WHERE conversation_id = ?1 ORDER BY created_at, id",
    )?;
    let messages = stmt
        .query_map(params![conversation_id], |row| {
            Ok(Message {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                receiver_id: row.get(3)?,
                body: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(messages)
}
