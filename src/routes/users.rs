use axum::extract::{Multipart, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

use crate::auth::handlers as auth_handlers;
use crate::db::models::{UserProfile, UserSummary};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::routes::posts::query_post_views;
use crate::state::AppState;

/// Entry in the suggested-users list. Like the profile view, the password
/// hash is never part of it.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestedUser {
    pub id: String,
    pub username: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/register", post(auth_handlers::register))
        .route("/user/login", post(auth_handlers::login))
        .route("/user/logout", get(auth_handlers::logout))
        .route("/user/{id}/profile", get(get_profile))
        .route("/user/profile/edit", post(edit_profile))
        .route("/user/suggested", get(suggested_users))
        .route("/user/followorunfollow/{id}", post(follow_or_unfollow))
}

// --- Handlers ---

/// GET /user/{id}/profile
async fn get_profile(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(user_id): Path<String>,
) -> AppResult<Response> {
    let profile = {
        let conn = state.db.get()?;
        load_profile(&conn, &user_id)?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?
    };

    Ok(Json(json!({ "success": true, "user": profile })).into_response())
}

/// POST /user/profile/edit — multipart partial update: only fields present
/// in the request change. An uploaded image replaces the stored avatar URL.
async fn edit_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut bio: Option<String> = None;
    let mut gender: Option<String> = None;
    let mut image: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("bio") => {
                bio = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("Invalid bio: {}", e)))?,
                );
            }
            Some("gender") => {
                gender = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("Invalid gender: {}", e)))?,
                );
            }
            Some("image") => {
                image = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("Invalid image: {}", e)))?,
                );
            }
            _ => {}
        }
    }

    let avatar_url = match image {
        Some(data) => Some(state.images.save(&data)?),
        None => None,
    };

    let profile = {
        let conn = state.db.get()?;
        if let Some(ref bio) = bio {
            conn.execute(
                "UPDATE users SET bio = ?1 WHERE id = ?2",
                params![bio, user.id],
            )?;
        }
        if let Some(ref gender) = gender {
            conn.execute(
                "UPDATE users SET gender = ?1 WHERE id = ?2",
                params![gender, user.id],
            )?;
        }
        if let Some(ref url) = avatar_url {
            conn.execute(
                "UPDATE users SET avatar_url = ?1 WHERE id = ?2",
                params![url, user.id],
            )?;
        }
        load_profile(&conn, &user.id)?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?
    };

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated.",
        "user": profile,
    }))
    .into_response())
}

/// GET /user/suggested — everyone except the caller.
async fn suggested_users(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let users = {
        let conn = state.db.get()?;
        query_suggested_users(&conn, &user.id)?
    };

    Ok(Json(json!({ "success": true, "users": users })).into_response())
}

/// POST /user/followorunfollow/{id} — a single follows row carries both
/// directions of the edge, so the toggle is atomic by construction.
async fn follow_or_unfollow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(target_id): Path<String>,
) -> AppResult<Response> {
    if user.id == target_id {
        return Err(AppError::BadRequest(
            "You cannot follow/unfollow yourself.".into(),
        ));
    }

    let conn = state.db.get()?;
    let target_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
        params![target_id],
        |row| row.get(0),
    )?;
    if !target_exists {
        return Err(AppError::NotFound("User not found".into()));
    }

    let message = if toggle_follow(&conn, &user.id, &target_id)? {
        "Followed successfully"
    } else {
        "Unfollowed successfully"
    };

    Ok(Json(json!({ "success": true, "message": message })).into_response())
}

// --- Query helpers ---

/// Full profile view: social edges, bookmarks, and posts resolved. Returns
/// `None` for an unknown user id.
pub fn load_profile(conn: &Connection, user_id: &str) -> AppResult<Option<UserProfile>> {
    let row = conn
        .query_row(
            "SELECT id, username, email, bio, gender, avatar_url FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, username, email, bio, gender, avatar_url)) = row else {
        return Ok(None);
    };

    let followers = query_followers(conn, &id)?;
    let following = query_following(conn, &id)?;

    let bookmarks = {
        let mut stmt =
            conn.prepare("SELECT post_id FROM bookmarks WHERE user_id = ?1 ORDER BY created_at")?;
        let ids: Vec<String> = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        ids
    };

    let posts = query_post_views(conn, Some(&id))?;

    Ok(Some(UserProfile {
        id,
        username,
        email,
        bio,
        gender,
        avatar_url,
        followers,
        following,
        bookmarks,
        posts,
    }))
}

pub fn query_followers(conn: &Connection, user_id: &str) -> AppResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY created_at")?;
    let ids = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    Ok(ids)
}

pub fn query_following(conn: &Connection, user_id: &str) -> AppResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT followee_id FROM follows WHERE follower_id = ?1 ORDER BY created_at")?;
    let ids = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    Ok(ids)
}

pub fn query_suggested_users(conn: &Connection, caller_id: &str) -> AppResult<Vec<SuggestedUser>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, bio, avatar_url FROM users WHERE id <> ?1 ORDER BY created_at DESC",
    )?;
    let users = stmt
        .query_map(params![caller_id], |row| {
            Ok(SuggestedUser {
                id: row.get(0)?,
                username: row.get(1)?,
                bio: row.get(2)?,
                avatar_url: row.get(3)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(users)
}

/// Flip the follow edge. Returns true when the result is "now following".
pub fn toggle_follow(conn: &Connection, actor_id: &str, target_id: &str) -> AppResult<bool> {
    let following: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
        params![actor_id, target_id],
        |row| row.get(0),
    )?;

    if following {
        conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![actor_id, target_id],
        )?;
        Ok(false)
    } else {
        conn.execute(
            "INSERT INTO follows (follower_id, followee_id) VALUES (?1, ?2)",
            params![actor_id, target_id],
        )?;
        Ok(true)
    }
}

/// Convenience view used by tests and handlers that only need identity.
pub fn user_summary(conn: &Connection, user_id: &str) -> AppResult<Option<UserSummary>> {
    let summary = conn
        .query_row(
            "SELECT id, username, avatar_url FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(UserSummary {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    avatar_url: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(summary)
}
