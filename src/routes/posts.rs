use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::{CommentView, PostView, UserSummary};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub text: Option<String>,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/post/addpost", post(add_post))
        .route("/post/all", get(all_posts))
        .route("/post/userpost/all", get(user_posts))
        .route("/post/{id}/like", get(like_post))
        .route("/post/{id}/dislike", get(dislike_post))
        .route("/post/{id}/comment", post(add_comment))
        .route("/post/{id}/comment/all", get(post_comments))
        .route("/post/{id}/bookmark", post(bookmark_post))
        .route("/post/delete/{id}", post(delete_post))
}

// --- Handlers ---

/// POST /post/addpost — multipart with an optional `caption` text field and a
/// required `image` file field.
async fn add_post(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut caption = String::new();
    let mut image: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("caption") => {
                caption = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid caption: {}", e)))?
                    .trim()
                    .to_string();
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

    let image = image.ok_or_else(|| AppError::BadRequest("Image required".into()))?;
    let image_url = state.images.save(&image)?;

    let post_id = uuid::Uuid::now_v7().to_string();
    let view = {
        let conn = state.db.get()?;
        conn.execute(
            "INSERT INTO posts (id, author_id, caption, image_url) VALUES (?1, ?2, ?3, ?4)",
            params![post_id, user.id, caption, image_url],
        )?;
        fetch_post_view(&conn, &post_id)?
            .ok_or_else(|| AppError::Internal(format!("post {} vanished after insert", post_id)))?
    };

    tracing::info!("User {} added post {}", user.id, post_id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "New post added",
            "post": view,
        })),
    )
        .into_response())
}

/// GET /post/all — every post, newest first, authors and comments resolved.
async fn all_posts(State(state): State<AppState>, _user: CurrentUser) -> AppResult<Response> {
    let posts = {
        let conn = state.db.get()?;
        query_post_views(&conn, None)?
    };

    Ok(Json(json!({ "success": true, "posts": posts })).into_response())
}

/// GET /post/userpost/all — the caller's own posts, newest first.
async fn user_posts(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let posts = {
        let conn = state.db.get()?;
        query_post_views(&conn, Some(&user.id))?
    };

    Ok(Json(json!({ "success": true, "posts": posts })).into_response())
}

/// GET /post/{id}/like — idempotent set-add of the caller to the like set.
async fn like_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    require_post(&conn, &post_id)?;

    conn.execute(
        "INSERT OR IGNORE INTO post_likes (post_id, user_id) VALUES (?1, ?2)",
        params![post_id, user.id],
    )?;

    Ok(Json(json!({ "success": true, "message": "Post liked" })).into_response())
}

/// GET /post/{id}/dislike — idempotent set-remove; succeeds even when the
/// caller never liked the post.
async fn dislike_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    require_post(&conn, &post_id)?;

    conn.execute(
        "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
        params![post_id, user.id],
    )?;

    Ok(Json(json!({ "success": true, "message": "Post disliked" })).into_response())
}

/// POST /post/{id}/comment
async fn add_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> AppResult<Response> {
    let text = req.text.as_deref().map(str::trim).unwrap_or("");
    if text.is_empty() {
        return Err(AppError::BadRequest("Comment text is required".into()));
    }

    let comment = {
        let conn = state.db.get()?;
        require_post(&conn, &post_id)?;

        let comment_id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO comments (id, post_id, author_id, body) VALUES (?1, ?2, ?3, ?4)",
            params![comment_id, post_id, user.id, text],
        )?;
        fetch_comment_view(&conn, &comment_id)?.ok_or_else(|| {
            AppError::Internal(format!("comment {} vanished after insert", comment_id))
        })?
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Comment added",
            "comment": comment,
        })),
    )
        .into_response())
}

/// GET /post/{id}/comment/all — an empty list is a valid result.
async fn post_comments(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let comments = {
        let conn = state.db.get()?;
        require_post(&conn, &post_id)?;
        query_comment_views(&conn, &post_id, CommentOrder::OldestFirst)?
    };

    Ok(Json(json!({ "success": true, "comments": comments })).into_response())
}

/// POST /post/{id}/bookmark — strict toggle, reports which way it flipped.
async fn bookmark_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    require_post(&conn, &post_id)?;

    let bookmarked: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM bookmarks WHERE user_id = ?1 AND post_id = ?2",
        params![user.id, post_id],
        |row| row.get(0),
    )?;

    if bookmarked {
        conn.execute(
            "DELETE FROM bookmarks WHERE user_id = ?1 AND post_id = ?2",
            params![user.id, post_id],
        )?;
        Ok(Json(json!({
            "success": true,
            "type": "unsaved",
            "message": "Post removed from bookmarks",
        }))
        .into_response())
    } else {
        conn.execute(
            "INSERT INTO bookmarks (user_id, post_id) VALUES (?1, ?2)",
            params![user.id, post_id],
        )?;
        Ok(Json(json!({
            "success": true,
            "type": "saved",
            "message": "Post bookmarked",
        }))
        .into_response())
    }
}

/// POST /post/delete/{id} — author only. The post, its like and bookmark
/// rows, and all of its comments go in one transaction.
async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let mut conn = state.db.get()?;

    let author_id: String = conn
        .query_row(
            "SELECT author_id FROM posts WHERE id = ?1",
            params![post_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("Post not found".into()))?;

    if author_id != user.id {
        return Err(AppError::Forbidden("Unauthorized".into()));
    }

    let tx = conn.transaction()?;
    delete_post_cascade(&tx, &post_id)?;
    tx.commit().map_err(|e| {
        tracing::error!("Post delete failed for post {}: {}", post_id, e);
        AppError::from(e)
    })?;

    tracing::info!("User {} deleted post {}", user.id, post_id);

    Ok(Json(json!({ "success": true, "message": "Post deleted" })).into_response())
}

// --- Query helpers ---

fn require_post(conn: &Connection, post_id: &str) -> AppResult<()> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM posts WHERE id = ?1",
        params![post_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(AppError::NotFound("Post not found".into()))
    }
}

#[derive(Clone, Copy)]
pub enum CommentOrder {
    NewestFirst,
    OldestFirst,
}

/// Posts newest-first, optionally restricted to one author, with author
/// identity, like set, and comments resolved. Secret fields never leave the
/// users table.
pub fn query_post_views(conn: &Connection, author_id: Option<&str>) -> AppResult<Vec<PostView>> {
    let sql = "SELECT p.id, p.caption, p.image_url, p.created_at, \
                      u.id, u.username, u.avatar_url \
               FROM posts p JOIN users u ON u.id = p.author_id \
               WHERE ?1 IS NULL OR p.author_id = ?1 \
               ORDER BY p.created_at DESC, p.id DESC";
    let mut stmt = conn.prepare(sql)?;
    let rows: Vec<(String, String, String, String, String, String, Option<String>)> = stmt
        .query_map(params![author_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?
        .collect::<Result<_, _>>()?;

    let mut posts = Vec::with_capacity(rows.len());
    for (id, caption, image_url, created_at, uid, username, avatar_url) in rows {
        let likes = query_like_set(conn, &id)?;
        let comments = query_comment_views(conn, &id, CommentOrder::NewestFirst)?;
        posts.push(PostView {
            id,
            caption,
            image_url,
            created_at,
            author: UserSummary {
                id: uid,
                username,
                avatar_url,
            },
            likes,
            comments,
        });
    }
    Ok(posts)
}

pub fn fetch_post_view(conn: &Connection, post_id: &str) -> AppResult<Option<PostView>> {
    let row = conn
        .query_row(
            "SELECT p.id, p.caption, p.image_url, p.created_at, \
                    u.id, u.username, u.avatar_url \
             FROM posts p JOIN users u ON u.id = p.author_id \
             WHERE p.id = ?1",
            params![post_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, caption, image_url, created_at, uid, username, avatar_url)) = row else {
        return Ok(None);
    };

    let likes = query_like_set(conn, &id)?;
    let comments = query_comment_views(conn, &id, CommentOrder::NewestFirst)?;
    Ok(Some(PostView {
        id,
        caption,
        image_url,
        created_at,
        author: UserSummary {
            id: uid,
            username,
            avatar_url,
        },
        likes,
        comments,
    }))
}

pub fn query_like_set(conn: &Connection, post_id: &str) -> AppResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM post_likes WHERE post_id = ?1 ORDER BY created_at")?;
    let likes = stmt
        .query_map(params![post_id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    Ok(likes)
}

pub fn fetch_comment_view(conn: &Connection, comment_id: &str) -> AppResult<Option<CommentView>> {
    let view = conn
        .query_row(
            "SELECT c.id, c.post_id, c.body, c.created_at, u.id, u.username, u.avatar_url \
             FROM comments c JOIN users u ON u.id = c.author_id \
             WHERE c.id = ?1",
            params![comment_id],
            |row| {
                Ok(CommentView {
                    id: row.get(0)?,
                    post_id: row.get(1)?,
                    text: row.get(2)?,
                    created_at: row.get(3)?,
                    author: UserSummary {
                        id: row.get(4)?,
                        username: row.get(5)?,
                        avatar_url: row.get(6)?,
                    },
                })
            },
        )
        .optional()?;
    Ok(view)
}

pub fn query_comment_views(
    conn: &Connection,
    post_id: &str,
    order: CommentOrder,
) -> AppResult<Vec<CommentView>> {
    let sql = match order {
        CommentOrder::NewestFirst => {
            "SELECT c.id, c.post_id, c.body, c.created_at, u.id, u.username, u.avatar_url \
             FROM comments c JOIN users u ON u.id = c.author_id \
             WHERE c.post_id = ?1 ORDER BY c.created_at DESC, c.id DESC"
        }
        CommentOrder::OldestFirst => {
            "SELECT c.id, c.post_id, c.body, c.created_at, u.id, u.username, u.avatar_url \
             FROM comments c JOIN users u ON u.id = c.author_id \
             WHERE c.post_id = ?1 ORDER BY c.created_at, c.id"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let comments = stmt
        .query_map(params![post_id], |row| {
            Ok(CommentView {
                id: row.get(0)?,
                post_id: row.get(1)?,
                text: row.get(2)?,
                created_at: row.get(3)?,
                author: UserSummary {
                    id: row.get(4)?,
                    username: row.get(5)?,
                    avatar_url: row.get(6)?,
                },
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(comments)
}

/// Remove a post together with everything that references it.
pub fn delete_post_cascade(conn: &Connection, post_id: &str) -> AppResult<()> {
    conn.execute("DELETE FROM comments WHERE post_id = ?1", params![post_id])?;
    conn.execute(
        "DELETE FROM post_likes WHERE post_id = ?1",
        params![post_id],
    )?;
    conn.execute("DELETE FROM bookmarks WHERE post_id = ?1", params![post_id])?;
    conn.execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;
    Ok(())
}
