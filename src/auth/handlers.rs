use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use crate::auth::session;
use crate::error::{AppError, AppResult};
use crate::routes::users::load_profile;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

// -- Cookie helpers --

fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name {
                Some(val)
            } else {
                None
            }
        })
}

// -- Handlers --

/// POST /user/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Response> {
    let username = req.username.as_deref().map(str::trim).unwrap_or("");
    let email = req.email.as_deref().map(str::trim).unwrap_or("");
    let password = req.password.as_deref().unwrap_or("");

    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(
            "Something is missing, please check!".into(),
        ));
    }

    let conn = state.db.get()?;
    let taken: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE email = ?1 OR username = ?2",
        params![email, username],
        |row| row.get(0),
    )?;
    if taken {
        return Err(AppError::Conflict("User already exists".into()));
    }

    let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
    let user_id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO users (id, username, email, password_hash) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, username, email, password_hash],
    )?;

    tracing::info!("Registered user {} ({})", username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Account created successfully.",
        })),
    )
        .into_response())
}

/// POST /user/login
///
/// Unknown email and wrong password are deliberately indistinguishable.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    let email = req.email.as_deref().map(str::trim).unwrap_or("");
    let password = req.password.as_deref().unwrap_or("");

    if email.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(
            "Something is missing, please check!".into(),
        ));
    }

    let credentials = {
        let conn = state.db.get()?;
        conn.query_row(
            "SELECT id, username, password_hash FROM users WHERE email = ?1",
            params![email],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?
    };

    let Some((user_id, username, password_hash)) = credentials else {
        return Err(AppError::Unauthorized("Incorrect email or password".into()));
    };

    if !bcrypt::verify(password, &password_hash).unwrap_or(false) {
        return Err(AppError::Unauthorized("Incorrect email or password".into()));
    }

    let token = session::create_session(&state.db, &user_id, state.config.auth.session_hours)?;

    let user = {
        let conn = state.db.get()?;
        load_profile(&conn, &user_id)?
            .ok_or_else(|| AppError::Internal(format!("profile missing for user {}", user_id)))?
    };

    tracing::info!("User {} logged in", username);

    Ok((
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            session_cookie(
                &state.config.auth.cookie_name,
                &token,
                state.config.auth.session_hours,
            ),
        )],
        Json(json!({
            "success": true,
            "message": format!("Welcome back {}", username),
            "user": user,
        })),
    )
        .into_response())
}

/// GET /user/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    if let Some(token) = cookie_value(&headers, &state.config.auth.cookie_name) {
        session::delete_session(&state.db, token)?;
    }

    Ok((
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            clear_session_cookie(&state.config.auth.cookie_name),
        )],
        Json(json!({
            "success": true,
            "message": "Logged out successfully.",
        })),
    )
        .into_response())
}
