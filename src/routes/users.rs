//! User lookup routes, for starting conversations.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use crate::routes::auth::AuthUser;
use crate::services::user::{self, UserRow};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

/// `GET /api/users?search=` — search users by name or email, excluding self.
pub async fn search(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserRow>>, StatusCode> {
    let needle = query.search.unwrap_or_default();
    let rows = user::search_users(&state.pool, auth.user.id, needle.trim())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(rows))
}
