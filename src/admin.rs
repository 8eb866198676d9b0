use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::{AuthenticatedUser, MIN_PASSWORD_LEN};
use crate::database::models::{NewUser, OrderDetail, OrderPage, User, UserChanges};
use crate::error::AppError;
use crate::AppState;

pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct PageRequest {
    pub page_size: i64,
    pub page: i64,
}

impl PageRequest {
    fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(AppError::Validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if self.page < 1 {
            return Err(AppError::Validation("page must be at least 1".to_string()));
        }
        Ok(())
    }
}

async fn orders_page(
    state: &AppState,
    recurring: bool,
    request: PageRequest,
) -> Result<Json<OrderPage>, AppError> {
    request.validate()?;
    let page = state
        .repository
        .orders_page(recurring, request.page_size, request.page)
        .await?;
    Ok(Json(page))
}

/// POST /api/admin/all-sales
#[tracing::instrument(skip(state))]
pub async fn all_sales(
    State(state): State<AppState>,
    Json(request): Json<PageRequest>,
) -> Result<Json<OrderPage>, AppError> {
    orders_page(&state, false, request).await
}

/// POST /api/admin/all-subscriptions
#[tracing::instrument(skip(state))]
pub async fn all_subscriptions(
    State(state): State<AppState>,
    Json(request): Json<PageRequest>,
) -> Result<Json<OrderPage>, AppError> {
    orders_page(&state, true, request).await
}

/// GET /api/admin/get-sale/{id}
pub async fn get_sale(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<OrderDetail>, AppError> {
    state
        .repository
        .order(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("order"))
}

/// GET /api/admin/all-users
pub async fn all_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.repository.users().await?))
}

/// GET /api/admin/all-users/{id}
pub async fn one_user(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<User>, AppError> {
    state
        .repository
        .user(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("user"))
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl UserPayload {
    fn changes(&self) -> Result<UserChanges, AppError> {
        let first_name = self.first_name.trim();
        let last_name = self.last_name.trim();
        let email = self.email.trim();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(AppError::Validation("first and last name are required".to_string()));
        }
        if !email.contains('@') {
            return Err(AppError::Validation("a valid email is required".to_string()));
        }
        Ok(UserChanges {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
        })
    }

    /// The new password, if one was supplied.
    fn password(&self) -> Result<Option<&str>, AppError> {
        match self.password.as_deref() {
            None | Some("") => Ok(None),
            Some(password) if password.len() < MIN_PASSWORD_LEN => Err(AppError::Validation(
                format!("password must be at least {MIN_PASSWORD_LEN} characters"),
            )),
            Some(password) => Ok(Some(password)),
        }
    }
}

/// POST /api/admin/all-users/edit/{id}; id 0 creates a new user.
#[tracing::instrument(skip_all)]
pub async fn edit_user(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UserPayload>,
) -> Result<Json<Value>, AppError> {
    let changes = payload.changes()?;
    let password = payload.password()?;

    if id == 0 {
        let password = password
            .ok_or_else(|| AppError::Validation("a password is required".to_string()))?;
        let hash = state.credentials.hash_password(password.to_string()).await?;
        let id = state
            .repository
            .add_user(NewUser {
                first_name: changes.first_name,
                last_name: changes.last_name,
                email: changes.email,
                password: hash,
            })
            .await?;
        info!("Created user {id}");
        return Ok(Json(json!({ "error": false, "message": "user created", "id": id })));
    }

    let password_hash = match password {
        Some(password) => Some(state.credentials.hash_password(password.to_string()).await?),
        None => None,
    };
    if !state.repository.edit_user(id, changes, password_hash).await? {
        return Err(AppError::NotFound("user"));
    }
    info!("Updated user {id}");
    Ok(Json(json!({ "error": false, "message": "user updated", "id": id })))
}

/// POST /api/admin/all-users/delete/{id} removes the account with its tokens
/// and logs out any of its open sessions.
#[tracing::instrument(skip_all)]
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(admin)): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    if !state.repository.delete_user(id).await? {
        return Err(AppError::NotFound("user"));
    }
    if admin.id == id {
        warn!("User {id} deleted their own account");
    }
    info!("Deleted user {id}");

    state.notifications.force_logout(id);
    Ok(Json(json!({ "error": false, "message": "user deleted" })))
}
