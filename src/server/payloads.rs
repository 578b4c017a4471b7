//! Typed request bodies. Unknown fields are rejected, and every body is
//! validated before it reaches the credential store or the token codec.

use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::identity::Role;

pub trait Validate {
    fn validate(&self) -> AppResult<()>;
}

/// `Json<T>` that maps rejections to `AppError::UserInput` and then runs [`Validate`].
pub struct ValidJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rej| AppError::user("invalid_body".to_string(), rej.body_text()))?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

fn require_credentials(username: &str, password: &str) -> AppResult<()> {
    if username.trim().is_empty() {
        return Err(AppError::user("missing_username", "Username is required"));
    }
    if password.is_empty() {
        return Err(AppError::user("missing_password", "Password is required"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
    /// The login form historically sent this as `role`.
    #[serde(default, alias = "role")]
    pub requested_role: Option<Role>,
}

impl Validate for LoginPayload {
    fn validate(&self) -> AppResult<()> { require_credentials(&self.username, &self.password) }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RegisterPayload {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
}

impl Validate for RegisterPayload {
    fn validate(&self) -> AppResult<()> { require_credentials(&self.username, &self.password) }
}

fn default_promotion() -> Role { Role::Member }

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PromotePayload {
    pub username: String,
    #[serde(default = "default_promotion")]
    pub role: Role,
}

impl Validate for PromotePayload {
    fn validate(&self) -> AppResult<()> {
        if self.username.trim().is_empty() {
            return Err(AppError::user("missing_username", "Username is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}
