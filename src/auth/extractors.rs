use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::{cookies, services};
use crate::error::AppError;
use crate::state::AppState;
use crate::users::repo_types::PublicUser;

/// The authenticated caller, resolved from the `accessToken` cookie or a
/// `Bearer` header.
pub struct AuthUser(pub PublicUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = cookies::access_token(&parts.headers);
        let user = services::authenticate(state, token).await?;
        Ok(AuthUser(user))
    }
}
