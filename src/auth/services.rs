//! Session lifecycle: login, refresh, logout, password change and access-token
//! authentication. Each user has at most one live refresh token; issuing a new
//! pair overwrites it, so a rotated-out token is rejected even before it expires.
//! Refresh swaps the slot conditionally, so two concurrent refreshes with the
//! same token cannot both succeed.

use anyhow::Context;
use axum::extract::FromRef;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::dto::{ChangePasswordRequest, LoginRequest, TokenPair};
use super::jwt::JwtKeys;
use crate::error::AppError;
use crate::state::AppState;
use crate::users::repo_types::{PublicUser, User};

/// Trimmed, lowercased identifier; blank counts as absent.
pub(crate) fn normalize_identifier(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_lowercase()).filter(|v| !v.is_empty())
}

fn sign_pair(st: &AppState, user: &User) -> Result<TokenPair, AppError> {
    let keys = JwtKeys::from_ref(st);
    let access_token = keys
        .sign_access(user.into())
        .context("Something went wrong while generating access token")?;
    let refresh_token = keys
        .sign_refresh(user.id)
        .context("Something went wrong while generating refresh token")?;
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Mints a fresh pair and stores the refresh half as the user's only valid one.
async fn issue_tokens(st: &AppState, user: &User) -> Result<TokenPair, AppError> {
    let tokens = sign_pair(st, user)?;
    st.users
        .set_refresh_token(user.id, Some(&tokens.refresh_token))
        .await?;
    Ok(tokens)
}

#[instrument(skip(st, req))]
pub async fn login(st: &AppState, req: LoginRequest) -> Result<(PublicUser, TokenPair), AppError> {
    let username = normalize_identifier(req.username);
    let email = normalize_identifier(req.email);
    if username.is_none() && email.is_none() {
        return Err(AppError::validation("username or email is required"));
    }
    if req.password.is_empty() {
        return Err(AppError::validation("password is required"));
    }

    let found = st
        .users
        .find_by_login(username.as_deref(), email.as_deref())
        .await?;

    let Some(user) = found else {
        // Same hashing cost as a real mismatch.
        st.passwords.verify_dummy(req.password).await?;
        warn!(?username, ?email, "login for unknown user");
        return Err(AppError::NotFound("User does not exist".into()));
    };

    let ok = st
        .passwords
        .verify_blocking(req.password, user.password_hash.clone())
        .await?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let tokens = issue_tokens(st, &user).await?;
    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok((PublicUser::from(user), tokens))
}

#[instrument(skip_all)]
pub async fn refresh(st: &AppState, presented: Option<String>) -> Result<TokenPair, AppError> {
    let token = presented
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized("Unauthorized request"))?;

    let keys = JwtKeys::from_ref(st);
    let claims = keys.verify_refresh(&token).map_err(|e| {
        debug!(error = %e, "refresh token rejected");
        AppError::Unauthorized("Invalid refresh token")
    })?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or(AppError::Unauthorized("Invalid refresh token"))?;

    let tokens = sign_pair(st, &user)?;
    let rotated = st
        .users
        .rotate_refresh_token(user.id, &token, &tokens.refresh_token)
        .await?;
    if !rotated {
        warn!(user_id = %user.id, "stale or reused refresh token");
        return Err(AppError::Unauthorized("Refresh token is expired or used"));
    }
    info!(user_id = %user.id, "tokens rotated");
    Ok(tokens)
}

/// Unsets the stored refresh token. Idempotent.
#[instrument(skip(st))]
pub async fn logout(st: &AppState, user_id: Uuid) -> Result<(), AppError> {
    st.users.set_refresh_token(user_id, None).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

/// Replaces the password hash. Outstanding tokens stay valid.
#[instrument(skip(st, req))]
pub async fn change_password(
    st: &AppState,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> Result<(), AppError> {
    if req.old_password.is_empty() || req.new_password.is_empty() {
        return Err(AppError::validation("oldPassword and newPassword are required"));
    }

    let user = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User does not exist".into()))?;

    let ok = st
        .passwords
        .verify_blocking(req.old_password, user.password_hash)
        .await?;
    if !ok {
        warn!(%user_id, "change password with wrong old password");
        return Err(AppError::InvalidCredentials);
    }

    let hash = st.passwords.hash_blocking(req.new_password).await?;
    st.users.set_password_hash(user_id, &hash).await?;
    info!(%user_id, "password changed");
    Ok(())
}

/// Resolves an access token to the live, sanitized user it names.
/// The refresh-token slot is not consulted.
pub async fn authenticate(st: &AppState, token: Option<String>) -> Result<PublicUser, AppError> {
    let token = token.ok_or(AppError::Unauthorized("Unauthorized request"))?;

    let keys = JwtKeys::from_ref(st);
    let claims = keys.verify_access(&token).map_err(|e| {
        debug!(error = %e, "access token rejected");
        AppError::Unauthorized("Invalid access token")
    })?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or(AppError::Unauthorized("Invalid access token"))?;
    Ok(user.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::NewUser;

    async fn seed(st: &AppState, username: &str, email: &str, password: &str) -> User {
        let hash = st.passwords.hash(password).unwrap();
        st.users
            .insert(NewUser {
                username: username.into(),
                email: email.into(),
                full_name: "Ana Lima".into(),
                avatar: "https://media.local/avatars/a.png".into(),
                cover_image: None,
                password_hash: hash,
            })
            .await
            .unwrap()
    }

    fn by_username(name: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: Some(name.into()),
            email: None,
            password: password.into(),
        }
    }

    async fn stored_refresh(st: &AppState, id: Uuid) -> Option<String> {
        st.users.find_by_id(id).await.unwrap().unwrap().refresh_token
    }

    #[tokio::test]
    async fn login_issues_pair_and_stores_refresh() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;

        let (user, tokens) = login(&st, by_username("ana", "Secret1!")).await.unwrap();
        assert_eq!(user.id, ana.id);

        let claims = JwtKeys::from_ref(&st).verify_access(&tokens.access_token).unwrap();
        assert_eq!(claims.sub, ana.id);
        assert_eq!(claims.username, "ana");
        assert_eq!(stored_refresh(&st, ana.id).await, Some(tokens.refresh_token));
    }

    #[tokio::test]
    async fn login_accepts_email_and_normalizes_case() {
        let st = AppState::fake();
        seed(&st, "ana", "a@x.com", "Secret1!").await;
        let req = LoginRequest {
            username: Some("  ".into()),
            email: Some(" A@X.com ".into()),
            password: "Secret1!".into(),
        };
        assert!(login(&st, req).await.is_ok());
        assert!(login(&st, by_username("ANA", "Secret1!")).await.is_ok());
    }

    #[tokio::test]
    async fn login_requires_an_identifier() {
        let st = AppState::fake();
        let req = LoginRequest {
            username: None,
            email: Some("".into()),
            password: "x".into(),
        };
        assert!(matches!(login(&st, req).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn login_unknown_user_is_not_found() {
        let st = AppState::fake();
        let err = login(&st, by_username("ghost", "whatever")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn wrong_password_leaves_refresh_slot_untouched() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;
        let (_, first) = login(&st, by_username("ana", "Secret1!")).await.unwrap();

        let err = login(&st, by_username("ana", "secret1!")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        assert_eq!(stored_refresh(&st, ana.id).await, Some(first.refresh_token));
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_previous_token() {
        let st = AppState::fake();
        seed(&st, "ana", "a@x.com", "Secret1!").await;
        let (_, first) = login(&st, by_username("ana", "Secret1!")).await.unwrap();

        let second = refresh(&st, Some(first.refresh_token.clone())).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let err = refresh(&st, Some(first.refresh_token)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized("Refresh token is expired or used")));

        // The new token is itself single-use.
        let third = refresh(&st, Some(second.refresh_token.clone())).await.unwrap();
        assert!(refresh(&st, Some(second.refresh_token)).await.is_err());
        assert!(refresh(&st, Some(third.refresh_token)).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_refresh_with_one_token_succeeds_once() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;
        let (_, first) = login(&st, by_username("ana", "Secret1!")).await.unwrap();

        let (a, b) = tokio::join!(
            refresh(&st, Some(first.refresh_token.clone())),
            refresh(&st, Some(first.refresh_token.clone())),
        );
        let winner = match (a, b) {
            (Ok(t), Err(AppError::Unauthorized(_))) | (Err(AppError::Unauthorized(_)), Ok(t)) => t,
            other => panic!("expected exactly one rotation, got {other:?}"),
        };
        assert_eq!(stored_refresh(&st, ana.id).await, Some(winner.refresh_token));
    }

    #[tokio::test]
    async fn refresh_loses_to_rotation_that_lands_first() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;
        let (_, first) = login(&st, by_username("ana", "Secret1!")).await.unwrap();

        // another request already swapped the slot
        assert!(st
            .users
            .rotate_refresh_token(ana.id, &first.refresh_token, "elsewhere")
            .await
            .unwrap());

        let err = refresh(&st, Some(first.refresh_token)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized("Refresh token is expired or used")));
        assert_eq!(stored_refresh(&st, ana.id).await.as_deref(), Some("elsewhere"));
    }

    #[tokio::test]
    async fn second_login_invalidates_first_session() {
        let st = AppState::fake();
        seed(&st, "ana", "a@x.com", "Secret1!").await;
        let (_, first) = login(&st, by_username("ana", "Secret1!")).await.unwrap();
        let (_, _second) = login(&st, by_username("ana", "Secret1!")).await.unwrap();

        let err = refresh(&st, Some(first.refresh_token)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn refresh_rejects_missing_and_forged_tokens() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;

        assert!(matches!(
            refresh(&st, None).await,
            Err(AppError::Unauthorized("Unauthorized request"))
        ));
        assert!(matches!(
            refresh(&st, Some(String::new())).await,
            Err(AppError::Unauthorized("Unauthorized request"))
        ));
        assert!(matches!(
            refresh(&st, Some("garbage".into())).await,
            Err(AppError::Unauthorized("Invalid refresh token"))
        ));

        // An access token is not a refresh token.
        let access = JwtKeys::from_ref(&st).sign_access((&ana).into()).unwrap();
        assert!(matches!(
            refresh(&st, Some(access)).await,
            Err(AppError::Unauthorized("Invalid refresh token"))
        ));
    }

    #[tokio::test]
    async fn refresh_for_vanished_user_is_unauthorized() {
        let st = AppState::fake();
        let token = JwtKeys::from_ref(&st).sign_refresh(Uuid::new_v4()).unwrap();
        assert!(matches!(
            refresh(&st, Some(token)).await,
            Err(AppError::Unauthorized("Invalid refresh token"))
        ));
    }

    #[tokio::test]
    async fn logout_clears_slot_and_blocks_refresh() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;
        let (_, tokens) = login(&st, by_username("ana", "Secret1!")).await.unwrap();

        logout(&st, ana.id).await.unwrap();
        assert_eq!(stored_refresh(&st, ana.id).await, None);
        assert!(matches!(
            refresh(&st, Some(tokens.refresh_token)).await,
            Err(AppError::Unauthorized("Refresh token is expired or used"))
        ));

        // Already logged out: still fine.
        logout(&st, ana.id).await.unwrap();
    }

    #[tokio::test]
    async fn change_password_with_wrong_old_password_keeps_hash() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;

        let err = change_password(
            &st,
            ana.id,
            ChangePasswordRequest {
                old_password: "nope".into(),
                new_password: "Newer2@".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));

        let stored = st.users.find_by_id(ana.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, ana.password_hash);
    }

    #[tokio::test]
    async fn change_password_swaps_credentials_but_keeps_tokens() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;
        let (_, tokens) = login(&st, by_username("ana", "Secret1!")).await.unwrap();

        change_password(
            &st,
            ana.id,
            ChangePasswordRequest {
                old_password: "Secret1!".into(),
                new_password: "Newer2@".into(),
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            login(&st, by_username("ana", "Secret1!")).await,
            Err(AppError::InvalidCredentials)
        ));
        assert_eq!(stored_refresh(&st, ana.id).await, Some(tokens.refresh_token.clone()));
        let me = authenticate(&st, Some(tokens.access_token)).await.unwrap();
        assert_eq!(me.id, ana.id);

        assert!(login(&st, by_username("ana", "Newer2@")).await.is_ok());
    }

    #[tokio::test]
    async fn change_password_requires_both_fields() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;
        let err = change_password(&st, ana.id, ChangePasswordRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn authenticate_ignores_refresh_slot() {
        let st = AppState::fake();
        let ana = seed(&st, "ana", "a@x.com", "Secret1!").await;
        let (_, tokens) = login(&st, by_username("ana", "Secret1!")).await.unwrap();
        logout(&st, ana.id).await.unwrap();

        let me = authenticate(&st, Some(tokens.access_token)).await.unwrap();
        assert_eq!(me.username, "ana");
    }

    #[tokio::test]
    async fn authenticate_rejects_bad_tokens() {
        let st = AppState::fake();
        assert!(matches!(
            authenticate(&st, None).await,
            Err(AppError::Unauthorized("Unauthorized request"))
        ));
        assert!(matches!(
            authenticate(&st, Some("x.y.z".into())).await,
            Err(AppError::Unauthorized("Invalid access token"))
        ));

        let refresh_token = JwtKeys::from_ref(&st).sign_refresh(Uuid::new_v4()).unwrap();
        assert!(authenticate(&st, Some(refresh_token)).await.is_err());

        let ghost = User {
            id: Uuid::new_v4(),
            username: "ghost".into(),
            email: "g@x.com".into(),
            full_name: "Ghost".into(),
            avatar: String::new(),
            cover_image: None,
            watch_history: Vec::new(),
            password_hash: String::new(),
            refresh_token: None,
            created_at: time::OffsetDateTime::now_utc(),
            updated_at: time::OffsetDateTime::now_utc(),
        };
        let orphan = JwtKeys::from_ref(&st).sign_access((&ghost).into()).unwrap();
        assert!(matches!(
            authenticate(&st, Some(orphan)).await,
            Err(AppError::Unauthorized("Invalid access token"))
        ));
    }
}
