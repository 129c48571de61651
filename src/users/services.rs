use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{Registration, UpdateAccountRequest};
use super::repo_types::{NewUser, ProfileUpdate, PublicUser};
use crate::auth::services::normalize_identifier;
use crate::error::AppError;
use crate::media::{discard_media, upload_media, UploadItem};
use crate::state::AppState;

const AVATAR_FOLDER: &str = "avatars";
const COVER_FOLDER: &str = "covers";

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Creates a user. The avatar must upload before the record is written; if the
/// write then fails, uploaded objects are removed again.
#[instrument(skip_all)]
pub async fn register(st: &AppState, reg: Registration) -> Result<PublicUser, AppError> {
    let (Some(full_name), Some(email), Some(username), Some(password)) = (
        non_blank(reg.full_name),
        normalize_identifier(reg.email),
        normalize_identifier(reg.username),
        reg.password.filter(|p| !p.trim().is_empty()),
    ) else {
        return Err(AppError::validation("All fields are required"));
    };
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }

    if st
        .users
        .find_by_login(Some(username.as_str()), Some(email.as_str()))
        .await?
        .is_some()
    {
        warn!(%username, %email, "username or email already registered");
        return Err(AppError::Conflict(
            "User with email or username already exist".into(),
        ));
    }

    let avatar_file = reg
        .avatar
        .ok_or_else(|| AppError::validation("Avatar file is required"))?;
    let avatar = upload_media(st, AVATAR_FOLDER, avatar_file)
        .await
        .ok_or_else(|| AppError::validation("Failed to upload avatar"))?;

    // Optional: a failed cover upload leaves the field empty.
    let cover = match reg.cover_image {
        Some(file) => upload_media(st, COVER_FOLDER, file).await,
        None => None,
    };

    let password_hash = match st.passwords.hash_blocking(password).await {
        Ok(h) => h,
        Err(e) => {
            discard_media(st, [Some(avatar), cover].into_iter().flatten()).await;
            return Err(e.into());
        }
    };

    let created = st
        .users
        .insert(NewUser {
            username,
            email,
            full_name,
            avatar: avatar.url.clone(),
            cover_image: cover.as_ref().map(|c| c.url.clone()),
            password_hash,
        })
        .await;

    match created {
        Ok(user) => {
            info!(user_id = %user.id, username = %user.username, "user registered");
            Ok(user.into())
        }
        Err(e) => {
            discard_media(st, [Some(avatar), cover].into_iter().flatten()).await;
            Err(e.into())
        }
    }
}

/// Changes display name and/or email. Credentials are never touched.
#[instrument(skip(st, req))]
pub async fn update_account(
    st: &AppState,
    user_id: Uuid,
    req: UpdateAccountRequest,
) -> Result<PublicUser, AppError> {
    let full_name = non_blank(req.full_name);
    let email = normalize_identifier(req.email);
    if full_name.is_none() && email.is_none() {
        return Err(AppError::validation("fullName or email is required"));
    }
    if let Some(email) = &email {
        if !is_valid_email(email) {
            return Err(AppError::validation("Invalid email"));
        }
    }

    let user = st
        .users
        .update_profile(
            user_id,
            ProfileUpdate {
                full_name,
                email,
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound("User does not exist".into()))?;
    info!(%user_id, "account details updated");
    Ok(user.into())
}

#[instrument(skip(st, file))]
pub async fn update_avatar(
    st: &AppState,
    user_id: Uuid,
    file: Option<UploadItem>,
) -> Result<PublicUser, AppError> {
    let file = file.ok_or_else(|| AppError::validation("Avatar file is missing"))?;
    let media = upload_media(st, AVATAR_FOLDER, file)
        .await
        .ok_or_else(|| AppError::validation("Failed to upload avatar"))?;
    let update = ProfileUpdate {
        avatar: Some(media.url.clone()),
        ..Default::default()
    };
    replace_media(st, user_id, update, media).await
}

#[instrument(skip(st, file))]
pub async fn update_cover_image(
    st: &AppState,
    user_id: Uuid,
    file: Option<UploadItem>,
) -> Result<PublicUser, AppError> {
    let file = file.ok_or_else(|| AppError::validation("Cover image file is missing"))?;
    let media = upload_media(st, COVER_FOLDER, file)
        .await
        .ok_or_else(|| AppError::validation("Failed to upload cover image"))?;
    let update = ProfileUpdate {
        cover_image: Some(media.url.clone()),
        ..Default::default()
    };
    replace_media(st, user_id, update, media).await
}

async fn replace_media(
    st: &AppState,
    user_id: Uuid,
    update: ProfileUpdate,
    media: crate::media::MediaObject,
) -> Result<PublicUser, AppError> {
    match st.users.update_profile(user_id, update).await {
        Ok(Some(user)) => {
            info!(%user_id, key = %media.key, "profile media replaced");
            Ok(user.into())
        }
        Ok(None) => {
            discard_media(st, [media]).await;
            Err(AppError::NotFound("User does not exist".into()))
        }
        Err(e) => {
            discard_media(st, [media]).await;
            Err(e.into())
        }
    }
}
