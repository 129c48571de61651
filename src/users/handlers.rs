use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, patch, post},
    Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{Registration, UpdateAccountRequest},
    repo_types::PublicUser,
    services,
};
use crate::{
    auth::extractors::AuthUser, error::AppError, extract::AppJson, media::multipart::MultipartForm,
    response::ApiResponse, state::AppState,
};

const MEDIA_BODY_LIMIT: usize = 10 * 1024 * 1024;
const JSON_BODY_LIMIT: usize = 16 * 1024;

pub fn media_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/avatar", patch(update_avatar))
        .route("/users/cover-image", patch(update_cover_image))
        .layer(DefaultBodyLimit::max(MEDIA_BODY_LIMIT))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/users/update-account", patch(update_account))
        .route("/users/history", get(watch_history))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
}

/// POST /users/register (multipart)
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let mut form = MultipartForm::read(mp).await?;
    let reg = Registration {
        full_name: form.text("fullName"),
        email: form.text("email"),
        username: form.text("username"),
        password: form.fields.get("password").cloned(),
        avatar: form.take_file("avatar"),
        cover_image: form.take_file("coverImage"),
    };
    let user = services::register(&state, reg).await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        user,
        "User registered successfully",
    ))
}

#[instrument(skip_all)]
pub async fn update_account(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppJson(payload): AppJson<UpdateAccountRequest>,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let user = services::update_account(&state, user.id, payload).await?;
    Ok(ApiResponse::ok(user, "Account details updated successfully"))
}

#[instrument(skip_all)]
pub async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let mut form = MultipartForm::read(mp).await?;
    let user = services::update_avatar(&state, user.id, form.take_file("avatar")).await?;
    Ok(ApiResponse::ok(user, "Avatar image updated successfully"))
}

#[instrument(skip_all)]
pub async fn update_cover_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let mut form = MultipartForm::read(mp).await?;
    let user = services::update_cover_image(&state, user.id, form.take_file("coverImage")).await?;
    Ok(ApiResponse::ok(user, "Cover image updated successfully"))
}

pub async fn watch_history(AuthUser(user): AuthUser) -> ApiResponse<Vec<Uuid>> {
    ApiResponse::ok(user.watch_history, "Watch history fetched successfully")
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    const BOUNDARY: &str = "XyZboundary";

    fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> Body {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        for (name, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    fn multipart_request(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body)
            .unwrap()
    }

    fn app(st: AppState) -> Router {
        media_routes().merge(profile_routes()).with_state(st)
    }

    async fn body_json(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn register_over_multipart_is_201() {
        let st = AppState::fake();
        let body = multipart_body(
            &[
                ("fullName", "Ana Lima"),
                ("email", "a@x.com"),
                ("username", "ana"),
                ("password", "Secret1!"),
            ],
            &[("avatar", &b"\x89PNG fake"[..])],
        );
        let res = app(st.clone())
            .oneshot(multipart_request("POST", "/users/register", body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let body = body_json(res).await;
        assert_eq!(body["statusCode"], 201);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["username"], "ana");
        assert!(body["data"].get("passwordHash").is_none());
        assert!(body["data"].get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn register_without_avatar_is_400() {
        let st = AppState::fake();
        let body = multipart_body(
            &[
                ("fullName", "Ana Lima"),
                ("email", "a@x.com"),
                ("username", "ana"),
                ("password", "Secret1!"),
            ],
            &[],
        );
        let res = app(st)
            .oneshot(multipart_request("POST", "/users/register", body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["message"], "Avatar file is required");
    }

    #[tokio::test]
    async fn profile_routes_require_access_token() {
        let st = AppState::fake();
        let res = app(st.clone())
            .oneshot(Request::get("/users/history").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app(st)
            .oneshot(multipart_request(
                "PATCH",
                "/users/avatar",
                multipart_body(&[], &[("avatar", &b"img"[..])]),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
