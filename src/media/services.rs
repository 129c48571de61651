use bytes::Bytes;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// A file received from the client, not yet stored.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

/// A stored object and the durable URL it is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaObject {
    pub key: String,
    pub url: String,
}

/// Stores `item` under `<folder>/<uuid>.<ext>`.
///
/// Failures are logged and reported as `None`; callers decide whether a missing
/// upload is fatal.
pub async fn upload_media(st: &AppState, folder: &str, item: UploadItem) -> Option<MediaObject> {
    if item.body.is_empty() {
        warn!(folder, "refusing to upload empty file");
        return None;
    }
    let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", folder, Uuid::new_v4(), ext);
    match st
        .storage
        .put_object(&key, item.body, &item.content_type)
        .await
    {
        Ok(()) => {
            let url = st.storage.public_url(&key);
            info!(%key, "media uploaded");
            Some(MediaObject { key, url })
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), %key, "media upload failed");
            None
        }
    }
}

/// Best-effort removal of objects that ended up unreferenced.
pub async fn discard_media(st: &AppState, objects: impl IntoIterator<Item = MediaObject>) {
    for obj in objects {
        if let Err(e) = st.storage.delete_object(&obj.key).await {
            warn!(error = %format!("{e:#}"), key = %obj.key, "media cleanup failed");
        }
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}
