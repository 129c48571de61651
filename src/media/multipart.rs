use std::collections::HashMap;

use axum::extract::Multipart;
use tracing::warn;

use super::UploadItem;
use crate::error::AppError;

/// Text fields and files of a multipart form, keyed by field name.
/// A repeated name keeps its first value.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, UploadItem>,
}

impl MultipartForm {
    pub async fn read(mut mp: Multipart) -> Result<Self, AppError> {
        let mut form = MultipartForm::default();
        while let Some(field) = mp.next_field().await.map_err(|e| {
            warn!(error = %e, "malformed multipart body");
            AppError::validation("Malformed multipart body")
        })? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::validation("Malformed multipart body"))?;
                form.files
                    .entry(name)
                    .or_insert(UploadItem { body, content_type });
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::validation("Malformed multipart body"))?;
                form.fields.entry(name).or_insert(text);
            }
        }
        Ok(form)
    }

    /// Trimmed text value; blank counts as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadItem> {
        self.files.remove(name).filter(|f| !f.body.is_empty())
    }
}
