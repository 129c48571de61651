pub mod multipart;
pub mod services;

pub use services::{discard_media, upload_media, MediaObject, UploadItem};
