use std::fmt;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Base64 image block in the shape the messages API expects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub source: ImageSource,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

impl ImagePayload {
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn media_type(&self) -> &str {
        &self.source.media_type
    }

    pub fn data(&self) -> &str {
        &self.source.data
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageWarning {
    NotFound,
    TooLarge,
    UnsupportedType,
    LoadFailed,
}

impl ImageWarning {
    pub fn message(self) -> &'static str {
        match self {
            Self::NotFound => "Image path not found, continuing without the image.",
            Self::TooLarge => "Image is too large, continuing without the image.",
            Self::UnsupportedType => "Unsupported image type, please upload a PNG or JPG.",
            Self::LoadFailed => "Image failed to load, continuing without the image.",
        }
    }
}

impl fmt::Display for ImageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageAttachment {
    NotProvided,
    Attached(ImagePayload),
    Skipped(ImageWarning),
}

impl ImageAttachment {
    pub fn payload(&self) -> Option<&ImagePayload> {
        match self {
            Self::Attached(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn warning(&self) -> Option<ImageWarning> {
        match self {
            Self::Skipped(warning) => Some(*warning),
            _ => None,
        }
    }

    pub fn into_payload(self) -> Option<ImagePayload> {
        match self {
            Self::Attached(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Validates and encodes an optional image. Every failure degrades to a
/// warning so the interaction continues text-only.
pub fn build_image_payload(path: Option<&Path>, max_bytes: u64) -> ImageAttachment {
    let Some(path) = path.filter(|path| !path.as_os_str().is_empty()) else {
        return ImageAttachment::NotProvided;
    };

    let outcome = load_image(path, max_bytes);
    match &outcome {
        ImageAttachment::Attached(payload) => debug!(
            event_name = "image.attached",
            media_type = payload.media_type(),
            encoded_len = payload.data().len(),
            "image payload built"
        ),
        ImageAttachment::Skipped(warning) => warn!(
            event_name = "image.skipped",
            path = %path.display(),
            reason = ?warning,
            "continuing without image"
        ),
        ImageAttachment::NotProvided => {}
    }
    outcome
}

fn load_image(path: &Path, max_bytes: u64) -> ImageAttachment {
    if !path.exists() {
        return ImageAttachment::Skipped(ImageWarning::NotFound);
    }

    let size = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(_) => return ImageAttachment::Skipped(ImageWarning::LoadFailed),
    };
    if size > max_bytes {
        return ImageAttachment::Skipped(ImageWarning::TooLarge);
    }

    let media_type = match mime_guess::from_path(path).first() {
        Some(mime) if mime.type_() == mime_guess::mime::IMAGE => mime.essence_str().to_string(),
        _ => return ImageAttachment::Skipped(ImageWarning::UnsupportedType),
    };

    match fs::read(path) {
        Ok(bytes) => {
            ImageAttachment::Attached(ImagePayload::base64(media_type, BASE64_STANDARD.encode(bytes)))
        }
        Err(_) => ImageAttachment::Skipped(ImageWarning::LoadFailed),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{build_image_payload, ImageAttachment, ImageWarning};

    #[test]
    fn empty_png_under_limit_is_attached() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("ankle.png");
        fs::write(&path, b"").expect("write png");

        let outcome = build_image_payload(Some(&path), 1024);
        let payload = outcome.payload().expect("payload expected");

        assert_eq!(payload.media_type(), "image/png");
        assert_eq!(payload.data(), "");
        assert!(outcome.warning().is_none());
    }

    #[test]
    fn jpeg_bytes_are_base64_encoded() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("knee.jpg");
        fs::write(&path, [0xff, 0xd8, 0xff]).expect("write jpg");

        let outcome = build_image_payload(Some(&path), 1024);
        let payload = outcome.payload().expect("payload expected");

        assert_eq!(payload.media_type(), "image/jpeg");
        assert_eq!(payload.data(), "/9j/");
    }

    #[test]
    fn oversize_image_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("big.png");
        fs::write(&path, vec![0u8; 64]).expect("write png");

        let outcome = build_image_payload(Some(&path), 63);
        assert_eq!(outcome, ImageAttachment::Skipped(ImageWarning::TooLarge));
        assert!(outcome.payload().is_none());
    }

    #[test]
    fn non_image_file_is_unsupported() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("report.txt");
        fs::write(&path, "MRI: grade II sprain").expect("write txt");

        let outcome = build_image_payload(Some(&path), 1024);
        assert_eq!(outcome, ImageAttachment::Skipped(ImageWarning::UnsupportedType));
    }

    #[test]
    fn missing_path_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nowhere.png");

        let outcome = build_image_payload(Some(&path), 1024);
        assert_eq!(outcome, ImageAttachment::Skipped(ImageWarning::NotFound));
        assert!(outcome.warning().is_some_and(|warning| warning.message().contains("not found")));
    }

    #[test]
    fn absent_path_is_not_provided() {
        assert_eq!(build_image_payload(None, 1024), ImageAttachment::NotProvided);
        assert_eq!(
            build_image_payload(Some(std::path::Path::new("")), 1024),
            ImageAttachment::NotProvided
        );
    }

    #[test]
    fn payload_serializes_as_image_block_source() {
        let payload = super::ImagePayload::base64("image/png", "AAAA");
        let value = serde_json::to_value(&payload).expect("serialize payload");

        assert_eq!(value["source"]["type"], "base64");
        assert_eq!(value["source"]["media_type"], "image/png");
        assert_eq!(value["source"]["data"], "AAAA");
    }
}
