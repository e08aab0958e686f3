use base64::Engine as _;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not an image file: {0}")]
    NotAnImage(String),
    #[error("Invalid image data URL")]
    InvalidDataUrl,
}

/// An image ready to be sent to a vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    /// Standard base64, no prefix.
    pub data: String,
}

impl ImagePayload {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// `data:<mime>;base64,<data>`
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn from_data_url(url: &str) -> Result<Self, ImageError> {
        let rest = url.strip_prefix("data:").ok_or(ImageError::InvalidDataUrl)?;
        let (header, data) = rest.split_once(',').ok_or(ImageError::InvalidDataUrl)?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or(ImageError::InvalidDataUrl)?;
        if !mime_type.starts_with("image/") {
            return Err(ImageError::NotAnImage(mime_type.to_string()));
        }
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }
}

/// Read a user-selected file and encode it for transmission.
///
/// The type is guessed from the file extension and must be `image/*`.
pub async fn read_image_file(path: impl AsRef<Path>) -> Result<ImagePayload, ImageError> {
    let path = path.as_ref();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if !mime.essence_str().starts_with("image/") {
        return Err(ImageError::NotAnImage(mime.essence_str().to_string()));
    }

    let bytes = tokio::fs::read(path).await?;
    tracing::info!(
        file = %path.display(),
        mime = mime.essence_str(),
        bytes = bytes.len(),
        "image loaded"
    );
    Ok(ImagePayload::from_bytes(mime.essence_str(), &bytes))
}
