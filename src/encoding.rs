use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// A user-supplied image ready to be sent inline to the collaborator.
///
/// Accepts either raw base64 plus a media type, or a full data URL
/// (`data:image/png;base64,...`), in which case the prefix is stripped and
/// the media type is taken from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub data: String,
    #[serde(default)]
    pub media_type: Option<String>,
}

/// Validated form of [`ReferenceImage`]: base64 without prefix and a known media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedImage {
    pub data: String,
    pub media_type: String,
}

impl ReferenceImage {
    pub fn from_bytes(bytes: &[u8], media_type: Option<&str>) -> Self {
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type: media_type.map(str::to_string),
        }
    }

    pub fn encode(&self) -> Result<EncodedImage, GenerationError> {
        let (data, prefix_type) = split_data_url(self.data.trim())?;
        if data.is_empty() {
            return Err(GenerationError::Validation("image data is empty".into()));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| GenerationError::Validation(format!("image is not valid base64: {e}")))?;
        let sniffed = image::guess_format(&bytes)
            .map_err(|_| GenerationError::Validation("file is not a recognizable image".into()))?;

        let media_type = self
            .media_type
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or(prefix_type)
            .unwrap_or_else(|| sniffed.to_mime_type().to_string());

        Ok(EncodedImage { data: data.to_string(), media_type })
    }
}

fn split_data_url(raw: &str) -> Result<(&str, Option<String>), GenerationError> {
    let Some(rest) = raw.strip_prefix("data:") else {
        return Ok((raw, None));
    };
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| GenerationError::Validation("could not extract base64 data from data URL".into()))?;
    let media_type = header.strip_suffix(";base64").unwrap_or(header);
    let media_type = (!media_type.is_empty()).then(|| media_type.to_string());
    Ok((payload, media_type))
}

/// File extension used when downloading an artifact of the given media type.
pub fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

#[cfg(test)]
pub(crate) const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
