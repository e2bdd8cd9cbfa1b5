use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::multipart::Part;

use crate::error::CaptureError;

/// Multipart field the recognition service reads the image from
pub const FIELD_NAME: &str = "test_image";
/// Filename sent with the image part
pub const FILE_NAME: &str = "photo.jpg";

/// Decoded still: raw bytes plus the MIME type from the data URI header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    /// Wrap the bytes as the multipart part the service expects.
    pub fn to_part(&self) -> Result<Part, CaptureError> {
        Part::bytes(self.bytes.clone())
            .file_name(FILE_NAME)
            .mime_str(&self.mime)
            .map_err(|e| CaptureError::MalformedCapture(format!("invalid MIME type {}: {}", self.mime, e)))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Split a `data:<mime>;base64,<payload>` URI and decode its payload.
pub fn decode_data_uri(uri: &str) -> Result<ImagePayload, CaptureError> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| CaptureError::MalformedCapture("missing ',' separator".to_string()))?;

    if payload.contains(',') {
        return Err(CaptureError::MalformedCapture("more than one ',' separator".to_string()));
    }

    let media = header
        .strip_prefix("data:")
        .ok_or_else(|| CaptureError::MalformedCapture("missing 'data:' prefix".to_string()))?;

    let mime = media
        .strip_suffix(";base64")
        .ok_or_else(|| CaptureError::MalformedCapture("missing 'base64' marker".to_string()))?;

    // Parameters such as `;charset=` may sit between the type and the marker
    let mime = mime.split(';').next().unwrap_or_default().trim();
    if mime.is_empty() {
        return Err(CaptureError::MalformedCapture("empty MIME type".to_string()));
    }

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| CaptureError::MalformedCapture(format!("invalid base64 payload: {}", e)))?;

    Ok(ImagePayload {
        mime: mime.to_string(),
        bytes,
    })
}

/// Build the data URI a capture surface hands out for a still.
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    // JPEG SOI marker followed by an APP0 header start
    const JPEG_HEAD: [u8; 6] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

    #[test]
    fn test_decode_jpeg_uri() {
        let payload = decode_data_uri("data:image/jpeg;base64,/9j/4AAQ").unwrap();
        assert_eq!(payload.mime, "image/jpeg");
        assert_eq!(payload.bytes, JPEG_HEAD.to_vec());
    }

    #[test]
    fn test_round_trip_arbitrary_bytes() {
        let mut bytes: Vec<u8> = (0..=255u8).collect();
        bytes.extend((0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8));

        for len in [0usize, 1, 2, 3, 255, 256, bytes.len()] {
            let uri = encode_data_uri("image/png", &bytes[..len]);
            let decoded = decode_data_uri(&uri).unwrap();
            assert_eq!(decoded.bytes, &bytes[..len]);
            assert_eq!(decoded.mime, "image/png");
        }
    }

    #[test]
    fn test_decode_is_deterministic() {
        let uri = encode_data_uri("image/jpeg", &JPEG_HEAD);
        assert_eq!(decode_data_uri(&uri).unwrap(), decode_data_uri(&uri).unwrap());
    }

    #[test]
    fn test_missing_base64_marker() {
        let err = decode_data_uri("data:image/jpeg,/9j/4AAQ").unwrap_err();
        assert!(matches!(err, CaptureError::MalformedCapture(_)));
    }

    #[test]
    fn test_missing_separator() {
        let err = decode_data_uri("data:image/jpeg;base64/9j/4AAQ").unwrap_err();
        assert!(matches!(err, CaptureError::MalformedCapture(_)));
    }

    #[test]
    fn test_missing_data_prefix() {
        let err = decode_data_uri("image/jpeg;base64,/9j/4AAQ").unwrap_err();
        assert!(matches!(err, CaptureError::MalformedCapture(_)));
    }

    #[test]
    fn test_extra_separator_rejected() {
        let err = decode_data_uri("data:image/jpeg;base64,/9j/,4AAQ").unwrap_err();
        assert!(matches!(err, CaptureError::MalformedCapture(_)));
    }

    #[test]
    fn test_invalid_payload() {
        let err = decode_data_uri("data:image/jpeg;base64,@@@").unwrap_err();
        assert!(matches!(err, CaptureError::MalformedCapture(_)));
    }

    #[test]
    fn test_mime_parameters_dropped() {
        let payload = decode_data_uri("data:image/jpeg;name=photo;base64,/9j/4AAQ").unwrap();
        assert_eq!(payload.mime, "image/jpeg");
    }

    #[test]
    fn test_to_part_accepts_image_mime() {
        let payload = ImagePayload {
            mime: "image/jpeg".to_string(),
            bytes: JPEG_HEAD.to_vec(),
        };
        assert!(payload.to_part().is_ok());
    }
}
