//! Messages exchanged with the hosting shell
//!
//! Serialized as JSON objects tagged by `type`, e.g.
//! `{"type":"SELECTION_DONE","x":10,"y":20,"w":300,"h":40,"dpr":2.0}`.
//! Images travel base64-encoded in any raster format the decoder accepts.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use snipocr_imaging::{DeviceRect, PixelBuffer, PreprocessConfig};
use snipocr_ocr::RecognitionResult;

use crate::session::StateKind;

/// Commands sent by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostCommand {
    /// Begin interactive selection over the current surface
    StartSelection,

    /// Replace the source image
    LoadImage { image: String },

    /// Describe the display surface the image is shown on
    SetSurface { width: f64, height: f64, dpr: f64 },

    PointerDown { x: f64, y: f64 },
    PointerMove { x: f64, y: f64 },
    PointerUp { x: f64, y: f64 },

    /// Escape key
    Cancel,

    /// New preprocessing parameters
    UpdateConfig { config: PreprocessConfig },

    /// Run the pipeline and recognition now
    #[serde(rename_all = "camelCase")]
    RunRecognition {
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        threshold: Option<u8>,
        #[serde(default)]
        scale: Option<f64>,
    },
}

/// Notifications sent to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoreEvent {
    /// Finalized device-pixel rectangle
    SelectionDone {
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        dpr: f64,
    },

    RecognitionResult(RecognitionResult),

    RecognitionError { message: String },

    StateChanged { state: StateKind },
}

impl CoreEvent {
    pub fn selection_done(rect: DeviceRect, dpr: f64) -> Self {
        CoreEvent::SelectionDone {
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            dpr,
        }
    }
}

/// Decode a base64 image payload
pub fn decode_image(payload: &str) -> snipocr_imaging::Result<PixelBuffer> {
    // Accept bare base64 as well as data URLs.
    let encoded = match payload.split_once(";base64,") {
        Some((_, data)) => data,
        None => payload,
    };
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| snipocr_imaging::ImagingError::UnsupportedImage(format!("invalid base64: {}", e)))?;
    PixelBuffer::decode(&bytes)
}

/// Base64 PNG payload for a buffer
pub fn encode_image(buffer: &PixelBuffer) -> snipocr_imaging::Result<String> {
    Ok(general_purpose::STANDARD.encode(buffer.encode_png()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_host_commands() {
        let cmd: HostCommand = serde_json::from_str(r#"{"type":"START_SELECTION"}"#).unwrap();
        assert_eq!(cmd, HostCommand::StartSelection);

        let cmd: HostCommand =
            serde_json::from_str(r#"{"type":"POINTER_UP","x":12.5,"y":4}"#).unwrap();
        assert_eq!(cmd, HostCommand::PointerUp { x: 12.5, y: 4.0 });

        let cmd: HostCommand =
            serde_json::from_str(r#"{"type":"RUN_RECOGNITION","threshold":140,"scale":3}"#).unwrap();
        assert_eq!(
            cmd,
            HostCommand::RunRecognition {
                image: None,
                threshold: Some(140),
                scale: Some(3.0)
            }
        );

        let cmd: HostCommand = serde_json::from_str(
            r#"{"type":"UPDATE_CONFIG","config":{"invert":true}}"#,
        )
        .unwrap();
        let HostCommand::UpdateConfig { config } = cmd else {
            panic!("expected UPDATE_CONFIG");
        };
        assert!(config.invert);
        assert_eq!(config.threshold, 128);
    }

    #[test]
    fn test_event_wire_shapes() {
        let done = CoreEvent::selection_done(DeviceRect::new(1, 2, 30, 40), 2.0);
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"type": "SELECTION_DONE", "x": 1, "y": 2, "w": 30, "h": 40, "dpr": 2.0})
        );

        let result = CoreEvent::RecognitionResult(RecognitionResult {
            text: "ok".to_string(),
            confidence: 90.0,
            duration_ms: 120,
        });
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"type": "RECOGNITION_RESULT", "text": "ok", "confidence": 90.0, "durationMs": 120})
        );

        let error = CoreEvent::RecognitionError {
            message: "boom".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"type": "RECOGNITION_ERROR", "message": "boom"})
        );
    }

    #[test]
    fn test_image_payload_round_trip() {
        let buffer = PixelBuffer::filled(3, 3, [9, 8, 7, 255]);
        let payload = encode_image(&buffer).unwrap();

        assert_eq!(decode_image(&payload).unwrap(), buffer);
        let data_url = format!("data:image/png;base64,{}", payload);
        assert_eq!(decode_image(&data_url).unwrap(), buffer);
    }

    #[test]
    fn test_bad_payload_is_unsupported_image() {
        assert!(matches!(
            decode_image("!!!"),
            Err(snipocr_imaging::ImagingError::UnsupportedImage(_))
        ));
    }
}
