//! Recognition request types

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

/// Opaque raster bytes handed to a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl EncodedImage {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: "image/png",
        }
    }

    /// `data:<mime>;base64,...` form used by HTTP backends
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Backend options attached to every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionOptions {
    /// Language code understood by the backend (e.g. "eng")
    pub language: String,

    /// Restrict recognized characters to this set
    pub charset_whitelist: Option<String>,

    /// The region holds a single line of text
    pub single_line_hint: bool,

    /// Remove all internal whitespace from the recognized text (short codes)
    pub collapse_whitespace: bool,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            charset_whitelist: None,
            single_line_hint: false,
            collapse_whitespace: false,
        }
    }
}
