//! Text recognition backends for snipocr
//!
//! Every backend implements [`RecognitionBackend`] and is driven through a
//! [`RecognitionAdapter`], which times the call and normalizes whatever the
//! backend reported into a [`RecognitionResult`]:
//!
//! - [`RemoteBackend`]: OCR.space-compatible HTTP API
//! - [`LocalBackend`]: the Tesseract engine binary
//! - [`ChatBackend`]: a vision-capable chat-completions model

mod adapter;
pub mod aggregate;
pub mod chat;
mod error;
pub mod local;
pub mod remote;
mod request;

pub use adapter::{RecognitionAdapter, RecognitionBackend};
pub use aggregate::{most_confident, ConfidenceReport, RawRecognition, RecognitionResult};
pub use chat::{ChatBackend, ChatConfig};
pub use error::{OcrError, Result};
pub use local::{LocalBackend, LocalConfig};
pub use remote::{RemoteBackend, RemoteConfig};
pub use request::{EncodedImage, RecognitionOptions};
