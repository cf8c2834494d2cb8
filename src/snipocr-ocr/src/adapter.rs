//! Backend contract and the timing/normalizing adapter around it

use crate::aggregate::{normalize, RawRecognition, RecognitionResult};
use crate::error::Result;
use crate::request::{EncodedImage, RecognitionOptions};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A text-recognition backend (remote service or local engine).
///
/// Implementations never retry; a failed call is reported once.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    async fn recognize(
        &self,
        image: &EncodedImage,
        options: &RecognitionOptions,
    ) -> Result<RawRecognition>;

    /// Short name used in logs (e.g. "remote", "local")
    fn name(&self) -> &str;
}

#[async_trait]
impl<B: RecognitionBackend + ?Sized> RecognitionBackend for Arc<B> {
    async fn recognize(
        &self,
        image: &EncodedImage,
        options: &RecognitionOptions,
    ) -> Result<RawRecognition> {
        (**self).recognize(image, options).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<B: RecognitionBackend + ?Sized> RecognitionBackend for Box<B> {
    async fn recognize(
        &self,
        image: &EncodedImage,
        options: &RecognitionOptions,
    ) -> Result<RawRecognition> {
        (**self).recognize(image, options).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Wraps a backend, measuring each call and normalizing its output
pub struct RecognitionAdapter<B> {
    backend: B,
}

impl<B: RecognitionBackend> RecognitionAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn recognize(
        &self,
        image: &EncodedImage,
        options: &RecognitionOptions,
    ) -> Result<RecognitionResult> {
        debug!(
            "submitting {} byte image to {} backend",
            image.bytes.len(),
            self.backend.name()
        );
        let started = Instant::now();

        match self.backend.recognize(image, options).await {
            Ok(raw) => {
                let result = normalize(raw, started.elapsed(), options.collapse_whitespace);
                debug!(
                    "{} backend returned {} chars, confidence {:.1}, {}ms",
                    self.backend.name(),
                    result.text.chars().count(),
                    result.confidence,
                    result.duration_ms
                );
                Ok(result)
            }
            Err(e) => {
                warn!("{} backend failed: {}", self.backend.name(), e);
                Err(e)
            }
        }
    }
}
