//! Recognition engine seam
//!
//! The engine is an opaque collaborator mapping raw image bytes to an
//! ordered sequence of recognized text spans. Engine construction can
//! be expensive, so a worker process builds one [`SharedEngine`] at
//! startup and passes it to every task; the underlying engine is
//! initialized on first use, exactly once, behind a one-time
//! initialization primitive, and the handle is read-only thereafter.

#[cfg(feature = "tesseract")]
pub mod tesseract;

use std::sync::Arc;

use once_cell::sync::OnceCell;

use ocrq_common::{Error, Result};

/// One recognized span, in engine-returned order.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    /// Engine-specific bounding box description (may be empty)
    pub bbox: String,
    pub text: String,
    pub confidence: f32,
}

impl TextSpan {
    pub fn new(bbox: impl Into<String>, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox: bbox.into(),
            text: text.into(),
            confidence,
        }
    }
}

/// Black-box text recognition interface. Engine-internal failures
/// surface as errors and are handled as per-file failures by the
/// worker.
pub trait RecognitionEngine: Send + Sync {
    fn recognize(&self, image: &[u8]) -> Result<Vec<TextSpan>>;
}

/// Concatenate recognized spans in engine order, newline-separated.
/// An empty result is an empty string, not an error.
pub fn join_spans(spans: &[TextSpan]) -> String {
    spans
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

type EngineFactory = Box<dyn Fn() -> Result<Box<dyn RecognitionEngine>> + Send + Sync>;

/// Process-wide engine handle with guarded lazy initialization.
///
/// Concurrent first use by multiple tasks initializes the engine
/// exactly once; afterwards every task reads the same immutable handle.
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<SharedEngineInner>,
}

struct SharedEngineInner {
    cell: OnceCell<Box<dyn RecognitionEngine>>,
    factory: EngineFactory,
}

impl SharedEngine {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn RecognitionEngine>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SharedEngineInner {
                cell: OnceCell::new(),
                factory: Box::new(factory),
            }),
        }
    }

    /// Wrap an engine that is already constructed.
    pub fn from_engine(engine: Box<dyn RecognitionEngine>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(engine);
        Self {
            inner: Arc::new(SharedEngineInner {
                cell,
                factory: Box::new(|| {
                    Err(Error::Internal(
                        "Engine factory invoked after eager construction".to_string(),
                    ))
                }),
            }),
        }
    }

    /// Get the initialized engine, initializing on first call.
    pub fn get(&self) -> Result<&dyn RecognitionEngine> {
        let engine = self.inner.cell.get_or_try_init(|| (self.inner.factory)())?;
        Ok(engine.as_ref())
    }
}

/// Development engine: treats the payload as UTF-8 text and returns one
/// span per non-empty line. Keeps the whole pipeline exercisable
/// without a system OCR installation.
pub struct PlainTextEngine;

impl RecognitionEngine for PlainTextEngine {
    fn recognize(&self, image: &[u8]) -> Result<Vec<TextSpan>> {
        let text = std::str::from_utf8(image)
            .map_err(|e| Error::InvalidInput(format!("Payload is not UTF-8 text: {}", e)))?;

        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| TextSpan::new("", line, 1.0))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_join_spans_preserves_engine_order() {
        let spans = vec![
            TextSpan::new("", "first", 0.9),
            TextSpan::new("", "second", 0.8),
        ];
        assert_eq!(join_spans(&spans), "first\nsecond");
    }

    #[test]
    fn test_join_spans_empty_is_empty_string() {
        assert_eq!(join_spans(&[]), "");
    }

    #[test]
    fn test_plain_text_engine_spans() {
        let spans = PlainTextEngine.recognize(b"Total: 100\n\nDue: 50\n").unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Total: 100");
        assert_eq!(spans[1].text, "Due: 50");
    }

    #[test]
    fn test_plain_text_engine_rejects_binary() {
        assert!(PlainTextEngine.recognize(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_shared_engine_initializes_once() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        let engine = SharedEngine::new(|| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(PlainTextEngine) as Box<dyn RecognitionEngine>)
        });

        engine.get().unwrap();
        engine.get().unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_engine_concurrent_first_use() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        let engine = SharedEngine::new(|| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(PlainTextEngine) as Box<dyn RecognitionEngine>)
        });

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let engine = engine.clone();
                scope.spawn(move || {
                    engine.get().unwrap().recognize(b"x").unwrap();
                });
            }
        });

        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }
}
