//! Tesseract-backed recognition engine
//!
//! Requires libtesseract and libleptonica at build time; enabled with
//! the `tesseract` cargo feature.

use std::io::Cursor;

use ocrq_common::{Error, Result};

use super::{RecognitionEngine, TextSpan};

/// Recognition engine backed by a local Tesseract installation.
pub struct TesseractEngine {
    languages: String,
}

impl TesseractEngine {
    pub fn new(languages: &[String]) -> Self {
        let languages = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };
        Self { languages }
    }
}

impl RecognitionEngine for TesseractEngine {
    fn recognize(&self, image: &[u8]) -> Result<Vec<TextSpan>> {
        let _span = tracing::info_span!("engine.tesseract").entered();

        // Normalize whatever format arrived into PNG for leptonica
        let img = image::load_from_memory(image)
            .map_err(|e| Error::InvalidInput(format!("Failed to load image: {}", e)))?;

        let mut png_data = Vec::new();
        let mut cursor = Cursor::new(&mut png_data);
        img.write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(|e| Error::Internal(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, &self.languages)
            .map_err(|e| Error::Internal(format!("Failed to initialize Tesseract: {}", e)))?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| Error::Internal(format!("Failed to set image for OCR: {}", e)))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| Error::Internal(format!("OCR failed: {}", e)))?;

        let confidence = (lt.mean_text_conf() as f32 / 100.0).clamp(0.0, 1.0);

        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| TextSpan::new("", line, confidence))
            .collect())
    }
}
