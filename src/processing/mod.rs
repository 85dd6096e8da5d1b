//! Document processing: text extraction, section detection and chunking.
//!
//! A source document is read into a single text stream, split into labelled
//! sections by heading detection, and each retained section is cut into
//! overlapping word windows. Chunk indices run across the whole document, not
//! per section.

use std::path::Path;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::NewChunk;

/// Words-to-tokens factor used for every token estimate.
pub const TOKENS_PER_WORD: f64 = 1.33;

/// Label of the text that precedes the first detected heading.
pub const HEADER_SECTION: &str = "Header";

/// Label used when no section could be detected at all.
pub const FULL_SECTION: &str = "Full";

/// Sections that are never chunked.
const DROPPED_SECTIONS: [&str; 3] = ["References", "Acknowledgements", "Appendix"];

/// Ordered heading patterns; the first match wins.
const SECTION_PATTERNS: [(&str, &str); 15] = [
    (r"^\s*abstract\s*$", "Abstract"),
    (r"^\s*\d*\.?\s*introduction\s*$", "Introduction"),
    (r"^\s*\d*\.?\s*related\s+work\s*$", "Related Work"),
    (r"^\s*\d*\.?\s*background\s*$", "Background"),
    (r"^\s*\d*\.?\s*method(?:s|ology)?\s*$", "Method"),
    (r"^\s*\d*\.?\s*(?:our\s+)?approach\s*$", "Method"),
    (
        r"^\s*\d*\.?\s*(?:proposed\s+)?(?:framework|model|system|architecture)\s*$",
        "Method",
    ),
    (
        r"^\s*\d*\.?\s*experiment(?:s|al\s+(?:setup|results))?\s*$",
        "Experiments",
    ),
    (
        r"^\s*\d*\.?\s*(?:results?(?:\s+and\s+discussion)?|evaluation)\s*$",
        "Results",
    ),
    (r"^\s*\d*\.?\s*discussion\s*$", "Discussion"),
    (r"^\s*\d*\.?\s*conclusions?\s*$", "Conclusion"),
    (r"^\s*\d*\.?\s*(?:future\s+work|limitations)\s*$", "Conclusion"),
    (r"^\s*\d*\.?\s*acknowledge?ments?\s*$", "Acknowledgements"),
    (r"^\s*references\s*$", "References"),
    (r"^\s*\d*\.?\s*(?:appendix|supplementary)", "Appendix"),
];

/// Errors that can occur during document processing.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// A heading pattern failed to compile
    #[error("Invalid section pattern: {0}")]
    InvalidPattern(String),

    /// The document could not be read
    #[error("Failed to read document: {0}")]
    Io(String),

    /// The document could not be parsed
    #[error("Text extraction failed: {0}")]
    Extraction(String),
}

/// Result type for processing operations.
pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// A labelled span of document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: &'static str,
    pub text: String,
}

/// Compiled heading patterns.
#[derive(Debug, Clone)]
pub struct SectionDetector {
    patterns: Vec<(Regex, &'static str)>,
}

impl SectionDetector {
    pub fn new() -> ProcessingResult<Self> {
        let patterns = SECTION_PATTERNS
            .iter()
            .map(|(pattern, name)| {
                Regex::new(pattern)
                    .map(|re| (re, *name))
                    .map_err(|e| ProcessingError::InvalidPattern(format!("{}: {}", pattern, e)))
            })
            .collect::<ProcessingResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Return the section a heading line opens, if it is one.
    ///
    /// The line is trimmed and lower-cased; lines shorter than 3 or longer than
    /// 80 characters are never headings.
    pub fn detect(&self, line: &str) -> Option<&'static str> {
        let clean = line.trim().to_lowercase();
        let len = clean.chars().count();
        if !(3..=80).contains(&len) {
            return None;
        }
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(&clean))
            .map(|(_, name)| *name)
    }

    /// Split text into sections on detected headings.
    ///
    /// Heading lines themselves are not part of any section. Empty sections
    /// are skipped.
    pub fn split_sections(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut current = HEADER_SECTION;
        let mut buffer: Vec<&str> = Vec::new();

        for line in text.lines() {
            match self.detect(line) {
                Some(next) => {
                    push_section(&mut sections, current, &buffer);
                    current = next;
                    buffer.clear();
                }
                None => buffer.push(line),
            }
        }
        push_section(&mut sections, current, &buffer);

        sections
    }
}

fn push_section(sections: &mut Vec<Section>, name: &'static str, lines: &[&str]) {
    let text = lines.join("\n");
    let text = text.trim();
    if !text.is_empty() {
        sections.push(Section {
            name,
            text: text.to_string(),
        });
    }
}

/// Estimated token count of `word_count` words.
pub fn estimate_tokens(word_count: usize) -> usize {
    (word_count as f64 * TOKENS_PER_WORD) as usize
}

fn tokens_to_words(tokens: usize) -> usize {
    (tokens as f64 / TOKENS_PER_WORD) as usize
}

/// Cut text into overlapping word windows.
///
/// # Arguments
/// * `text` - Input text, split on whitespace
/// * `max_tokens` - Window size in estimated tokens
/// * `overlap_tokens` - Overlap between consecutive windows in estimated tokens
///
/// # Returns
/// `(window_text, word_count)` pairs in order. The final window may be shorter
/// than the rest.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<(String, usize)> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let max_words = tokens_to_words(max_tokens).max(1);
    let overlap_words = tokens_to_words(overlap_tokens);
    let step = max_words.saturating_sub(overlap_words).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max_words).min(words.len());
        windows.push((words[start..end].join(" "), end - start));
        if end >= words.len() {
            break;
        }
        start += step;
    }
    windows
}

/// Read a document into one text stream.
///
/// PDFs go through `pdf_extract` on the blocking pool; anything else is read
/// as UTF-8 text.
pub async fn extract_text(path: &Path) -> ProcessingResult<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ProcessingError::Io(format!("{}: {}", path.display(), e)))?;

    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| ProcessingError::Extraction(format!("Task join error: {}", e)))?
            .map_err(|e| ProcessingError::Extraction(e.to_string()))
    } else {
        String::from_utf8(bytes).map_err(|e| ProcessingError::Extraction(e.to_string()))
    }
}

/// Turns documents into ordered chunks.
#[derive(Debug, Clone)]
pub struct DocumentProcessor {
    detector: SectionDetector,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl DocumentProcessor {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> ProcessingResult<Self> {
        Ok(Self {
            detector: SectionDetector::new()?,
            max_tokens,
            overlap_tokens,
        })
    }

    pub fn detector(&self) -> &SectionDetector {
        &self.detector
    }

    /// Chunk already-extracted text.
    ///
    /// Falls back to a single "Full" section if no section is found. Returns
    /// an empty list for blank text.
    pub fn process_text(&self, text: &str) -> Vec<NewChunk> {
        let mut sections = self.detector.split_sections(text);
        if sections.is_empty() {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            sections.push(Section {
                name: FULL_SECTION,
                text: trimmed.to_string(),
            });
        }

        let mut chunks = Vec::new();
        for section in sections
            .iter()
            .filter(|s| !DROPPED_SECTIONS.contains(&s.name))
        {
            for (text, words) in chunk_text(&section.text, self.max_tokens, self.overlap_tokens) {
                chunks.push(NewChunk {
                    section: section.name.to_string(),
                    chunk_index: chunks.len(),
                    text,
                    token_count: estimate_tokens(words),
                });
            }
        }

        debug!(
            sections = sections.len(),
            chunks = chunks.len(),
            "Processed document text"
        );
        chunks
    }

    /// Extract and chunk a document.
    ///
    /// An unreadable document is logged and yields no chunks.
    pub async fn process_document(&self, path: &Path) -> Vec<NewChunk> {
        match extract_text(path).await {
            Ok(text) => self.process_text(&text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not extract document text");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn processor(max_tokens: usize, overlap_tokens: usize) -> DocumentProcessor {
        DocumentProcessor::new(max_tokens, overlap_tokens).unwrap()
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_detect_headings() {
        let detector = SectionDetector::new().unwrap();
        assert_eq!(detector.detect("Abstract"), Some("Abstract"));
        assert_eq!(detector.detect("1. Introduction"), Some("Introduction"));
        assert_eq!(detector.detect("  3 Our Approach  "), Some("Method"));
        assert_eq!(detector.detect("Proposed Framework"), Some("Method"));
        assert_eq!(detector.detect("4. Experimental Setup"), Some("Experiments"));
        assert_eq!(detector.detect("Results and Discussion"), Some("Results"));
        assert_eq!(detector.detect("Limitations"), Some("Conclusion"));
        assert_eq!(detector.detect("Acknowledgments"), Some("Acknowledgements"));
        assert_eq!(detector.detect("REFERENCES"), Some("References"));
        assert_eq!(detector.detect("A. Appendix: proofs"), None);
        assert_eq!(detector.detect("Appendix A: proofs"), Some("Appendix"));
    }

    #[test]
    fn test_detect_rejects_short_long_and_prose() {
        let detector = SectionDetector::new().unwrap();
        assert_eq!(detector.detect("ab"), None);
        assert_eq!(detector.detect(&"introduction ".repeat(10)), None);
        assert_eq!(
            detector.detect("In this introduction we describe the method"),
            None
        );
    }

    #[test]
    fn test_split_sections_labels_header_and_skips_empty() {
        let detector = SectionDetector::new().unwrap();
        let text = "A Great Paper\nAlice\nAbstract\n\nIntroduction\nWe study things.\nMore.";
        let sections = detector.split_sections(text);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name, HEADER_SECTION);
        assert_eq!(sections[0].text, "A Great Paper\nAlice");
        assert_eq!(sections[1].name, "Introduction");
        assert_eq!(sections[1].text, "We study things.\nMore.");
    }

    #[test]
    fn test_chunk_text_window_arithmetic() {
        // 100 tokens -> 75 words, 20 tokens -> 15 words, stride 60
        let windows = chunk_text(&words(200), 100, 20);
        let sizes: Vec<usize> = windows.iter().map(|(_, n)| *n).collect();
        assert_eq!(sizes, vec![75, 75, 75, 20]);
        assert!(windows[1].0.starts_with("w60 "));
        assert!(windows[3].0.ends_with("w199"));
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let windows = chunk_text(&words(500), 100, 20);
        for pair in windows.windows(2) {
            let first: Vec<&str> = pair[0].0.split(' ').collect();
            let second: Vec<&str> = pair[1].0.split(' ').collect();
            assert!(first.contains(&second[0]), "windows should share words");
        }
    }

    #[test]
    fn test_chunk_text_short_and_empty() {
        assert!(chunk_text("   ", 800, 100).is_empty());
        let windows = chunk_text("just three words", 800, 100);
        assert_eq!(windows, vec![("just three words".to_string(), 3)]);
    }

    #[test]
    fn test_overlap_larger_than_window_still_advances() {
        // 3-word windows with stride 1
        let windows = chunk_text(&words(10), 4, 40);
        assert_eq!(windows.len(), 8);
    }

    #[test]
    fn test_chunk_indices_are_global_and_dropped_sections_skipped() {
        let text = format!(
            "Title line\nIntroduction\n{}\nReferences\n{}\nConclusion\n{}",
            words(100),
            words(100),
            words(10)
        );
        let chunks = processor(100, 20).process_text(&text);

        let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, (0..chunks.len()).collect::<Vec<_>>());
        assert!(chunks.iter().all(|c| c.section != "References"));
        assert_eq!(chunks[0].section, HEADER_SECTION);
        assert_eq!(chunks.last().map(|c| c.section.as_str()), Some("Conclusion"));
    }

    #[test]
    fn test_token_count_uses_word_factor() {
        let chunks = processor(800, 100).process_text("one two three four five six");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 7);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(processor(800, 100).process_text(" \n\n ").is_empty());
    }

    #[tokio::test]
    async fn test_process_document_reads_text_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.txt");
        std::fs::write(&path, "Abstract\nWe propose a thing.\nMethod\nIt works.").unwrap();

        let chunks = processor(800, 100).process_document(&path).await;
        let sections: Vec<&str> = chunks.iter().map(|c| c.section.as_str()).collect();
        assert_eq!(sections, vec!["Abstract", "Method"]);
    }

    #[tokio::test]
    async fn test_unreadable_document_yields_no_chunks() {
        let dir = TempDir::new().unwrap();
        let chunks = processor(800, 100)
            .process_document(&dir.path().join("missing.pdf"))
            .await;
        assert!(chunks.is_empty());

        let broken = dir.path().join("broken.pdf");
        std::fs::write(&broken, b"not a pdf").unwrap();
        assert!(processor(800, 100).process_document(&broken).await.is_empty());
    }
}
