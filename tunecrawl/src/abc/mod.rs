//! ABC notation tune extraction.
//!
//! A document may contain any number of tunes, each introduced by an
//! `X:` reference header. Header lines (`T:`, `K:`, `M:`, ...) carry the
//! tune metadata; everything else is the tune body, from which a MIDI
//! pitch sequence is derived.
//!
//! The extractor sits behind the [`TuneExtractor`] trait so the parser
//! worker can be tested with a canned implementation and the real
//! extraction engine stays replaceable.

mod notes;

pub use notes::pitches_from_body;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tunes larger than this are header-scanned only (symphonies, dumps).
const MAX_TUNE_CHARS: usize = 10_000;

/// Line-count cap for a single tune.
const MAX_TUNE_LINES: usize = 300;

/// Multi-voice scores beyond this are skipped.
const MAX_VOICES: usize = 4;

/// One tune as extracted from a document: ABC headers, body, and the
/// comma-separated MIDI pitch string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTune {
    pub title: String,
    pub reference_number: Option<String>,
    pub composer: Option<String>,
    pub origin: Option<String>,
    pub area: Option<String>,
    pub meter: Option<String>,
    pub unit_note_length: Option<String>,
    pub tempo: Option<String>,
    pub parts: Option<String>,
    pub transcription: Option<String>,
    pub notes: Option<String>,
    pub group: Option<String>,
    pub history: Option<String>,
    pub key: Option<String>,
    pub rhythm: Option<String>,
    pub book: Option<String>,
    pub discography: Option<String>,
    pub source: Option<String>,
    pub instruction: Option<String>,
    pub tune_body: String,
    pub pitches: String,
}

/// Turns a fetched document into tunes. Pure: no global state, no caches
/// kept across calls, safe to run in parallel across worker processes.
pub trait TuneExtractor: Send + Sync {
    fn extract(&self, document: &[u8]) -> Vec<ParsedTune>;
}

/// The default ABC extractor.
pub struct AbcExtractor {
    header_re: Regex,
}

impl AbcExtractor {
    pub fn new() -> Self {
        Self {
            header_re: Regex::new(r"^([A-Z]):\s*(.*)$").expect("header regex is valid"),
        }
    }

    /// Splits a document into tune blocks at `X:` headers.
    fn split_tunes<'a>(&self, text: &'a str) -> Vec<Vec<&'a str>> {
        let mut blocks: Vec<Vec<&str>> = Vec::new();
        let mut current: Option<Vec<&str>> = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("X:") {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                current = Some(vec![trimmed]);
            } else if let Some(block) = current.as_mut() {
                block.push(trimmed);
            }
        }
        if let Some(block) = current.take() {
            blocks.push(block);
        }
        blocks
    }

    fn parse_tune(&self, lines: &[&str]) -> Option<ParsedTune> {
        let raw_len: usize = lines.iter().map(|l| l.len() + 1).sum();
        if raw_len > MAX_TUNE_CHARS {
            warn!(chars = raw_len, "Skipping tune: raw data too large");
            return None;
        }
        if lines.len() > MAX_TUNE_LINES {
            warn!(lines = lines.len(), "Skipping tune: too many lines");
            return None;
        }
        let voices = lines.iter().filter(|l| l.starts_with("V:")).count();
        if voices > MAX_VOICES {
            warn!(voices, "Skipping tune: too many voices");
            return None;
        }

        let mut tune = ParsedTune {
            title: "Untitled".to_string(),
            ..Default::default()
        };
        let mut body_lines: Vec<&str> = Vec::new();

        for line in lines {
            if line.is_empty() {
                continue;
            }
            match self.header_re.captures(line) {
                Some(caps) => {
                    let key = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                    // Header values may carry trailing `%` comments.
                    let value = caps
                        .get(2)
                        .map(|m| m.as_str())
                        .unwrap_or("")
                        .split('%')
                        .next()
                        .unwrap_or("")
                        .trim()
                        .to_string();
                    apply_header(&mut tune, key, value);
                }
                None => body_lines.push(line),
            }
        }

        let tune_body = body_lines.join("\n");
        let pitch_values = pitches_from_body(&tune_body);
        tune.pitches = pitch_values
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        tune.tune_body = tune_body;
        Some(tune)
    }
}

impl Default for AbcExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TuneExtractor for AbcExtractor {
    fn extract(&self, document: &[u8]) -> Vec<ParsedTune> {
        let text = String::from_utf8_lossy(document);
        self.split_tunes(&text)
            .iter()
            .filter_map(|block| self.parse_tune(block))
            // A tune without a body contributes nothing downstream.
            .filter(|tune| !tune.tune_body.is_empty())
            .collect()
    }
}

/// Maps one ABC header line onto the tune. First `T:` wins; later titles
/// are alternate names.
fn apply_header(tune: &mut ParsedTune, key: &str, value: String) {
    match key {
        "X" => tune.reference_number = Some(value),
        "T" => {
            if tune.title == "Untitled" {
                tune.title = value;
            }
        }
        "C" => tune.composer = Some(value),
        "O" => tune.origin = Some(value),
        "A" => tune.area = Some(value),
        "M" => tune.meter = Some(value),
        "L" => tune.unit_note_length = Some(value),
        "Q" => tune.tempo = Some(value),
        "P" => tune.parts = Some(value),
        "Z" => tune.transcription = Some(value),
        "N" => tune.notes = Some(value),
        "G" => tune.group = Some(value),
        "H" => tune.history = Some(value),
        "K" => tune.key = Some(value),
        "R" => tune.rhythm = Some(value),
        "B" => tune.book = Some(value),
        "D" => tune.discography = Some(value),
        "S" => tune.source = Some(value),
        "I" => tune.instruction = Some(value),
        _ => {}
    }
}
