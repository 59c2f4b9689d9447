// charsense/src/oracle/signature.rs
//
// Default signature oracle.
//
// Candidate sources, scored independently and then ranked:
//   BOM        — byte-order marks are conclusive (confidence 100)
//   UTF-8      — valid vs. invalid multi-byte sequence counts
//   UTF-16     — BOM-less wide text, judged on the first 30 bytes
//   Legacy     — chardetng statistical guess over the single/multi-byte
//                legacy encodings (skipped when the text contains NULs)
//
// Confidence table for UTF-8 (valid = well-formed multi-byte sequences):
//   BOM, no invalid                 100
//   BOM, valid > 10 × invalid        80
//   > 3 valid, no invalid           100
//   some valid, no invalid           80
//   pure ASCII                       15
//   valid > 10 × invalid             25

use std::borrow::Cow;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use tracing::trace;

use super::{markup, Oracle, OracleConfig};
use crate::error::{
    OracleError, OracleInitError, ERR_INVALID_CONFIG, ERR_INVALID_TLD, ERR_TARGET_TOO_LARGE,
    ERR_UNKNOWN_LABEL,
};
use crate::events::{Match, MAX_CONFIDENCE};

const UTF_32LE: &str = "UTF-32LE";
const UTF_32BE: &str = "UTF-32BE";

const WIDE_WINDOW:      usize = 30;
const WIDE_START:       i32   = 10;
const WIDE_STEP:        i32   = 10;

const LEGACY_ASCII:     u8 = 40;
const LEGACY_CONFIDENT: u8 = 70;
const LEGACY_WEAK:      u8 = 30;

const DECLARED_BOOST:   u8 = 5;

pub struct SignatureOracle {
    max_input_len: usize,
    strip_markup:  bool,
    tld:           Option<Vec<u8>>,
    declared:      Option<&'static Encoding>,
    candidates:    Vec<Match>,
}

impl SignatureOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleInitError> {
        if config.max_input_len == 0 {
            return Err(OracleInitError::new(ERR_INVALID_CONFIG, "max_input_len must be positive"));
        }

        let declared = match config.declared_encoding.as_deref() {
            Some(label) => Some(Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
                OracleInitError::new(ERR_UNKNOWN_LABEL, format!("unknown charset label {label:?}"))
            })?),
            None => None,
        };

        let tld = config.tld_hint.as_deref().map(parse_tld).transpose()?;

        Ok(Self {
            max_input_len: config.max_input_len,
            strip_markup:  config.strip_markup,
            tld,
            declared,
            candidates:    Vec::new(),
        })
    }

    fn score(&self, raw: &[u8]) -> Vec<Match> {
        let mut candidates = match sniff_bom(raw) {
            Some(Bom::Utf8)       => match utf8_match(&raw[3..], true) {
                Some(m) => vec![m],
                // a UTF-8 BOM on a body that isn't UTF-8 proves nothing
                None    => self.score_unmarked(&raw[3..]),
            },
            Some(Bom::Wide(name)) => vec![Match::new(name, MAX_CONFIDENCE)],
            None                  => self.score_unmarked(raw),
        };

        if let Some(declared) = self.declared {
            if let Some(m) = candidates.iter_mut().find(|m| m.encoding() == Some(declared)) {
                m.confidence = m.confidence.saturating_add(DECLARED_BOOST).min(MAX_CONFIDENCE);
            }
        }

        // Stable: equal confidences keep the order they were scored in.
        candidates.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        candidates
    }

    fn score_unmarked(&self, raw: &[u8]) -> Vec<Match> {
        let text = if self.strip_markup { markup::strip_tags(raw) } else { Cow::Borrowed(raw) };

        let mut out = Vec::new();
        out.extend(utf8_match(&text, false));
        out.extend(wide_match(raw, true));
        out.extend(wide_match(raw, false));
        if !text.contains(&0) {
            out.push(self.legacy_match(&text));
        }
        out
    }

    fn legacy_match(&self, text: &[u8]) -> Match {
        let mut detector = EncodingDetector::new();
        let saw_non_ascii = detector.feed(text, true);
        let (encoding, confident) = detector.guess_assess(self.tld.as_deref(), false);

        let confidence = if !saw_non_ascii {
            LEGACY_ASCII
        } else if confident {
            LEGACY_CONFIDENT
        } else {
            LEGACY_WEAK
        };
        Match::new(encoding.name(), confidence)
    }
}

impl Oracle for SignatureOracle {
    fn set_analysis_target(&mut self, bytes: &[u8]) -> Result<(), OracleError> {
        self.candidates.clear();
        if bytes.len() > self.max_input_len {
            return Err(OracleError::new(
                ERR_TARGET_TOO_LARGE,
                format!("target of {} bytes exceeds limit of {}", bytes.len(), self.max_input_len),
            ));
        }
        self.candidates = self.score(bytes);
        trace!(len = bytes.len(), candidates = self.candidates.len(), "scored analysis target");
        Ok(())
    }

    fn best_match(&self) -> Option<Match> {
        self.candidates.first().cloned()
    }

    fn all_matches(&self) -> Vec<Match> {
        self.candidates.clone()
    }
}

// ── Byte-order marks ──────────────────────────────────────────────────────────

enum Bom {
    Utf8,
    Wide(&'static str),
}

fn sniff_bom(raw: &[u8]) -> Option<Bom> {
    // UTF-32LE first: its BOM starts with the UTF-16LE one.
    if raw.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) { return Some(Bom::Wide(UTF_32LE)); }
    if raw.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) { return Some(Bom::Wide(UTF_32BE)); }
    if raw.starts_with(&[0xEF, 0xBB, 0xBF])       { return Some(Bom::Utf8); }
    if raw.starts_with(&[0xFF, 0xFE])             { return Some(Bom::Wide(UTF_16LE.name())); }
    if raw.starts_with(&[0xFE, 0xFF])             { return Some(Bom::Wide(UTF_16BE.name())); }
    None
}

// ── UTF-8 ─────────────────────────────────────────────────────────────────────

/// (valid multi-byte sequences, invalid bytes). A sequence cut off by the end
/// of the buffer counts as neither.
fn utf8_counts(bytes: &[u8]) -> (usize, usize) {
    let (mut valid, mut invalid) = (0usize, 0usize);
    let mut i = 0;

    while i < bytes.len() {
        let trail = match bytes[i] {
            0x00..=0x7F => { i += 1; continue; }
            0xC0..=0xDF => 1,
            0xE0..=0xEF => 2,
            0xF0..=0xF7 => 3,
            _           => { invalid += 1; i += 1; continue; }
        };

        let tail = &bytes[i + 1..bytes.len().min(i + 1 + trail)];
        match tail.iter().position(|b| !(0x80..=0xBF).contains(b)) {
            Some(_) => { invalid += 1; i += 1; }
            None if tail.len() < trail => break,
            None => { valid += 1; i += 1 + trail; }
        }
    }
    (valid, invalid)
}

fn utf8_match(text: &[u8], has_bom: bool) -> Option<Match> {
    let (valid, invalid) = utf8_counts(text);
    let confidence = if has_bom && invalid == 0 {
        100
    } else if has_bom && valid > invalid * 10 {
        80
    } else if valid > 3 && invalid == 0 {
        100
    } else if valid > 0 && invalid == 0 {
        80
    } else if valid == 0 && invalid == 0 {
        15
    } else if valid > invalid * 10 {
        25
    } else {
        0
    };
    (confidence > 0).then(|| Match::new(UTF_8.name(), confidence))
}

// ── BOM-less UTF-16 ───────────────────────────────────────────────────────────

fn wide_match(raw: &[u8], little_endian: bool) -> Option<Match> {
    let window = &raw[..raw.len().min(WIDE_WINDOW)];
    if window.len() < 4 {
        return None;
    }

    let mut confidence = WIDE_START;
    for pair in window.chunks_exact(2) {
        let unit = if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        };
        if unit == 0 {
            confidence -= WIDE_STEP;
        } else if (0x20..=0xFF).contains(&unit) || unit == 0x0A {
            confidence += WIDE_STEP;
        }
        confidence = confidence.clamp(0, MAX_CONFIDENCE as i32);
        if confidence == 0 || confidence == MAX_CONFIDENCE as i32 {
            break;
        }
    }

    let name = if little_endian { UTF_16LE.name() } else { UTF_16BE.name() };
    (confidence > WIDE_START).then(|| Match::new(name, confidence as u8))
}

// ── Config helpers ────────────────────────────────────────────────────────────

fn parse_tld(tld: &str) -> Result<Vec<u8>, OracleInitError> {
    let valid = !tld.is_empty()
        && tld.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if valid {
        Ok(tld.as_bytes().to_vec())
    } else {
        Err(OracleInitError::new(ERR_INVALID_TLD, format!("tld hint {tld:?} must be a lowercase label without dots")))
    }
}
