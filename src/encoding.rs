use std::fmt;

use anyhow::{Result, anyhow};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};

const BINARY_CHECK_BYTES: usize = 4096;
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Override,
    Bom,
    Detector,
    AssumedUtf8,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncodingSource::Override => "override",
            EncodingSource::Bom => "bom",
            EncodingSource::Detector => "detector",
            EncodingSource::AssumedUtf8 => "assumed-utf8",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct EncodingDecision {
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
    pub has_bom: bool,
}

/// Document text together with what is needed to write it back the way it
/// was stored.
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub had_errors: bool,
    pub decision: EncodingDecision,
}

#[derive(Debug, Clone)]
pub struct EncodedText {
    pub bytes: Vec<u8>,
    pub had_errors: bool,
}

impl DecodedText {
    /// Encodes `text` with the encoding this document was read with,
    /// restoring the byte order mark when the original carried one.
    pub fn encode(&self, text: &str) -> EncodedText {
        let encoding = self.decision.encoding;
        let mut bytes = Vec::with_capacity(text.len() + 3);
        if self.decision.has_bom {
            bytes.extend_from_slice(bom_bytes(encoding));
        }

        // encoding_rs only encodes UTF-16 as UTF-8, so those are written by hand.
        if encoding == UTF_16LE {
            bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
            return EncodedText {
                bytes,
                had_errors: false,
            };
        }
        if encoding == UTF_16BE {
            bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
            return EncodedText {
                bytes,
                had_errors: false,
            };
        }

        let (encoded, _, had_errors) = encoding.encode(text);
        bytes.extend_from_slice(&encoded);
        EncodedText { bytes, had_errors }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncodingStrategy {
    override_encoding: Option<&'static Encoding>,
    override_label: Option<String>,
}

impl EncodingStrategy {
    pub fn new(override_label: Option<&str>) -> Result<Self> {
        let Some(label) = override_label else {
            return Ok(Self::default());
        };
        let trimmed = label.trim();
        let encoding = Encoding::for_label(trimmed.as_bytes())
            .ok_or_else(|| anyhow!("unknown encoding override '{trimmed}'"))?;
        Ok(Self {
            override_encoding: Some(encoding),
            override_label: Some(trimmed.to_string()),
        })
    }

    pub fn describe(&self) -> String {
        if let (Some(label), Some(enc)) = (&self.override_label, self.override_encoding) {
            format!("override '{}' ({})", label, enc.name())
        } else {
            "auto-detect (BOM → UTF-8 → detector)".to_string()
        }
    }

    pub fn decide(&self, bytes: &[u8]) -> EncodingDecision {
        // A byte order mark always wins; encoding_rs would honour it while
        // decoding anyway, so the decision has to agree with it.
        if let Some((encoding, _)) = Encoding::for_bom(bytes) {
            return EncodingDecision {
                encoding,
                source: EncodingSource::Bom,
                has_bom: true,
            };
        }

        if let Some(encoding) = self.override_encoding {
            return EncodingDecision {
                encoding,
                source: EncodingSource::Override,
                has_bom: false,
            };
        }

        detect_without_bom(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> DecodedText {
        let decision = self.decide(bytes);
        let (text, had_errors) = if decision.has_bom {
            let (cow, _, had_errors) = decision.encoding.decode(bytes);
            (cow.into_owned(), had_errors)
        } else {
            let (cow, had_errors) = decision.encoding.decode_without_bom_handling(bytes);
            (cow.into_owned(), had_errors)
        };
        DecodedText {
            text,
            had_errors,
            decision,
        }
    }
}

/// NUL bytes near the start mark a file as binary, unless a UTF-16 byte
/// order mark explains them.
pub fn looks_binary(bytes: &[u8]) -> bool {
    if matches!(Encoding::for_bom(bytes), Some((enc, _)) if enc == UTF_16LE || enc == UTF_16BE) {
        return false;
    }
    let window = &bytes[..bytes.len().min(BINARY_CHECK_BYTES)];
    window.contains(&0)
}

fn detect_without_bom(bytes: &[u8]) -> EncodingDecision {
    if std::str::from_utf8(bytes).is_ok() {
        return EncodingDecision {
            encoding: UTF_8,
            source: EncodingSource::AssumedUtf8,
            has_bom: false,
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    EncodingDecision {
        encoding,
        source: EncodingSource::Detector,
        has_bom: false,
    }
}

fn bom_bytes(encoding: &'static Encoding) -> &'static [u8] {
    if encoding == UTF_8 {
        UTF8_BOM
    } else if encoding == UTF_16LE {
        UTF16LE_BOM
    } else if encoding == UTF_16BE {
        UTF16BE_BOM
    } else {
        &[]
    }
}
