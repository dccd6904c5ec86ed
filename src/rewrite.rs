use std::borrow::Cow;

use anyhow::{Result, anyhow};
use regex::{Captures, Regex};

/// `[ ![[target]] ](destination)`: an external link whose text is an embed.
/// The destination is discarded; whitespace around the target is dropped.
const EMBED_LINK_PATTERN: &str = r"(?s)\[\s*!\[\[\s*([^\]]+?)\s*\]\]\s*\]\([^)]+?\)";

#[derive(Debug, Clone)]
pub struct EmbedLinkRewriter {
    regex: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite<'a> {
    pub text: Cow<'a, str>,
    pub replacements: usize,
}

impl Rewrite<'_> {
    pub fn changed(&self) -> bool {
        self.replacements > 0
    }
}

impl EmbedLinkRewriter {
    pub fn new() -> Result<Self> {
        let regex = Regex::new(EMBED_LINK_PATTERN)
            .map_err(|err| anyhow!("invalid embed link pattern: {err}"))?;
        Ok(Self { regex })
    }

    /// Replaces every wrapped embed with its canonical `![[target]]` form.
    /// With zero replacements the input is returned borrowed and untouched.
    pub fn rewrite<'a>(&self, text: &'a str) -> Rewrite<'a> {
        let mut replacements = 0usize;
        let rewritten = self.regex.replace_all(text, |caps: &Captures<'_>| {
            replacements += 1;
            format!("![[{}]]", caps[1].trim())
        });
        Rewrite {
            text: rewritten,
            replacements,
        }
    }
}
