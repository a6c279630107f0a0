use crate::error::PipelineError;
use crate::models::{Document, InvalidReason, SourceDocument, Verdict};
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NormalizerConfig {
    pub min_chars: usize,
    pub min_alpha_tokens: usize,
    pub min_alpha_ratio: f32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            min_chars: 100,
            min_alpha_tokens: 50,
            min_alpha_ratio: 0.5,
        }
    }
}

impl NormalizerConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.min_alpha_ratio) {
            return Err(PipelineError::Config(format!(
                "min_alpha_ratio must be within [0, 1], got {}",
                self.min_alpha_ratio
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedText {
    pub text: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone)]
pub struct TextNormalizer {
    config: NormalizerConfig,
    horizontal_space: Regex,
    paragraph_gap: Regex,
}

impl TextNormalizer {
    pub fn new(config: NormalizerConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            horizontal_space: Regex::new(r"[ \t]+")?,
            paragraph_gap: Regex::new(r"\n{3,}")?,
        })
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn normalize(&self, raw_text: &str) -> NormalizedText {
        let canonical = canonicalize(raw_text);
        let collapsed = self.horizontal_space.replace_all(&canonical, " ");
        let trimmed_lines = collapsed
            .lines()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n");
        let text = self
            .paragraph_gap
            .replace_all(&trimmed_lines, "\n\n")
            .trim()
            .to_string();

        let verdict = self.verdict(&text);
        NormalizedText { text, verdict }
    }

    pub fn normalize_document(&self, source: SourceDocument) -> Document {
        let normalized = self.normalize(&source.raw_text);
        Document::new(source, normalized.text, normalized.verdict)
    }

    fn verdict(&self, text: &str) -> Verdict {
        if text.is_empty() {
            return Verdict::Invalid(InvalidReason::Empty);
        }

        if text.chars().count() < self.config.min_chars {
            return Verdict::Invalid(InvalidReason::TooShort);
        }

        let (alpha_tokens, total_tokens) = token_counts(text);
        let ratio = if total_tokens == 0 {
            0.0
        } else {
            alpha_tokens as f32 / total_tokens as f32
        };

        if alpha_tokens < self.config.min_alpha_tokens || ratio < self.config.min_alpha_ratio {
            return Verdict::Invalid(InvalidReason::LowTextDensity);
        }

        Verdict::Valid
    }
}

fn token_counts(text: &str) -> (usize, usize) {
    text.unicode_words().fold((0, 0), |(alpha, total), word| {
        let letters = word.chars().filter(|c| c.is_alphabetic()).count();
        let is_alpha = letters * 2 > word.chars().count();
        (alpha + usize::from(is_alpha), total + 1)
    })
}

fn canonicalize(raw_text: &str) -> String {
    let mut output = String::with_capacity(raw_text.len());
    let mut chars = raw_text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                output.push('\n');
            }
            '\n' | '\u{000c}' | '\u{2028}' | '\u{2029}' => output.push('\n'),
            '\t' => output.push('\t'),
            '\u{00a0}' | '\u{2000}'..='\u{200a}' | '\u{202f}' | '\u{205f}' | '\u{3000}' => {
                output.push(' ')
            }
            '\u{00ad}' | '\u{200b}'..='\u{200d}' | '\u{2060}' | '\u{feff}' => {}
            '\u{fb00}' => output.push_str("ff"),
            '\u{fb01}' => output.push_str("fi"),
            '\u{fb02}' => output.push_str("fl"),
            '\u{fb03}' => output.push_str("ffi"),
            '\u{fb04}' => output.push_str("ffl"),
            '\u{2018}' | '\u{2019}' | '\u{201a}' | '\u{2032}' => output.push('\''),
            '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{2033}' => output.push('"'),
            '\u{2010}'..='\u{2015}' | '\u{2212}' => output.push('-'),
            '\u{2026}' => output.push_str("..."),
            other if other.is_control() => {}
            other => output.push(other),
        }
    }

    output
}
