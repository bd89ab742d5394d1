//! Formula normalization: canonicalize math notation in transcribed text.
//!
//! The transcription model is asked for LaTeX, but it habitually emits the
//! Unicode symbols it saw on the page — `π`, `√`, `≠` — and sprinkles
//! Markdown emphasis inside formulas. This pass rewrites each inline math
//! region (a single matched pair of `$` delimiters) into proper LaTeX
//! macros and strips stray `*` markers. Text outside math regions is left
//! untouched.
//!
//! Regions are matched non-greedily and may span line boundaries. Nested
//! or unmatched `$` delimiters are undefined input; the pass does not try
//! to repair them.
//!
//! The transform is idempotent: every rewrite target is absent from its own
//! output, so re-running the pass is a no-op.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static MATH_REGION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\$(.+?)\$").unwrap());
static SQRT_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"√(\d+)").unwrap());
static SQRT_BRACED: Lazy<Regex> = Lazy::new(|| Regex::new(r"√\{([^}]+)\}").unwrap());

/// Rewrite every `$…$` region of `input` into canonical LaTeX.
///
/// Substitutions inside a region, in order: `π` → `\pi`,
/// `√<digits>` → `\sqrt{<digits>}`, `√{…}` → `\sqrt{…}`, `≠` → `\neq`,
/// and every `*` is removed.
pub fn normalize_formulas(input: &str) -> String {
    MATH_REGION
        .replace_all(input, |caps: &Captures<'_>| {
            format!("${}$", rewrite_math(&caps[1]))
        })
        .to_string()
}

fn rewrite_math(content: &str) -> String {
    let content = content.replace('π', "\\pi");
    let content = SQRT_DIGITS.replace_all(&content, "\\sqrt{${1}}");
    let content = SQRT_BRACED.replace_all(&content, "\\sqrt{${1}}");
    let content = content.replace('≠', "\\neq");
    content.replace('*', "")
}
