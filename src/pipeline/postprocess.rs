//! Post-processing: deterministic cleanup of model output.
//!
//! Models sometimes disobey "no fences" instructions, emit Windows line
//! endings or leak invisible Unicode. These rules fix that without touching
//! content. They also cover the two checks the stages need beyond cleanup:
//! spotting refusals and turning section titles into object names.

use once_cell::sync::Lazy;
use regex::Regex;

/// Lower-case phrases that mark a refusal instead of real output.
pub const REFUSAL_PHRASES: &[&str] = &[
    "i am unable to",
    "i cannot fulfill",
    "i cannot answer",
    "as a large language model",
];

/// Maximum length of a sanitised section name.
pub const MAX_SECTION_NAME_LEN: usize = 100;

/// Apply every cleanup rule and trim the result.
///
/// Rules (in order):
/// 1. Strip an outer code fence (```` ```markdown ````, ```` ```json ````, bare ```` ``` ````)
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
pub fn tidy_markdown(input: &str) -> String {
    let s = strip_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip outer fences ───────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```$").unwrap());

/// Remove one outer code fence wrapping the whole text, if present.
pub fn strip_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 5: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Checks ───────────────────────────────────────────────────────────────────

/// The first refusal phrase found in `text`, case-insensitively.
pub fn refusal_phrase(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    REFUSAL_PHRASES
        .iter()
        .copied()
        .find(|phrase| lower.contains(phrase))
}

static RE_NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Object-name stem for a section title.
///
/// Lower-cases, replaces every run of characters outside `[a-z0-9]` with a
/// single `_`, trims `_` from both ends and caps the length. Returns an empty
/// string when nothing usable is left.
pub fn sanitize_section_name(title: &str) -> String {
    let lower = title.to_lowercase();
    let replaced = RE_NON_ALNUM.replace_all(&lower, "_");
    let mut name = replaced.trim_matches('_').to_string();
    // Only ASCII remains, so byte truncation is safe.
    name.truncate(MAX_SECTION_NAME_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_language_tagged_fence() {
        let input = "```markdown\n# Title\n\nBody\n```";
        assert_eq!(strip_fences(input), "# Title\n\nBody");
    }

    #[test]
    fn strips_json_fence() {
        let input = "```json\n[{\"section\":\"a\",\"content\":\"b\"}]\n```\n";
        assert_eq!(strip_fences(input), "[{\"section\":\"a\",\"content\":\"b\"}]");
    }

    #[test]
    fn leaves_inner_code_blocks_alone() {
        let input = "Intro\n\n```rust\nfn main() {}\n```\n\nOutro";
        assert_eq!(strip_fences(input), input);
    }

    #[test]
    fn tidy_normalises_whitespace_and_invisibles() {
        let input = "```\r\n# A  \r\n\r\n\r\n\r\n\r\nB\u{200B}\r\n```";
        assert_eq!(tidy_markdown(input), "# A\n\n\nB");
    }

    #[test]
    fn fence_only_output_is_empty() {
        assert_eq!(tidy_markdown("```markdown\n```"), "");
        assert_eq!(tidy_markdown("   \n  "), "");
    }

    #[test]
    fn refusals_are_detected_case_insensitively() {
        assert_eq!(
            refusal_phrase("Sorry, I Am Unable To process this."),
            Some("i am unable to")
        );
        assert_eq!(refusal_phrase("# Report\n\nAll good."), None);
    }

    #[test]
    fn section_names_are_sanitized() {
        assert_eq!(
            sanitize_section_name("1.1.2 Background and Motivation"),
            "1_1_2_background_and_motivation"
        );
        assert_eq!(sanitize_section_name("  ## Intro!! "), "intro");
        assert_eq!(sanitize_section_name("§§§"), "");
        assert_eq!(sanitize_section_name("Überblick"), "berblick");
    }

    #[test]
    fn section_names_are_truncated() {
        let long = "a".repeat(250);
        assert_eq!(sanitize_section_name(&long).len(), MAX_SECTION_NAME_LEN);
    }
}
