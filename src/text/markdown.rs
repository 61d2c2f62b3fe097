//! Markdown cleanup before synthesis
//!
//! Assistant replies are Markdown. Read verbatim, the markup is either noise
//! ("asterisk asterisk") or whole code listings, so it is stripped or replaced
//! with short spoken placeholders first.

use once_cell::sync::Lazy;
use regex::Regex;

/// Spoken in place of a fenced code block
pub const CODE_BLOCK_PLACEHOLDER: &str = "コード例";
/// Spoken in place of a horizontal rule
pub const RULE_PLACEHOLDER: &str = "区切り線";
/// Replaces list bullets
pub const LIST_BULLET: &str = "・";
/// Replaces table cell separators
pub const TABLE_SEPARATOR: &str = "、";

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[\s\S]*?```").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]*)`").unwrap());
static HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}[ \t]*(.+)$").unwrap());
static BOLD_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static BOLD_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.*?)__").unwrap());
static ITALIC_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\n]+?)\*").unwrap());
// Word characters around the underscores mean snake_case, not emphasis
static ITALIC_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^\w])_([^_\n]+?)_([^\w]|$)").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*[-*+][ \t]+(.+)$").unwrap());
static QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^>[ \t]*(.*)$").unwrap());
static EXTRA_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip Markdown syntax so the text reads naturally
pub fn clean_markdown(text: &str) -> String {
    let text = CODE_BLOCK.replace_all(text, CODE_BLOCK_PLACEHOLDER);
    let text = INLINE_CODE.replace_all(&text, "${1}");
    let text = HEADER.replace_all(&text, "${1}");
    let text = BOLD_STARS.replace_all(&text, "${1}");
    let text = BOLD_UNDERSCORES.replace_all(&text, "${1}");
    let text = ITALIC_STAR.replace_all(&text, "${1}");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "${1}${2}${3}");
    let text = LINK.replace_all(&text, "${1}");
    let text = LIST_ITEM.replace_all(&text, format!("{}${{1}}", LIST_BULLET).as_str());
    let text = QUOTE.replace_all(&text, "${1}");
    let text = text.replace('|', TABLE_SEPARATOR);
    let text = EXTRA_NEWLINES.replace_all(&text, "\n\n");
    let text = text.replace("---", RULE_PLACEHOLDER).replace("***", RULE_PLACEHOLDER);

    text.trim().to_string()
}
