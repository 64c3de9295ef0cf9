//! CSS 重写器模块
//!
//! 此模块重写CSS样式表中的url()字面量。url()中的引用相对于样式表
//! 自身的URL解析（而不是文档的URL），然后按归档内容分类替换为本地
//! 文件名、data URL或绝对URL。
//!
//! 这里有意不做完整的CSS解析：只扫描url(...)字面量并按位置替换，
//! 样式表的其余文本原样保留。

use std::sync::OnceLock;

use regex::Regex;

use crate::archive::WebArchive;
use crate::core::ExtractMode;
use crate::parsers::rewrite_reference;
use crate::utils::url::{resolve_url, Url};

static CSS_URL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn css_url_pattern() -> &'static Regex {
    CSS_URL_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)url\(\s*([^)]*?)\s*\)").unwrap_or_else(|_| Regex::new(r"").unwrap())
    })
}

/// Rewrites every `url(...)` literal in a style sheet.
///
/// `base_url` is the style sheet's own URL; CSS references are relative
/// to the style sheet's location, not the document that loaded it. Empty
/// and malformed literals are left untouched.
pub fn rewrite_css(
    archive: &WebArchive,
    css_text: &str,
    base_url: Option<&Url>,
    mode: ExtractMode,
    subresource_dir: &str,
) -> String {
    rewrite_css_at(archive, css_text, base_url, mode, subresource_dir, 0)
}

pub(crate) fn rewrite_css_at(
    archive: &WebArchive,
    css_text: &str,
    base_url: Option<&Url>,
    mode: ExtractMode,
    subresource_dir: &str,
    depth: usize,
) -> String {
    let mut output = String::with_capacity(css_text.len());
    let mut last_end = 0;

    for captures in css_url_pattern().captures_iter(css_text) {
        let (whole, literal) = match (captures.get(0), captures.get(1)) {
            (Some(whole), Some(literal)) => (whole, literal.as_str()),
            _ => continue,
        };

        // Strip a single layer of surrounding quotes, remembering which
        // kind so the replacement can keep it
        let (quote, reference) = strip_quotes(literal);
        if reference.is_empty() {
            continue;
        }

        let resolved = match resolve_url(base_url, reference) {
            Some(resolved) => resolved,
            // Malformed reference; pass it through unchanged
            None => continue,
        };
        let replacement = rewrite_reference(archive, &resolved, mode, subresource_dir, depth);

        // Substitution is by match position, so a literal that happens to
        // recur elsewhere in the text is never touched by this match
        output.push_str(&css_text[last_end..whole.start()]);
        output.push_str("url(");
        output.push_str(quote);
        output.push_str(&replacement);
        output.push_str(quote);
        output.push(')');
        last_end = whole.end();
    }

    output.push_str(&css_text[last_end..]);
    output
}

/// Splits a `url()` literal into its quote character (if any) and the
/// reference inside.
fn strip_quotes(literal: &str) -> (&'static str, &str) {
    let bytes = literal.as_bytes();
    if bytes.len() >= 2 {
        if bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
            return ("\"", &literal[1..literal.len() - 1]);
        }
        if bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'' {
            return ("'", &literal[1..literal.len() - 1]);
        }
    }

    ("", literal)
}
