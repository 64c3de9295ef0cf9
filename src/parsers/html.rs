//! HTML 重写器模块
//!
//! 此模块以流式标签级方式重写HTML文档：文档被切分为标签、文本、
//! 注释等token，带引用的属性按提取模式改写，其余内容原样写出。
//! 有意不构建完整DOM，以保持内存有界并容忍真实归档中的畸形标记。
//!
//! 特殊处理：
//!
//! - `<style>`块整体缓冲后交给CSS重写器
//! - `<script>`内容原样透传（不做实体转义，也不内联改写）
//! - 内嵌模式下`<link rel="stylesheet">`被替换为内联`<style>`块

use std::cell::RefCell;

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Doctype, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer,
    TokenizerOpts,
};

use crate::archive::{WebArchive, WebResource};
use crate::core::{ArchiveError, ExtractMode};
use crate::parsers::{css, rewrite_reference};
use crate::utils::url::{resolve_url, Url};

const MARKER_COMMENT: &str = "<!-- Processed by webarc -->\n";

// Elements with no content model; in XHTML output these are serialized
// with the " />" form
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Rewrites an HTML document's resource references for extraction.
///
/// In linked mode archived references become `subresource_dir/<basename>`
/// paths; in embedded mode they become data URLs, with frames and style
/// sheets inlined recursively. The document text is decoded using the
/// resource's recorded encoding.
pub fn rewrite_html(
    archive: &WebArchive,
    resource: &WebResource,
    mode: ExtractMode,
    subresource_dir: &str,
) -> Result<String, ArchiveError> {
    rewrite_html_at(archive, resource, mode, subresource_dir, 0)
}

pub(crate) fn rewrite_html_at(
    archive: &WebArchive,
    resource: &WebResource,
    mode: ExtractMode,
    subresource_dir: &str,
    depth: usize,
) -> Result<String, ArchiveError> {
    let text = resource.text()?;

    let sink = RewriteSink {
        archive,
        base_url: Url::parse(resource.url()).ok(),
        mode,
        subresource_dir,
        depth,
        state: RefCell::new(RewriteState {
            output: String::with_capacity(text.len() + MARKER_COMMENT.len()),
            xhtml: resource
                .media_type()
                .eq_ignore_ascii_case("application/xhtml+xml"),
            raw: RawContent::None,
            marker_written: false,
        }),
    };

    let tokenizer = Tokenizer::new(sink, TokenizerOpts::default());
    let input = BufferQueue::default();
    input.push_back(StrTendril::from_slice(&text));
    let _ = tokenizer.feed(&input);
    tokenizer.end();

    Ok(tokenizer.sink.state.into_inner().output)
}

/// Regions where token text is not ordinary HTML character data.
enum RawContent {
    None,
    /// Inside a `<script>` element; text passes through untouched
    Script,
    /// Inside a `<style>` element; text is buffered for the CSS rewriter
    Style(String),
}

struct RewriteState {
    output: String,
    xhtml: bool,
    raw: RawContent,
    marker_written: bool,
}

struct RewriteSink<'a> {
    archive: &'a WebArchive,
    base_url: Option<Url>,
    mode: ExtractMode,
    subresource_dir: &'a str,
    depth: usize,
    state: RefCell<RewriteState>,
}

impl TokenSink for RewriteSink<'_> {
    type Handle = ();

    fn process_token(&self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::DoctypeToken(doctype) => {
                let mut state = self.state.borrow_mut();
                self.write_doctype(&doctype, &mut state);
            }
            Token::TagToken(tag) => match tag.kind {
                TagKind::StartTag => return self.start_tag(&tag),
                TagKind::EndTag => {
                    let mut state = self.state.borrow_mut();
                    self.end_tag(&tag, &mut state);
                }
            },
            Token::CharacterTokens(text) => {
                let mut guard = self.state.borrow_mut();
                let state = &mut *guard;
                match &mut state.raw {
                    RawContent::None => state.output.push_str(&escape_text(&text)),
                    RawContent::Script => state.output.push_str(&text),
                    RawContent::Style(buffer) => buffer.push_str(&text),
                }
            }
            Token::CommentToken(comment) => {
                // Comments are preserved; IE conditional comments can
                // affect rendering
                let mut state = self.state.borrow_mut();
                state.output.push_str("<!--");
                state.output.push_str(&comment);
                state.output.push_str("-->");
            }
            Token::EOFToken => {
                // An unclosed <style> still owns everything up to EOF;
                // flush it so the buffered text is not lost
                let mut state = self.state.borrow_mut();
                self.flush_style(&mut state);
            }
            Token::NullCharacterToken | Token::ParseError(_) => {}
        }

        TokenSinkResult::Continue
    }
}

impl RewriteSink<'_> {
    fn write_doctype(&self, doctype: &Doctype, state: &mut RewriteState) {
        if let Some(public_id) = &doctype.public_id {
            if public_id.contains("DTD XHTML") {
                state.xhtml = true;
            }
        }

        state.output.push_str("<!DOCTYPE");
        if let Some(name) = &doctype.name {
            state.output.push(' ');
            state.output.push_str(name);
        }
        if let Some(public_id) = &doctype.public_id {
            state.output.push_str(" PUBLIC \"");
            state.output.push_str(public_id);
            state.output.push('"');
            if let Some(system_id) = &doctype.system_id {
                state.output.push_str(" \"");
                state.output.push_str(system_id);
                state.output.push('"');
            }
        } else if let Some(system_id) = &doctype.system_id {
            state.output.push_str(" SYSTEM \"");
            state.output.push_str(system_id);
            state.output.push('"');
        }
        state.output.push_str(">\n");
    }

    fn start_tag(&self, tag: &Tag) -> TokenSinkResult<()> {
        let name: &str = &tag.name;
        let mut state = self.state.borrow_mut();

        // In embedded mode a style sheet link becomes an inline <style>
        // block holding the rewritten style sheet text
        if self.mode == ExtractMode::Embedded && name == "link" {
            if let Some(rewritten) = self.inline_linked_stylesheet(tag) {
                state.output.push_str("<style>");
                state.output.push_str(&rewritten);
                state.output.push_str("</style>");
                return TokenSinkResult::Continue;
            }
        }

        state.output.push('<');
        state.output.push_str(name);
        for attr in &tag.attrs {
            let attr_name: &str = &attr.name.local;
            let value = self.rewrite_attribute(name, attr_name, &attr.value);

            state.output.push(' ');
            state.output.push_str(attr_name);
            state.output.push_str("=\"");
            state.output.push_str(&escape_attribute(&value));
            state.output.push('"');
        }
        if tag.self_closing || (state.xhtml && VOID_ELEMENTS.contains(&name)) {
            state.output.push_str(" />");
        } else {
            state.output.push('>');
        }

        // Flag that this document has been through the rewriter
        if name == "html" && !state.marker_written {
            state.output.push_str(MARKER_COMMENT);
            state.marker_written = true;
        }

        if !tag.self_closing {
            if name == "style" {
                state.raw = RawContent::Style(String::new());
                return TokenSinkResult::RawData(RawKind::Rawtext);
            }
            if name == "script" {
                state.raw = RawContent::Script;
                return TokenSinkResult::RawData(RawKind::ScriptData);
            }
        }

        TokenSinkResult::Continue
    }

    fn end_tag(&self, tag: &Tag, state: &mut RewriteState) {
        let name: &str = &tag.name;

        if name == "style" {
            self.flush_style(state);
        } else if name == "script" {
            state.raw = RawContent::None;
        }

        state.output.push_str("</");
        state.output.push_str(name);
        state.output.push('>');
    }

    /// Runs a buffered `<style>` region through the CSS rewriter and
    /// appends the result. No-op outside a style region.
    fn flush_style(&self, state: &mut RewriteState) {
        if let RawContent::Style(buffer) = std::mem::replace(&mut state.raw, RawContent::None) {
            // Inline style blocks resolve URLs against the document
            let rewritten = css::rewrite_css_at(
                self.archive,
                &buffer,
                self.base_url.as_ref(),
                self.mode,
                self.subresource_dir,
                self.depth,
            );
            state.output.push_str(&rewritten);
        }
    }

    /// Returns the rewritten style sheet text for a
    /// `<link rel="stylesheet">` tag whose target is archived, or `None`
    /// when the tag should be emitted normally instead.
    fn inline_linked_stylesheet(&self, tag: &Tag) -> Option<String> {
        let mut is_stylesheet = false;
        let mut href: Option<&str> = None;

        for attr in &tag.attrs {
            let attr_name: &str = &attr.name.local;
            if attr_name == "rel" && attr.value.trim().eq_ignore_ascii_case("stylesheet") {
                is_stylesheet = true;
            } else if attr_name == "href" {
                href = Some(&attr.value);
            }
        }
        if !is_stylesheet {
            return None;
        }

        let resolved = resolve_url(self.base_url.as_ref(), href?)?;
        let resource = self.archive.find_subresource(resolved.as_str())?;
        let css_text = resource.text().ok()?;

        Some(css::rewrite_css_at(
            self.archive,
            &css_text,
            Some(&resolved),
            ExtractMode::Embedded,
            self.subresource_dir,
            self.depth + 1,
        ))
    }

    fn rewrite_attribute(&self, tag_name: &str, attr_name: &str, value: &str) -> String {
        match attr_name {
            // Links and form targets navigate away from the extracted
            // page, which has no stable relative base; always absolute
            "href" if tag_name == "a" => self.absolutize(value),
            "action" if tag_name == "form" => self.absolutize(value),
            "srcset" => self.rewrite_srcset(value),
            "src" => self.reference(value),
            "href" if tag_name == "link" => self.reference(value),
            _ => value.to_string(),
        }
    }

    fn absolutize(&self, value: &str) -> String {
        match resolve_url(self.base_url.as_ref(), value) {
            Some(resolved) => resolved.to_string(),
            None => value.to_string(),
        }
    }

    fn reference(&self, value: &str) -> String {
        if value.is_empty() {
            return String::new();
        }

        match resolve_url(self.base_url.as_ref(), value) {
            Some(resolved) => rewrite_reference(
                self.archive,
                &resolved,
                self.mode,
                self.subresource_dir,
                self.depth,
            ),
            None => value.to_string(),
        }
    }

    /// Rewrites a srcset attribute: a comma-separated list of
    /// `url [descriptor]` entries, each URL rewritten like a src
    /// attribute and each descriptor kept verbatim.
    fn rewrite_srcset(&self, value: &str) -> String {
        let mut entries: Vec<String> = Vec::new();

        for entry in value.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            match entry.split_once(char::is_whitespace) {
                Some((src, descriptor)) => entries.push(format!(
                    "{} {}",
                    self.reference(src),
                    descriptor.trim_start()
                )),
                None => entries.push(self.reference(entry)),
            }
        }

        entries.join(", ")
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use plist::{Dictionary, Value};
    use std::rc::Rc;

    fn resource_value(url: &str, media_type: &str, data: &[u8]) -> Value {
        let mut dict = Dictionary::new();
        dict.insert("WebResourceURL".to_string(), Value::String(url.to_string()));
        dict.insert(
            "WebResourceMIMEType".to_string(),
            Value::String(media_type.to_string()),
        );
        dict.insert("WebResourceData".to_string(), Value::Data(data.to_vec()));
        Value::Dictionary(dict)
    }

    fn archive_value(main: Value, subresources: Vec<Value>, subframes: Vec<Value>) -> Value {
        let mut dict = Dictionary::new();
        dict.insert("WebMainResource".to_string(), main);
        if !subresources.is_empty() {
            dict.insert("WebSubresources".to_string(), Value::Array(subresources));
        }
        if !subframes.is_empty() {
            dict.insert("WebSubframeArchives".to_string(), Value::Array(subframes));
        }
        Value::Dictionary(dict)
    }

    fn build(main_html: &str, subresources: Vec<Value>, subframes: Vec<Value>) -> Rc<WebArchive> {
        WebArchive::from_plist(&archive_value(
            resource_value("https://x/index.html", "text/html", main_html.as_bytes()),
            subresources,
            subframes,
        ))
        .unwrap()
    }

    fn rewrite(archive: &WebArchive, mode: ExtractMode, dir: &str) -> String {
        rewrite_html(archive, archive.main_resource().unwrap(), mode, dir).unwrap()
    }

    #[test]
    fn img_src_becomes_local_path_in_linked_mode() {
        let archive = build(
            r#"<html><body><img src="pic.png"></body></html>"#,
            vec![resource_value("https://x/pic.png", "image/png", b"abc")],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "page_files");
        assert!(output.contains(r#"<img src="page_files/pic.png">"#));
    }

    #[test]
    fn img_src_becomes_data_url_in_embedded_mode() {
        let archive = build(
            r#"<html><body><img src="pic.png"></body></html>"#,
            vec![resource_value("https://x/pic.png", "image/png", b"abc")],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Embedded, "");
        assert!(output.contains(r#"<img src="data:image/png;base64,YWJj">"#));
    }

    #[test]
    fn anchors_are_always_absolute() {
        let archive = build(r#"<html><body><a href="/about">About</a></body></html>"#, vec![], vec![]);

        for mode in [ExtractMode::Linked, ExtractMode::Embedded] {
            let output = rewrite(&archive, mode, "page_files");
            assert!(output.contains(r#"<a href="https://x/about">"#));
        }
    }

    #[test]
    fn marker_comment_follows_opening_html_tag() {
        let archive = build("<html><body></body></html>", vec![], vec![]);

        let output = rewrite(&archive, ExtractMode::Linked, "");
        assert!(output.starts_with("<html><!-- Processed by webarc -->\n"));
        assert_eq!(output.matches("Processed by webarc").count(), 1);
    }

    #[test]
    fn unarchived_references_become_absolute() {
        let archive = build(
            r#"<html><body><img src="missing.png"></body></html>"#,
            vec![],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "page_files");
        assert!(output.contains(r#"<img src="https://x/missing.png">"#));
    }

    #[test]
    fn srcset_entries_rewritten_individually() {
        let archive = build(
            r#"<html><body><img srcset="pic.png 1x, big.png 2x"></body></html>"#,
            vec![
                resource_value("https://x/pic.png", "image/png", b"a"),
                resource_value("https://x/big.png", "image/png", b"b"),
            ],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "d");
        assert!(output.contains(r#"srcset="d/pic.png 1x, d/big.png 2x""#));
    }

    #[test]
    fn style_block_goes_through_css_rewriter() {
        let archive = build(
            "<html><head><style>body{background:url(bg.png)}</style></head></html>",
            vec![resource_value("https://x/bg.png", "image/png", b"abc")],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Embedded, "");
        assert!(output
            .contains("<style>body{background:url(data:image/png;base64,YWJj)}</style>"));
    }

    #[test]
    fn unclosed_style_block_is_flushed_at_end_of_input() {
        let archive = build(
            "<html><head><style>body{background:url(bg.png)}",
            vec![resource_value("https://x/bg.png", "image/png", b"abc")],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Embedded, "");
        assert!(output.contains("<style>body{background:url(data:image/png;base64,YWJj)}"));
    }

    #[test]
    fn stylesheet_link_inlined_in_embedded_mode() {
        let archive = build(
            r#"<html><head><link rel="stylesheet" href="site.css"></head></html>"#,
            vec![resource_value(
                "https://x/site.css",
                "text/css",
                b"p{color:red}",
            )],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Embedded, "");
        assert!(output.contains("<style>p{color:red}</style>"));
        assert!(!output.contains("<link"));
    }

    #[test]
    fn stylesheet_link_kept_in_linked_mode() {
        let archive = build(
            r#"<html><head><link rel="stylesheet" href="site.css"></head></html>"#,
            vec![resource_value(
                "https://x/site.css",
                "text/css",
                b"p{color:red}",
            )],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "page_files");
        assert!(output.contains(r#"<link rel="stylesheet" href="page_files/site.css">"#));
    }

    #[test]
    fn unarchived_stylesheet_link_stays_absolute_in_embedded_mode() {
        let archive = build(
            r#"<html><head><link rel="stylesheet" href="other.css"></head></html>"#,
            vec![],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Embedded, "");
        assert!(output.contains(r#"<link rel="stylesheet" href="https://x/other.css">"#));
    }

    #[test]
    fn script_source_is_never_inlined_as_code() {
        let archive = build(
            r#"<html><body><script src="app.js"></script></body></html>"#,
            vec![resource_value(
                "https://x/app.js",
                "application/javascript",
                b"alert(1)",
            )],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Embedded, "");
        assert!(output.contains(r#"<script src="data:application/javascript;base64,"#));
        assert!(!output.contains("alert(1)"));
    }

    #[test]
    fn script_body_passes_through_unescaped() {
        let archive = build(
            "<html><body><script>if (a < b && c > d) { go(); }</script></body></html>",
            vec![],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "");
        assert!(output.contains("<script>if (a < b && c > d) { go(); }</script>"));
    }

    #[test]
    fn text_and_comments_are_preserved(){
        let archive = build(
            "<html><body><!--[if IE]>old<![endif]-->a &amp; b</body></html>",
            vec![],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "");
        assert!(output.contains("<!--[if IE]>old<![endif]-->"));
        assert!(output.contains("a &amp; b"));
    }

    #[test]
    fn frame_inlined_recursively_in_embedded_mode() {
        let frame = archive_value(
            resource_value("https://x/frame.html", "text/html", b"<p>hi</p>"),
            vec![],
            vec![],
        );
        let archive = build(
            r#"<html><body><iframe src="frame.html"></iframe></body></html>"#,
            vec![],
            vec![frame],
        );

        let output = rewrite(&archive, ExtractMode::Embedded, "");
        assert!(output.contains(r#"<iframe src="data:text/html;base64,"#));
    }

    #[test]
    fn frame_becomes_local_path_in_linked_mode() {
        let frame = archive_value(
            resource_value("https://x/frame.html", "text/html", b"<p>hi</p>"),
            vec![],
            vec![],
        );
        let archive = build(
            r#"<html><body><frame src="frame.html"></frame></body></html>"#,
            vec![],
            vec![frame],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "page_files");
        assert!(output.contains(r#"<frame src="page_files/frame.html">"#));
    }

    #[test]
    fn unarchived_frame_falls_back_to_absolute_url() {
        let archive = build(
            r#"<html><body><iframe src="gone.html"></iframe></body></html>"#,
            vec![],
            vec![],
        );

        for mode in [ExtractMode::Linked, ExtractMode::Embedded] {
            let output = rewrite(&archive, mode, "page_files");
            assert!(output.contains(r#"<iframe src="https://x/gone.html">"#));
        }
    }

    #[test]
    fn xhtml_void_elements_self_close() {
        let archive = WebArchive::from_plist(&archive_value(
            resource_value(
                "https://x/index.xhtml",
                "application/xhtml+xml",
                b"<html><body><br><img src=\"pic.png\"></body></html>",
            ),
            vec![resource_value("https://x/pic.png", "image/png", b"a")],
            vec![],
        ))
        .unwrap();

        let output = rewrite(&archive, ExtractMode::Linked, "d");
        assert!(output.contains("<br />"));
        assert!(output.contains(r#"<img src="d/pic.png" />"#));
    }

    #[test]
    fn explicit_self_closing_syntax_survives_in_html_output() {
        let archive = build(
            r#"<html><body><br/><img src="pic.png"/><br></body></html>"#,
            vec![resource_value("https://x/pic.png", "image/png", b"a")],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "d");
        assert!(output.contains("<br />"));
        assert!(output.contains(r#"<img src="d/pic.png" />"#));
        assert!(output.contains("<br>"));
    }

    #[test]
    fn xhtml_detected_from_doctype() {
        let archive = build(
            concat!(
                r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "#,
                r#""http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#,
                "<html><body><hr></body></html>",
            ),
            vec![],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "");
        assert!(output.contains("DTD XHTML 1.0 Strict"));
        assert!(output.contains("<hr />"));
    }

    #[test]
    fn attribute_values_are_entity_escaped() {
        let archive = build(
            r#"<html><body><p title="a &quot;b&quot; &amp; c">t</p></body></html>"#,
            vec![],
            vec![],
        );

        let output = rewrite(&archive, ExtractMode::Linked, "");
        assert!(output.contains(r#"title="a &quot;b&quot; &amp; c""#));
    }
}
