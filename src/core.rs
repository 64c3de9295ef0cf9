use std::fs;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use thiserror::Error;
use tracing::{debug, warn};

use crate::archive::{WebArchive, WebResource};
use crate::parsers::{css, html};
use crate::utils::url::Url;

/// Represents errors that can occur while reading or extracting a webarchive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive is structurally unusable, e.g. it has no main resource.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// A URL-based lookup did not match any resource in the archive.
    #[error("unresolved lookup: {0}")]
    UnresolvedLookup(String),

    /// A resource cannot be converted to the requested representation,
    /// e.g. a string view of binary data.
    #[error("unsupported conversion: {0}")]
    UnsupportedConversion(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Plist(#[from] plist::Error),
}

/// Output modes for webarchive extraction.
///
/// `Linked` saves subresources as individual files next to the main
/// document, the way "Save As" works in most browsers. `Embedded` inlines
/// every subresource as a data URL, producing a single self-contained file
/// that mimics the webarchive format's main feature with full cross-browser
/// support but much lower efficiency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExtractMode {
    /// Multi-file extraction (default)
    #[default]
    Linked,
    /// Single-file extraction using data URLs
    Embedded,
}

type ResourceHook<'a> = Box<dyn FnMut(&WebResource, &Path) + 'a>;

/// Progress and cancellation callbacks for an extraction run.
///
/// All callbacks are optional and no-ops by default. `before`/`after` are
/// invoked around every resource written to disk; the cancellation predicate
/// is polled once per resource, so cancellation is resource-grained.
#[derive(Default)]
pub struct ExtractHooks<'a> {
    before: Option<ResourceHook<'a>>,
    after: Option<ResourceHook<'a>>,
    canceled: Option<Box<dyn FnMut() -> bool + 'a>>,
}

impl<'a> ExtractHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a callback invoked just before a resource is extracted.
    pub fn on_before(mut self, hook: impl FnMut(&WebResource, &Path) + 'a) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    /// Sets a callback invoked just after a resource was extracted.
    pub fn on_after(mut self, hook: impl FnMut(&WebResource, &Path) + 'a) -> Self {
        self.after = Some(Box::new(hook));
        self
    }

    /// Sets a predicate polled before each resource; returning `true`
    /// aborts the extraction (files already flushed are left in place).
    pub fn cancel_when(mut self, predicate: impl FnMut() -> bool + 'a) -> Self {
        self.canceled = Some(Box::new(predicate));
        self
    }

    pub(crate) fn fire_before(&mut self, resource: &WebResource, destination: &Path) {
        if let Some(hook) = self.before.as_mut() {
            hook(resource, destination);
        }
    }

    pub(crate) fn fire_after(&mut self, resource: &WebResource, destination: &Path) {
        if let Some(hook) = self.after.as_mut() {
            hook(resource, destination);
        }
    }

    pub(crate) fn is_canceled(&mut self) -> bool {
        match self.canceled.as_mut() {
            Some(predicate) => predicate(),
            None => false,
        }
    }
}

const ANSI_COLOR_RED: &str = "\x1b[31m";
const ANSI_COLOR_RESET: &str = "\x1b[0m";

/// HTML-family media types that go through the markup rewriter.
const HTML_MEDIA_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

// All known non-"text/..." plaintext media types
const PLAINTEXT_MEDIA_TYPES: &[&str] = &[
    "application/javascript",          // .js
    "application/json",                // .json
    "application/x-javascript",        // .js
    "application/xhtml+xml",           // .xhtml
    "application/xml",                 // .xml
    "application/vnd.mozilla.xul+xml", // .xul
    "image/svg+xml",                   // .svg
];

// Local files have no Content-Type header, so browsers rely on extensions
// to determine their types; this maps archived media types to extensions
// browsers are likely to recognize. Includes common web font and script
// types that platform mapping tables tend to lack.
const MEDIA_TYPE_EXTENSIONS: &[(&str, &str)] = &[
    // Markup and text
    ("text/html", ".html"),
    ("application/xhtml+xml", ".xhtml"),
    ("text/css", ".css"),
    ("text/javascript", ".js"),
    ("application/javascript", ".js"),
    ("application/x-javascript", ".js"),
    ("application/json", ".json"),
    ("text/plain", ".txt"),
    ("text/xml", ".xml"),
    ("application/xml", ".xml"),
    ("application/pdf", ".pdf"),
    // Image
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("image/x-icon", ".ico"),
    ("image/vnd.microsoft.icon", ".ico"),
    ("image/bmp", ".bmp"),
    // Audio
    ("audio/mpeg", ".mp3"),
    ("audio/ogg", ".ogg"),
    ("audio/wav", ".wav"),
    ("audio/x-flac", ".flac"),
    // Video
    ("video/mp4", ".mp4"),
    ("video/webm", ".webm"),
    ("video/quicktime", ".mov"),
    ("video/mpeg", ".mpg"),
    ("video/avi", ".avi"),
    // Fonts
    ("application/font-woff", ".woff"),
    ("application/x-font-woff", ".woff"),
    ("font/woff", ".woff"),
    ("font/woff2", ".woff2"),
    ("font/ttf", ".ttf"),
    ("font/otf", ".otf"),
];

/// Checks if the given media type belongs to the HTML family
pub fn is_html_media_type(media_type: &str) -> bool {
    HTML_MEDIA_TYPES
        .iter()
        .any(|t| media_type.eq_ignore_ascii_case(t))
}

/// Checks if the given media type represents plaintext content
pub fn is_plaintext_media_type(media_type: &str) -> bool {
    media_type.to_lowercase().as_str().starts_with("text/")
        || PLAINTEXT_MEDIA_TYPES
            .iter()
            .any(|t| media_type.eq_ignore_ascii_case(t))
}

/// Returns the preferred file extension (with leading dot) for a media
/// type, or an empty string when no mapping exists.
pub fn extension_for_media_type(media_type: &str) -> &'static str {
    for (known_media_type, extension) in MEDIA_TYPE_EXTENSIONS {
        if media_type.eq_ignore_ascii_case(known_media_type) {
            return extension;
        }
    }

    ""
}

/// Extracts a webarchive to the given output path.
///
/// In `Linked` mode this writes the rewritten main document at
/// `output_path` plus a flat `<stem>_files/` directory beside it containing
/// every subresource and each subframe archive's document; subframe
/// archives are extracted recursively with the same hooks and cancellation
/// predicate. In `Embedded` mode a single self-contained file is written.
///
/// Extraction is not transactional: canceling mid-run leaves the files
/// already flushed in place.
pub fn extract_archive(
    archive: &WebArchive,
    output_path: &Path,
    mode: ExtractMode,
    hooks: &mut ExtractHooks,
) -> Result<(), ArchiveError> {
    if hooks.is_canceled() {
        return Ok(());
    }

    let main_resource = archive.main_resource().ok_or_else(|| {
        ArchiveError::MalformedArchive("archive does not have a main resource".to_string())
    })?;

    debug!(output = %output_path.display(), ?mode, "extracting archive");

    if mode == ExtractMode::Embedded {
        hooks.fire_before(main_resource, output_path);
        let document = render_main_resource(archive, main_resource, mode, "")?;
        fs::write(output_path, document)?;
        hooks.fire_after(main_resource, output_path);

        return Ok(());
    }

    // Basename of the directory holding extracted subresources, also used
    // as the relative path prefix inside the rewritten main document
    let stem = match output_path.file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => String::from("webarchive"),
    };
    let subresource_dir_base = format!("{}_files", stem);
    let subresource_dir: PathBuf = match output_path.parent() {
        Some(parent) => parent.join(&subresource_dir_base),
        None => PathBuf::from(&subresource_dir_base),
    };

    hooks.fire_before(main_resource, output_path);
    let document = render_main_resource(archive, main_resource, mode, &subresource_dir_base)?;
    fs::write(output_path, document)?;
    hooks.fire_after(main_resource, output_path);

    if !archive.subresources().is_empty() || !archive.subframe_archives().is_empty() {
        // Creating an already-existing directory is not an error
        fs::create_dir_all(&subresource_dir)?;
    }

    for resource in archive.subresources() {
        if hooks.is_canceled() {
            return Ok(());
        }

        let local_path = archive.local_path(resource.url())?;
        let destination = subresource_dir.join(local_path);

        hooks.fire_before(resource, &destination);
        let output = render_subresource(archive, resource);
        fs::write(&destination, output)?;
        hooks.fire_after(resource, &destination);
    }

    for subframe_archive in archive.subframe_archives() {
        // Tested here to stop processing further subframe archives; the
        // nested call separately polls it for its own resources
        if hooks.is_canceled() {
            return Ok(());
        }

        let subframe_main = subframe_archive.main_resource().ok_or_else(|| {
            ArchiveError::MalformedArchive(
                "subframe archive does not have a main resource".to_string(),
            )
        })?;
        let local_path = archive.local_path(subframe_main.url())?;

        extract_archive(
            subframe_archive,
            &subresource_dir.join(local_path),
            mode,
            hooks,
        )?;
    }

    Ok(())
}

/// Renders the main resource for writing, falling back to a verbatim copy
/// when the resource is not HTML or turns out not to be rewritable.
fn render_main_resource(
    archive: &WebArchive,
    resource: &WebResource,
    mode: ExtractMode,
    subresource_dir: &str,
) -> Result<Vec<u8>, ArchiveError> {
    if resource.is_html() {
        match html::rewrite_html(archive, resource, mode, subresource_dir) {
            Ok(text) => return Ok(encode_text(resource, &text)),
            Err(e) => {
                warn!(url = resource.url(), error = %e, "markup rewrite failed; copying main resource verbatim");
            }
        }
    }

    // Non-HTML main resources are possible; for example, archives exist
    // where the main resource is JavaScript.
    Ok(resource.bytes().to_vec())
}

/// Renders a subresource for writing. Style sheets and HTML subresources
/// are rewritten; everything else is copied as raw bytes.
fn render_subresource(archive: &WebArchive, resource: &WebResource) -> Vec<u8> {
    if resource.is_stylesheet() {
        match resource.text() {
            Ok(css_text) => {
                // URLs in CSS are resolved relative to the style sheet's
                // location, and all subresources are extracted into the
                // same flat directory
                let base_url = Url::parse(resource.url()).ok();
                let rewritten = css::rewrite_css(
                    archive,
                    &css_text,
                    base_url.as_ref(),
                    ExtractMode::Linked,
                    "",
                );
                return encode_text(resource, &rewritten);
            }
            Err(e) => {
                warn!(url = resource.url(), error = %e, "style sheet not decodable; copying verbatim");
            }
        }
    } else if resource.is_html() {
        // HTML subresources are weird, but possible
        match html::rewrite_html(archive, resource, ExtractMode::Linked, "") {
            Ok(text) => return encode_text(resource, &text),
            Err(e) => {
                warn!(url = resource.url(), error = %e, "HTML subresource not rewritable; copying verbatim");
            }
        }
    }

    resource.bytes().to_vec()
}

/// Encodes rewritten text using the resource's recorded encoding, falling
/// back to UTF-8 for unknown labels.
pub(crate) fn encode_text(resource: &WebResource, text: &str) -> Vec<u8> {
    if let Some(encoding) = resource
        .text_encoding()
        .and_then(|label| Encoding::for_label(label.as_bytes()))
    {
        let (data, _, _) = encoding.encode(text);
        return data.into_owned();
    }

    text.as_bytes().to_vec()
}

/// Prints an error message to stderr
pub fn print_error_message(msg: &str) {
    eprintln!("{ANSI_COLOR_RED}{msg}{ANSI_COLOR_RESET}");
}

/// Prints an info message to stdout
pub fn print_info_message(msg: &str) {
    println!("{msg}");
}
