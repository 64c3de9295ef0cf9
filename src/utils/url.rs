use base64::{engine::general_purpose, Engine};

pub use url::Url;

/// Resolves a (possibly relative) reference against a base URL.
///
/// The base is the URL of the document or style sheet the reference was
/// found in; references inside style sheets must be resolved against the
/// style sheet's own URL, not the document's. When no base is available
/// (the containing resource's URL failed to parse), only references that
/// are already absolute can be resolved.
///
/// Returns `None` for malformed references; callers are expected to pass
/// those through unchanged rather than fail the whole rewrite.
pub fn resolve_url(base: Option<&Url>, reference: &str) -> Option<Url> {
    match base {
        Some(base) => base.join(reference).ok(),
        None => Url::parse(reference).ok(),
    }
}

/// Builds a `data:<media type>;base64,<payload>` URL for the given bytes.
pub fn create_data_url(media_type: &str, data: &[u8]) -> Url {
    let media_type = if media_type.is_empty() {
        "application/octet-stream"
    } else {
        media_type
    };

    Url::parse(&format!(
        "data:{};base64,{}",
        media_type,
        general_purpose::STANDARD.encode(data)
    ))
    .unwrap()
}

/// Tells whether the given string is already an absolute URL with a scheme.
pub fn is_url_and_has_protocol(input: &str) -> bool {
    input.contains("://") || input.starts_with("data:")
}
