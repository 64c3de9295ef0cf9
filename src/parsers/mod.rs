//! # 重写器模块
//!
//! 这个模块包含用于重写归档资源引用的功能：
//!
//! - HTML文档的流式标签级重写
//! - CSS样式表中url()字面量的重写
//!
//! # 模块组织
//!
//! - `html` - HTML文档的标签级重写（链接模式和内嵌模式）
//! - `css` - CSS样式表的url()重写
//!
//! 两个重写器共享同一条引用替换规则：归档内的引用在链接模式下变为
//! 本地文件名，在内嵌模式下变为data URL；归档外的引用变为绝对URL。

pub mod css;
pub mod html;

// Re-export commonly used items for convenience
pub use css::rewrite_css;
pub use html::rewrite_html;

use std::rc::Rc;

use tracing::debug;

use crate::archive::{UrlTarget, WebArchive};
use crate::core::ExtractMode;
use crate::utils::url::Url;

// Frames and style sheets embed recursively; archives are acyclic by
// construction, but untrusted input still gets a depth cap. References
// past the cap stay absolute URLs.
pub(crate) const MAX_INLINE_DEPTH: usize = 16;

/// Rewrites one resolved reference according to the extraction mode.
///
/// Archived subresources become local paths (linked mode) or data URLs
/// (embedded mode); subframe documents become their extracted location or
/// a recursively inlined data URL; anything else stays an absolute URL.
pub(crate) fn rewrite_reference(
    archive: &WebArchive,
    absolute_url: &Url,
    mode: ExtractMode,
    subresource_dir: &str,
    depth: usize,
) -> String {
    match archive.classify(absolute_url.as_str()) {
        UrlTarget::InternalFrame(subframe_archive) => match mode {
            ExtractMode::Linked => {
                match archive.local_path(absolute_url.as_str()) {
                    Ok(local_path) => join_subresource_dir(subresource_dir, local_path),
                    // Unreachable for well-formed tables; keep the page
                    // usable instead of failing the rewrite
                    Err(_) => absolute_url.to_string(),
                }
            }
            ExtractMode::Embedded => inline_subframe(subframe_archive, absolute_url, depth),
        },
        UrlTarget::Internal(local_path) => match mode {
            ExtractMode::Linked => join_subresource_dir(subresource_dir, local_path),
            ExtractMode::Embedded => inline_subresource(archive, absolute_url, depth),
        },
        UrlTarget::External => absolute_url.to_string(),
    }
}

/// Renders an archived subresource as a data URL.
///
/// Style sheets are rewritten recursively first, so URLs they reference
/// get embedded as well. URLs that are in the local paths table but name
/// no subresource (the main document's own URL) stay absolute.
fn inline_subresource(archive: &WebArchive, absolute_url: &Url, depth: usize) -> String {
    if depth >= MAX_INLINE_DEPTH {
        debug!(url = %absolute_url, "inline depth cap reached; keeping absolute URL");
        return absolute_url.to_string();
    }

    let resource = match archive.find_subresource(absolute_url.as_str()) {
        Some(resource) => resource,
        None => return absolute_url.to_string(),
    };

    if resource.is_stylesheet() {
        if let Ok(css_text) = resource.text() {
            let rewritten = css::rewrite_css_at(
                archive,
                &css_text,
                Some(absolute_url),
                ExtractMode::Embedded,
                "",
                depth + 1,
            );
            return crate::utils::url::create_data_url(resource.media_type(), rewritten.as_bytes())
                .to_string();
        }
    }

    resource.to_data_url().to_string()
}

/// Renders a subframe archive's document as a data URL, inlining its own
/// subresources recursively.
fn inline_subframe(subframe_archive: &Rc<WebArchive>, absolute_url: &Url, depth: usize) -> String {
    if depth >= MAX_INLINE_DEPTH {
        debug!(url = %absolute_url, "inline depth cap reached; keeping absolute URL");
        return absolute_url.to_string();
    }

    let subframe_main = match subframe_archive.main_resource() {
        Some(resource) => resource,
        None => return absolute_url.to_string(),
    };

    match html::rewrite_html_at(
        subframe_archive,
        subframe_main,
        ExtractMode::Embedded,
        "",
        depth + 1,
    ) {
        Ok(document) => {
            crate::utils::url::create_data_url(subframe_main.media_type(), document.as_bytes())
                .to_string()
        }
        Err(e) => {
            debug!(url = %absolute_url, error = %e, "subframe not inlinable; keeping absolute URL");
            absolute_url.to_string()
        }
    }
}

/// Joins the subresource directory prefix onto a local path; main
/// documents of subframe archives are rewritten with an empty prefix
/// since they live in the same directory as their subresources.
pub(crate) fn join_subresource_dir(subresource_dir: &str, local_path: &str) -> String {
    if subresource_dir.is_empty() {
        local_path.to_string()
    } else {
        format!("{subresource_dir}/{local_path}")
    }
}
