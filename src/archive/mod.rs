//! # Webarchive容器模型
//!
//! 这个模块实现webarchive文件的资源模型：
//!
//! - `WebArchive` - 归档容器（主资源、子资源、子框架归档）
//! - `WebResource` - 单个归档资源及其元数据
//!
//! 归档在读取时即为所有子资源分配好本地文件名，重写器据此判断
//! 引用是指向归档内资源还是外部网络。

pub mod resource;

use std::cell::Cell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::rc::{Rc, Weak};

use plist::Value;
use tracing::debug;

use crate::core::{self, ArchiveError, ExtractHooks, ExtractMode};
use crate::parsers::html;
use crate::utils::url::{is_url_and_has_protocol, Url};

pub use resource::WebResource;

/// Classification of an absolute URL against an archive's contents.
#[derive(Debug)]
pub enum UrlTarget<'a> {
    /// The URL of an archived subresource (or the main resource itself);
    /// carries the basename the resource extracts to
    Internal(&'a str),
    /// The URL of a subframe archive's main document
    InternalFrame(&'a Rc<WebArchive>),
    /// A URL the archive did not capture
    External,
}

/// An Apple webarchive: one main resource, the subresources it references,
/// and a nested archive per subframe.
///
/// Archives form a tree; subframe archives keep a weak backlink to their
/// parent so the tree can be navigated in both directions without leaking.
pub struct WebArchive {
    main_resource: Option<WebResource>,
    subresources: Vec<WebResource>,
    subframe_archives: Vec<Rc<WebArchive>>,
    parent: Cell<Option<Weak<WebArchive>>>,

    // Basenames for extracted subresources, indexed by absolute URL.
    //
    // This also contains entries for the main resource and for the main
    // resources (but not subresources) of any subframe archives. Each
    // subframe archive has its own table so it can be extracted
    // independently of its parent.
    local_paths: HashMap<String, String>,
}

impl WebArchive {
    /// Opens and reads a webarchive file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Rc<WebArchive>, ArchiveError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Reads a webarchive from a stream.
    ///
    /// Both binary and XML property list encodings are accepted.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Rc<WebArchive>, ArchiveError> {
        let value = Value::from_reader(reader)?;
        Self::from_plist(&value)
    }

    /// Builds an archive from an already-parsed property list value.
    pub fn from_plist(value: &Value) -> Result<Rc<WebArchive>, ArchiveError> {
        let dict = value.as_dictionary().ok_or_else(|| {
            ArchiveError::MalformedArchive("top-level value is not a dictionary".to_string())
        })?;

        // A well-formed webarchive always has a main resource, but this
        // is not the place to enforce that; extraction reports it.
        let main_resource = dict
            .get("WebMainResource")
            .and_then(|v| v.as_dictionary())
            .map(WebResource::from_plist);

        let mut subresources: Vec<WebResource> = Vec::new();
        if let Some(items) = dict.get("WebSubresources").and_then(|v| v.as_array()) {
            for item in items {
                if let Some(resource_dict) = item.as_dictionary() {
                    subresources.push(WebResource::from_plist(resource_dict));
                }
            }
        }

        let mut subframe_archives: Vec<Rc<WebArchive>> = Vec::new();
        if let Some(items) = dict.get("WebSubframeArchives").and_then(|v| v.as_array()) {
            for item in items {
                subframe_archives.push(WebArchive::from_plist(item)?);
            }
        }

        let local_paths = make_local_paths(
            main_resource.as_ref(),
            &subresources,
            &subframe_archives,
        );

        debug!(
            subresources = subresources.len(),
            subframes = subframe_archives.len(),
            "read archive"
        );

        let archive = Rc::new(WebArchive {
            main_resource,
            subresources,
            subframe_archives,
            parent: Cell::new(None),
            local_paths,
        });

        for subframe_archive in &archive.subframe_archives {
            subframe_archive.parent.set(Some(Rc::downgrade(&archive)));
        }

        Ok(archive)
    }

    /// The archive's main resource, normally an HTML document
    pub fn main_resource(&self) -> Option<&WebResource> {
        self.main_resource.as_ref()
    }

    /// Resources referenced by the main document (images, scripts, style
    /// sheets, fonts, media)
    pub fn subresources(&self) -> &[WebResource] {
        &self.subresources
    }

    /// Complete nested archives, one per frame of the captured page
    pub fn subframe_archives(&self) -> &[Rc<WebArchive>] {
        &self.subframe_archives
    }

    /// The archive this one is a subframe of, if any.
    pub fn parent(&self) -> Option<Rc<WebArchive>> {
        let weak = self.parent.take();
        let strong = weak.as_ref().and_then(Weak::upgrade);
        self.parent.set(weak);
        strong
    }

    /// Returns the subresource archived from the specified URL.
    ///
    /// The URL must be absolute.
    pub fn subresource(&self, url: &str) -> Result<&WebResource, ArchiveError> {
        if !is_url_and_has_protocol(url) {
            return Err(ArchiveError::UnresolvedLookup(
                "must specify an absolute URL".to_string(),
            ));
        }

        self.find_subresource(url).ok_or_else(|| {
            ArchiveError::UnresolvedLookup(format!("no subresource for URL '{url}'"))
        })
    }

    /// Returns the subframe archive whose main document was archived from
    /// the specified URL.
    ///
    /// The URL must be absolute.
    pub fn subframe_archive(&self, url: &str) -> Result<&Rc<WebArchive>, ArchiveError> {
        if !is_url_and_has_protocol(url) {
            return Err(ArchiveError::UnresolvedLookup(
                "must specify an absolute URL".to_string(),
            ));
        }

        self.find_subframe_archive(url).ok_or_else(|| {
            ArchiveError::UnresolvedLookup(format!("no subframe archive for URL '{url}'"))
        })
    }

    /// Returns the basename the resource at the specified URL extracts to.
    pub fn local_path(&self, url: &str) -> Result<&str, ArchiveError> {
        self.local_paths
            .get(url)
            .map(String::as_str)
            .ok_or_else(|| {
                ArchiveError::UnresolvedLookup(format!("no local path for URL '{url}'"))
            })
    }

    /// Classifies an absolute URL against this archive's contents.
    ///
    /// Subframe main documents shadow the local paths table: a URL that is
    /// both would otherwise be misreported as a plain subresource.
    pub fn classify(&self, url: &str) -> UrlTarget<'_> {
        for subframe_archive in &self.subframe_archives {
            if let Some(subframe_main) = subframe_archive.main_resource() {
                if subframe_main.url() == url {
                    return UrlTarget::InternalFrame(subframe_archive);
                }
            }
        }

        match self.local_paths.get(url) {
            Some(local_path) => UrlTarget::Internal(local_path),
            None => UrlTarget::External,
        }
    }

    /// Total number of resources in this archive, including everything
    /// inside subframe archives.
    pub fn resource_count(&self) -> usize {
        let mut count = self.subresources.len();

        if self.main_resource.is_some() {
            count += 1;
        }
        for subframe_archive in &self.subframe_archives {
            count += subframe_archive.resource_count();
        }

        count
    }

    /// Renders this archive as a single self-contained HTML document,
    /// with subresources embedded recursively as data URLs.
    pub fn to_html(&self) -> Result<String, ArchiveError> {
        let main_resource = self.main_resource.as_ref().ok_or_else(|| {
            ArchiveError::MalformedArchive("archive does not have a main resource".to_string())
        })?;

        html::rewrite_html(self, main_resource, ExtractMode::Embedded, "")
    }

    /// Extracts this archive to the given output path.
    ///
    /// See [`core::extract_archive`] for the on-disk layout.
    pub fn extract<P: AsRef<Path>>(
        &self,
        output_path: P,
        mode: ExtractMode,
    ) -> Result<(), ArchiveError> {
        self.extract_with_hooks(output_path, mode, &mut ExtractHooks::new())
    }

    /// Extracts this archive with progress and cancellation hooks.
    pub fn extract_with_hooks<P: AsRef<Path>>(
        &self,
        output_path: P,
        mode: ExtractMode,
        hooks: &mut ExtractHooks,
    ) -> Result<(), ArchiveError> {
        core::extract_archive(self, output_path.as_ref(), mode, hooks)
    }

    pub(crate) fn find_subresource(&self, url: &str) -> Option<&WebResource> {
        self.subresources.iter().find(|r| r.url() == url)
    }

    pub(crate) fn find_subframe_archive(&self, url: &str) -> Option<&Rc<WebArchive>> {
        self.subframe_archives
            .iter()
            .find(|a| a.main_resource().map(|m| m.url()) == Some(url))
    }
}

impl std::fmt::Debug for WebArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebArchive")
            .field("main_resource", &self.main_resource)
            .field("subresources", &self.subresources.len())
            .field("subframe_archives", &self.subframe_archives.len())
            .finish()
    }
}

/// Allocates extraction basenames for the archive's resources: the main
/// resource first, then subresources, then subframe main documents.
fn make_local_paths(
    main_resource: Option<&WebResource>,
    subresources: &[WebResource],
    subframe_archives: &[Rc<WebArchive>],
) -> HashMap<String, String> {
    let mut local_paths: HashMap<String, String> = HashMap::new();

    let mut resources: Vec<&WebResource> = Vec::new();
    if let Some(main_resource) = main_resource {
        resources.push(main_resource);
    }
    resources.extend(subresources.iter());
    // The main resource of a subframe archive is effectively also a
    // subresource of this archive
    for subframe_archive in subframe_archives {
        if let Some(subframe_main) = subframe_archive.main_resource() {
            resources.push(subframe_main);
        }
    }

    for resource in resources {
        if !local_paths.contains_key(resource.url()) {
            let local_path = make_local_path(resource, &local_paths);
            local_paths.insert(resource.url().to_string(), local_path);
        }
    }

    local_paths
}

/// Picks a unique extraction basename for a single resource.
fn make_local_path(resource: &WebResource, taken: &HashMap<String, String>) -> String {
    let mut base = String::new();

    if !resource.url().is_empty() {
        if let Ok(parsed_url) = Url::parse(resource.url()) {
            if parsed_url.scheme() == "data" {
                // Data URLs are anonymous, so assign a default basename
                base = String::from("data_url");
            } else {
                let basename = parsed_url.path().rsplit('/').next().unwrap_or("");
                base = strip_extension(basename).to_string();
            }
        }
    }

    if base.is_empty() {
        // No URL, or a blank URL path
        base = String::from("blank_url");
    }

    // Extracted files have no Content-Type header, so the extension is
    // rebuilt from the archived media type rather than trusted from the
    // URL; see MEDIA_TYPE_EXTENSIONS in the core module.
    let extension = resource.extension();

    // "%" is an escape character in URLs, slashes are directory
    // separators, and the rest are forbidden on Windows filesystems
    for c in ['%', '<', '>', ':', '"', '/', '\\', '|', '?', '*'] {
        if base.contains(c) {
            base = base.replace(c, "_");
        }
    }

    // Windows also reserves names historically used for DOS devices;
    // extracted files may later be copied to a Windows system
    let lowered = base.to_lowercase();
    let is_reserved_name = matches!(lowered.as_str(), "con" | "prn" | "aux" | "nul")
        || (lowered.len() == 4
            && (lowered.starts_with("com") || lowered.starts_with("lpt"))
            && lowered[3..].chars().all(|c| c.is_ascii_digit()));
    if is_reserved_name {
        base.push('_');
    }

    // Append a copy number if needed to keep basenames unique
    let mut local_path = format!("{base}{extension}");
    let mut copy_num = 1;
    while taken.values().any(|existing| existing == &local_path) {
        copy_num += 1;
        local_path = format!("{base}.{copy_num}{extension}");
    }

    local_path
}

/// Strips the extension from a path basename, keeping a leading dot intact.
fn strip_extension(basename: &str) -> &str {
    match basename.rfind('.') {
        Some(index) if index > 0 => &basename[..index],
        _ => basename,
    }
}
