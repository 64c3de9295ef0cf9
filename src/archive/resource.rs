use encoding_rs::Encoding;
use plist::Dictionary;

use crate::core::{
    extension_for_media_type, is_html_media_type, is_plaintext_media_type, ArchiveError,
};
use crate::utils::url::{create_data_url, Url};

/// A single archived resource: the raw payload plus the metadata Safari
/// recorded alongside it (URL, media type, text encoding, frame name).
#[derive(Debug, Clone)]
pub struct WebResource {
    url: String,
    media_type: String,
    data: Vec<u8>,
    text_encoding: Option<String>,
    frame_name: Option<String>,
}

impl WebResource {
    /// Reads a resource out of its property list dictionary.
    ///
    /// Missing keys degrade to empty values rather than fail; archives in
    /// the wild omit `TextEncodingName` routinely and occasionally lack a
    /// URL or media type.
    pub fn from_plist(dict: &Dictionary) -> WebResource {
        let url = dict
            .get("WebResourceURL")
            .and_then(|v| v.as_string())
            .unwrap_or_default()
            .to_string();
        let media_type = dict
            .get("WebResourceMIMEType")
            .and_then(|v| v.as_string())
            .unwrap_or_default()
            .to_string();
        let data = dict
            .get("WebResourceData")
            .and_then(|v| v.as_data())
            .map(|d| d.to_vec())
            .unwrap_or_default();
        let text_encoding = dict
            .get("WebResourceTextEncodingName")
            .and_then(|v| v.as_string())
            .map(|s| s.to_lowercase())
            // Textual resources always expose an encoding; utf-8 when
            // the archive does not record one
            .or_else(|| is_plaintext_media_type(&media_type).then(|| String::from("utf-8")));
        let frame_name = dict
            .get("WebResourceFrameName")
            .and_then(|v| v.as_string())
            .map(|s| s.to_string());

        WebResource {
            url,
            media_type,
            data,
            text_encoding,
            frame_name,
        }
    }

    /// The URL this resource was archived from
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The media (MIME) type recorded for this resource
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The raw payload bytes
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The recorded text encoding label, normalized to lowercase
    pub fn text_encoding(&self) -> Option<&str> {
        self.text_encoding.as_deref()
    }

    /// The name of the frame this resource was loaded into, if any
    pub fn frame_name(&self) -> Option<&str> {
        self.frame_name.as_deref()
    }

    /// Tells whether this resource is an HTML document
    pub fn is_html(&self) -> bool {
        is_html_media_type(&self.media_type)
    }

    /// Tells whether this resource is a CSS style sheet
    pub fn is_stylesheet(&self) -> bool {
        self.media_type.eq_ignore_ascii_case("text/css")
    }

    /// Tells whether this resource holds text rather than binary data
    pub fn is_textual(&self) -> bool {
        is_plaintext_media_type(&self.media_type)
    }

    /// The preferred file extension for this resource's media type, or an
    /// empty string when the media type is unknown
    pub fn extension(&self) -> &'static str {
        extension_for_media_type(&self.media_type)
    }

    /// Decodes the payload to text using the recorded encoding.
    ///
    /// Textual resources without a recorded encoding are decoded as UTF-8;
    /// so are resources whose recorded label names an encoding this crate
    /// does not know. Malformed byte sequences become replacement
    /// characters instead of failing the decode.
    pub fn text(&self) -> Result<String, ArchiveError> {
        if !self.is_textual() {
            return Err(ArchiveError::UnsupportedConversion(format!(
                "resource '{}' of media type '{}' has no text representation",
                self.url, self.media_type
            )));
        }

        let label = self.text_encoding.as_deref().unwrap_or("utf-8");
        let encoding = Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = encoding.decode(&self.data);

        Ok(text.into_owned())
    }

    /// Renders this resource as a base64 data URL
    pub fn to_data_url(&self) -> Url {
        create_data_url(&self.media_type, &self.data)
    }
}
