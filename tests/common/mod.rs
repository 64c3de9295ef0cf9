// 集成测试公共模块
//
// 提供构建测试用webarchive的辅助工具

use std::path::Path;

use plist::{Dictionary, Value};

/// 构建单个资源的plist字典
pub fn resource_value(url: &str, media_type: &str, data: &[u8]) -> Value {
    let mut dict = Dictionary::new();
    dict.insert("WebResourceURL".to_string(), Value::String(url.to_string()));
    dict.insert(
        "WebResourceMIMEType".to_string(),
        Value::String(media_type.to_string()),
    );
    dict.insert("WebResourceData".to_string(), Value::Data(data.to_vec()));
    Value::Dictionary(dict)
}

/// 构建带文本编码的资源plist字典
pub fn resource_value_with_encoding(
    url: &str,
    media_type: &str,
    data: &[u8],
    encoding: &str,
) -> Value {
    let mut value = resource_value(url, media_type, data);
    if let Value::Dictionary(dict) = &mut value {
        dict.insert(
            "WebResourceTextEncodingName".to_string(),
            Value::String(encoding.to_string()),
        );
    }
    value
}

/// 构建归档plist
pub fn archive_value(main: Value, subresources: Vec<Value>, subframes: Vec<Value>) -> Value {
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

/// 将归档plist写为XML格式的webarchive文件
pub fn write_archive(path: &Path, value: &Value) {
    value.to_file_xml(path).unwrap();
}

/// 带图片、样式表和链接的示例归档
pub fn sample_page() -> Value {
    let main_html = concat!(
        r#"<html><head><link rel="stylesheet" href="css/site.css"></head>"#,
        r#"<body><img src="pic.png"><a href="/about">About</a></body></html>"#,
    );

    archive_value(
        resource_value_with_encoding(
            "https://x/index.html",
            "text/html",
            main_html.as_bytes(),
            "utf-8",
        ),
        vec![
            resource_value("https://x/pic.png", "image/png", b"PNGDATA"),
            resource_value_with_encoding(
                "https://x/css/site.css",
                "text/css",
                b"body{background:url(bg.png)}",
                "utf-8",
            ),
            resource_value("https://x/css/bg.png", "image/png", b"BGDATA"),
        ],
        vec![],
    )
}

/// 带一个子框架归档的示例归档
pub fn sample_page_with_frame() -> Value {
    let frame = archive_value(
        resource_value(
            "https://x/frame.html",
            "text/html",
            br#"<html><body><img src="inner.png"></body></html>"#,
        ),
        vec![resource_value("https://x/inner.png", "image/png", b"INNER")],
        vec![],
    );

    archive_value(
        resource_value(
            "https://x/index.html",
            "text/html",
            br#"<html><body><iframe src="frame.html"></iframe></body></html>"#,
        ),
        vec![],
        vec![frame],
    )
}
