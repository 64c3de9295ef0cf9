//! # 工具模块
//!
//! 这个模块包含各种工具函数和实用程序：
//!
//! - URL处理和解析工具
//! - 数据URL创建
//!
//! # 模块组织
//!
//! - `url` - URL解析、相对引用解析、数据URL等工具函数

pub mod url;

// Re-export commonly used items for convenience
pub use url::{create_data_url, is_url_and_has_protocol, resolve_url, Url};
