//! # Webarc Library
//!
//! 用于读取Apple的.webarchive文件并将其转换为标准HTML页面的工具库。
//! 支持多文件提取（主文档 + 资源目录）和单文件内联（data URI）两种模式。
//!
//! ## 模块组织
//!
//! - `archive` - webarchive容器模型（主资源、子资源、子框架归档）
//! - `core` - 提取协调器、错误类型和主要处理逻辑
//! - `parsers` - 资源重写器（HTML、CSS）
//! - `utils` - 工具函数和实用程序
//!
//! ## Example usage
//!
//! ```no_run
//! use webarc::archive::WebArchive;
//! use webarc::core::ExtractMode;
//!
//! let archive = WebArchive::open("example.webarchive").unwrap();
//! archive.extract("example.html", ExtractMode::Linked).unwrap();
//! ```

pub mod archive;
pub mod core;
pub mod parsers;
pub mod utils;

// Re-export commonly used items for convenience
pub use archive::{UrlTarget, WebArchive, WebResource};
pub use core::{ArchiveError, ExtractHooks, ExtractMode};
