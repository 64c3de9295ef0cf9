//! webarc 命令行入口
//!
//! 将Apple的.webarchive文件转换为标准HTML页面。默认生成主文档加
//! 资源目录的多文件形式，`--single-file`生成单一自包含文件。

use std::path::PathBuf;
use std::process;

use clap::Parser;

use webarc::archive::WebArchive;
use webarc::core::{print_error_message, print_info_message, ExtractHooks, ExtractMode};

#[derive(Parser)]
#[command(
    name = "webarc",
    version,
    about = "Convert Apple webarchive files into standard HTML pages"
)]
struct Cli {
    /// Path of the webarchive file to convert
    input: PathBuf,

    /// Output path for the converted HTML document
    /// [default: the input filename with an .html extension]
    output: Option<PathBuf>,

    /// Embed subresources as data URLs, producing one self-contained file
    #[arg(short = 's', long)]
    single_file: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        tracing::Level::ERROR
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension("html"));
    let mode = if cli.single_file {
        ExtractMode::Embedded
    } else {
        ExtractMode::Linked
    };

    let archive = match WebArchive::open(&cli.input) {
        Ok(archive) => archive,
        Err(e) => {
            print_error_message(&format!("Error: {e}"));
            process::exit(1);
        }
    };

    let total = archive.resource_count();
    let mut processed = 0usize;
    let quiet = cli.quiet;
    let mut hooks = ExtractHooks::new().on_before(|resource, destination| {
        processed += 1;
        if !quiet {
            print_info_message(&format!(
                "[{processed}/{total}] {} -> {}",
                resource.url(),
                destination.display()
            ));
        }
    });

    if let Err(e) = archive.extract_with_hooks(&output_path, mode, &mut hooks) {
        print_error_message(&format!("Error: {e}"));
        process::exit(1);
    }

    if !cli.quiet {
        print_info_message(&format!(
            "Converted {} to {}",
            cli.input.display(),
            output_path.display()
        ));
    }
}
