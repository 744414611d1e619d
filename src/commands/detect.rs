//! Detect command handler.

use mnemos::io::SourceFormat;
use std::path::Path;
use std::process::ExitCode;

/// Detect command.
pub fn cmd_detect(file: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let format = SourceFormat::detect_file(file)?;
    println!("{format}");
    Ok(ExitCode::SUCCESS)
}
