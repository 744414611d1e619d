//! Checkpoint command handlers.

use super::{checkpoint_store, resolve_file};
use mnemos::config::MnemosConfig;
use mnemos::{CheckpointStore, ImportProgress};
use std::path::Path;
use std::process::ExitCode;

/// Status command.
pub fn cmd_status(
    config: &MnemosConfig,
    file: &Path,
    construct: &str,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let file = resolve_file(file)?;
    let Some(progress) = checkpoint_store(config).load(construct, &file)? else {
        println!("No checkpoint for {} in construct {construct}", file.display());
        return Ok(ExitCode::SUCCESS);
    };

    println!("Checkpoint");
    println!("==========");
    println!("  Construct: {}", progress.construct_id);
    println!("  File: {}", progress.file_path.display());
    println!("  Source: {}", progress.source_name);
    println!("  Status: {}", progress.status);
    println!(
        "  Processed: {}/{} ({:.1}%)",
        progress.processed_lines,
        progress.total_lines,
        progress.fraction_done() * 100.0
    );
    println!("  Batches: {}", progress.batches_completed);
    println!("  Committed: {}", progress.messages_committed);
    println!("  Duplicates skipped: {}", progress.duplicates_skipped);
    println!("  Started: {}", progress.start_time.to_rfc3339());
    println!("  Updated: {}", progress.last_update_time.to_rfc3339());
    if let Some(hash) = &progress.last_batch_content_hash {
        println!("  Last batch hash: {hash}");
    }
    if let Some(run_id) = &progress.run_id {
        println!("  Last run: {run_id}");
    }
    if let Some(error) = &progress.error_message {
        println!("  Error: {error}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Checkpoints command without `--clear`.
pub fn cmd_list_checkpoints(config: &MnemosConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let store = checkpoint_store(config);
    let checkpoints = store.list()?;
    if checkpoints.is_empty() {
        println!("No checkpoints in {}", store.dir().display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:<20} {:<18} {:>9} {:>9}  FILE", "CONSTRUCT", "STATUS", "DONE", "TOTAL");
    for progress in &checkpoints {
        print_row(progress);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_row(progress: &ImportProgress) {
    println!(
        "{:<20} {:<18} {:>9} {:>9}  {}",
        progress.construct_id,
        progress.status,
        progress.processed_lines,
        progress.total_lines,
        progress.file_path.display()
    );
}

/// Checkpoints command with `--clear`.
pub fn cmd_clear_checkpoint(
    config: &MnemosConfig,
    file: &Path,
    construct: &str,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let file = resolve_file(file)?;
    if checkpoint_store(config).clear(construct, &file)? {
        println!("Cleared checkpoint for {} in construct {construct}", file.display());
    } else {
        println!("No checkpoint for {} in construct {construct}", file.display());
    }
    Ok(ExitCode::SUCCESS)
}
