//! Import command handler.

use super::{checkpoint_store, open_store};
use mnemos::config::MnemosConfig;
use mnemos::embedding::create_embedder;
use mnemos::io::SourceFormat;
use mnemos::{
    CancellationFlag, Error, ImportProgress, ImportRequest, ImportResult, ImportResultStatus,
    ImportService, ImportStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Arguments of the import command.
pub struct ImportArgs {
    pub file: PathBuf,
    pub construct: String,
    pub source: Option<String>,
    pub resume: bool,
    pub verify: bool,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub format: Option<SourceFormat>,
}

/// Import command.
pub fn cmd_import(
    mut config: MnemosConfig,
    args: ImportArgs,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if let Some(batch_size) = args.batch_size {
        config.pipeline.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        config.pipeline.embed_workers = workers;
    }

    let embedder = create_embedder(&config.embedding)?;
    let store = Arc::new(open_store(&config)?);
    let checkpoints = Arc::new(checkpoint_store(&config));

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted: pausing after the current batch...");
        on_interrupt.cancel();
    })?;

    let service = ImportService::new(store, embedder, checkpoints, config.pipeline)?
        .with_cancellation(cancel)
        .with_progress_callback(print_progress);

    let mut request = ImportRequest::new(args.file, args.construct)
        .with_resume(args.resume)
        .with_verify_after_batch(args.verify);
    if let Some(source) = args.source {
        request = request.with_source_name(source);
    }
    if let Some(format) = args.format {
        request = request.with_format(format);
    }

    match service.import_conversation(request) {
        Ok(result) => {
            print_summary(&result);
            match result.status {
                ImportResultStatus::AlreadyCompleted => {
                    println!("Already imported. Use --no-resume to import again.");
                },
                ImportResultStatus::Paused => {
                    println!("Paused. Run the same command again to resume.");
                },
                ImportResultStatus::Completed | ImportResultStatus::Failed => {},
            }
            Ok(ExitCode::SUCCESS)
        },
        Err(Error::ImportFailed { cause, result }) => {
            print_summary(&result);
            eprintln!("Import failed: {cause}");
            eprintln!("Fix the problem and run the same command again to resume.");
            Ok(ExitCode::FAILURE)
        },
        Err(e) => Err(e.into()),
    }
}

fn print_progress(progress: &ImportProgress) {
    if progress.total_lines == 0 {
        return;
    }
    eprint!(
        "\r  {:>5.1}%  {}/{} messages, {} batches",
        progress.fraction_done() * 100.0,
        progress.processed_lines,
        progress.total_lines,
        progress.batches_completed
    );
    if progress.status != ImportStatus::InProgress {
        eprintln!();
    }
}

fn print_summary(result: &ImportResult) {
    println!("Import {}:", result.status);
    println!("  Messages in file: {}", result.total_messages);
    println!("  Imported: {}", result.imported_messages);
    println!("  Duplicates skipped: {}", result.skipped_duplicates);
    println!("  Batches: {}", result.batches);
    println!(
        "  Elapsed: {:.2}s ({:.1} messages/s)",
        result.elapsed_seconds, result.rate
    );
}
