//! Command implementations for the Pilum CLI.

use std::path::Path;
use std::sync::Arc;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::codec::segment_info::{SegmentInfoFormat, list_segments};
use crate::error::{PilumError, Result};
use crate::index::SegmentReader;
use crate::index::field_info::FieldInfoSummary;
use crate::storage::file::FileStorageConfig;
use crate::storage::{Storage, StorageConfig, StorageFactory};

/// Execute a CLI command.
pub fn execute_command(args: PilumArgs) -> Result<()> {
    match &args.command {
        Command::List(list_args) => list_segments_command(list_args, &args),
        Command::Info(segment_args) => show_segment_info(segment_args, &args),
        Command::Check(segment_args) => check_segment(segment_args, &args),
    }
}

fn open_storage(path: &Path) -> Result<Arc<dyn Storage>> {
    StorageFactory::open(StorageConfig::File(FileStorageConfig::new(path)))
        .map_err(|e| PilumError::invalid_argument(format!("cannot open {}: {e}", path.display())))
}

/// List the segments of a directory.
fn list_segments_command(args: &ListArgs, cli_args: &PilumArgs) -> Result<()> {
    log::info!("Listing segments in {}", args.path.display());
    let storage = open_storage(&args.path)?;
    let listing = build_listing(storage.as_ref(), &args.path.to_string_lossy())?;
    output_result("Segments", &listing, cli_args)
}

fn build_listing(storage: &dyn Storage, path: &str) -> Result<SegmentListing> {
    let format = SegmentInfoFormat::new();
    let mut segments = Vec::new();
    for name in list_segments(storage)? {
        let summary = match format.read(storage, &name) {
            Ok(info) => SegmentSummary {
                size_bytes: info
                    .files
                    .iter()
                    .map(|file| storage.file_size(file).unwrap_or(0))
                    .sum(),
                name,
                max_doc: Some(info.max_doc),
                codec: Some(info.codec_name),
                compound: Some(info.is_compound_file),
                error: None,
            },
            Err(e) => {
                log::warn!("Cannot read descriptor of {name}: {e}");
                SegmentSummary {
                    name,
                    max_doc: None,
                    codec: None,
                    compound: None,
                    size_bytes: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        segments.push(summary);
    }
    Ok(SegmentListing {
        path: path.to_string(),
        segments,
    })
}

/// Show the descriptor and field infos of a segment.
fn show_segment_info(args: &SegmentArgs, cli_args: &PilumArgs) -> Result<()> {
    let storage = open_storage(&args.path)?;
    let details = build_details(Arc::clone(&storage), &args.segment)?;
    output_result("Segment info", &details, cli_args)
}

fn build_details(storage: Arc<dyn Storage>, segment: &str) -> Result<SegmentDetails> {
    let reader = SegmentReader::open(Arc::clone(&storage), segment)?;
    let info = reader.info();
    let files = info
        .files
        .iter()
        .map(|name| {
            Ok(FileSummary {
                name: name.clone(),
                size_bytes: storage.file_size(name)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let details = SegmentDetails {
        name: info.name.clone(),
        id: info.id_string(),
        version: info.version.to_string(),
        max_doc: info.max_doc,
        codec: info.codec_name.clone(),
        compound: info.is_compound_file,
        diagnostics: info.diagnostics.clone(),
        files,
        fields: reader
            .field_infos()
            .iter()
            .map(|field| FieldInfoSummary::from(field.as_ref()))
            .collect(),
    };
    reader.close()?;
    Ok(details)
}

/// Open a segment and verify every checksum. Fails if anything is wrong.
fn check_segment(args: &SegmentArgs, cli_args: &PilumArgs) -> Result<()> {
    let storage = open_storage(&args.path)?;
    let report = build_check_report(storage, &args.segment);
    output_result("Integrity check", &report, cli_args)?;
    match report.error {
        None => Ok(()),
        Some(error) => Err(PilumError::corruption(format!(
            "segment {} failed the integrity check: {error}",
            args.segment
        ))),
    }
}

fn build_check_report(storage: Arc<dyn Storage>, segment: &str) -> CheckReport {
    let checked = SegmentReader::open(storage, segment).and_then(|reader| {
        let files = reader.info().files.len();
        let verified = reader.check_integrity();
        let closed = reader.close();
        verified.and(closed).map(|()| files)
    });
    match checked {
        Ok(files_checked) => CheckReport {
            segment: segment.to_string(),
            ok: true,
            files_checked,
            error: None,
        },
        Err(e) => CheckReport {
            segment: segment.to_string(),
            ok: false,
            files_checked: 0,
            error: Some(e.to_string()),
        },
    }
}
