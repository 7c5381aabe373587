//! Output formatting for CLI commands.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::cli::args::{OutputFormat, PilumArgs};
use crate::error::Result;
use crate::index::field_info::FieldInfoSummary;

/// Result of `pilum list`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentListing {
    pub path: String,
    pub segments: Vec<SegmentSummary>,
}

/// One line of a segment listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub name: String,
    pub max_doc: Option<u32>,
    pub codec: Option<String>,
    pub compound: Option<bool>,
    pub size_bytes: u64,
    /// Why the descriptor could not be read, if it could not.
    pub error: Option<String>,
}

/// Result of `pilum info`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentDetails {
    pub name: String,
    pub id: String,
    pub version: String,
    pub max_doc: u32,
    pub codec: String,
    pub compound: bool,
    pub diagnostics: BTreeMap<String, String>,
    pub files: Vec<FileSummary>,
    pub fields: Vec<FieldInfoSummary>,
}

/// A file and its size.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileSummary {
    pub name: String,
    pub size_bytes: u64,
}

/// Result of `pilum check`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckReport {
    pub segment: String,
    pub ok: bool,
    pub files_checked: usize,
    pub error: Option<String>,
}

/// Plain-text rendering of a command result.
pub trait HumanReadable {
    fn write_human(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl HumanReadable for SegmentListing {
    fn write_human(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.segments.is_empty() {
            return writeln!(out, "No segments found in {}", self.path);
        }
        writeln!(out, "Segments in {}:", self.path)?;
        for segment in &self.segments {
            match &segment.error {
                Some(error) => writeln!(out, "  {}  ERROR: {error}", segment.name)?,
                None => writeln!(
                    out,
                    "  {}  docs={}  codec={}  compound={}  size={}",
                    segment.name,
                    segment.max_doc.unwrap_or(0),
                    segment.codec.as_deref().unwrap_or("?"),
                    segment.compound.unwrap_or(false),
                    format_bytes(segment.size_bytes)
                )?,
            }
        }
        Ok(())
    }
}

impl HumanReadable for SegmentDetails {
    fn write_human(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Segment {}", self.name)?;
        writeln!(out, "  id:        {}", self.id)?;
        writeln!(out, "  version:   {}", self.version)?;
        writeln!(out, "  docs:      {}", self.max_doc)?;
        writeln!(out, "  codec:     {}", self.codec)?;
        writeln!(out, "  compound:  {}", self.compound)?;

        writeln!(out)?;
        writeln!(out, "Diagnostics:")?;
        for (key, value) in &self.diagnostics {
            writeln!(out, "  {key} = {value}")?;
        }

        writeln!(out)?;
        writeln!(out, "Files:")?;
        for file in &self.files {
            writeln!(out, "  {:<32} {}", file.name, format_bytes(file.size_bytes))?;
        }

        writeln!(out)?;
        writeln!(out, "Fields:")?;
        for field in &self.fields {
            writeln!(
                out,
                "  #{} {}  doc_values={}  postings={}",
                field.number, field.name, field.doc_values_type, field.has_postings
            )?;
            for (key, value) in &field.attributes {
                writeln!(out, "      {key} = {value}")?;
            }
        }
        Ok(())
    }
}

impl HumanReadable for CheckReport {
    fn write_human(&self, out: &mut dyn Write) -> io::Result<()> {
        match &self.error {
            None => writeln!(
                out,
                "Segment {} OK ({} files verified)",
                self.segment, self.files_checked
            ),
            Some(error) => writeln!(out, "Segment {} FAILED: {error}", self.segment),
        }
    }
}

/// Output a result in the format selected on the command line.
pub fn output_result<T>(message: &str, result: &T, args: &PilumArgs) -> Result<()>
where
    T: Serialize + HumanReadable,
{
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_result(&mut out, message, result, args)
}

/// Write a result to `out`.
pub fn write_result<T>(out: &mut dyn Write, message: &str, result: &T, args: &PilumArgs) -> Result<()>
where
    T: Serialize + HumanReadable,
{
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 1 {
                writeln!(out, "{message}")?;
                writeln!(out)?;
            }
            result.write_human(out)?;
        }
        OutputFormat::Json => {
            let json = if args.pretty {
                serde_json::to_string_pretty(result)?
            } else {
                serde_json::to_string(result)?
            };
            writeln!(out, "{json}")?;
        }
    }
    Ok(())
}

/// Format a byte count with a binary unit.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit_index])
    }
}
