//! Segment descriptor format: the `.si` file that names every other file of a
//! segment.

use crate::codec::codec_util::{self, ID_LENGTH};
use crate::error::{PilumError, Result};
use crate::index::file_names::{self, SEGMENT_INFO_EXTENSION, segment_file_name};
use crate::index::segment_info::{SegmentInfo, Version};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, delete_files_quietly};

/// Name of the segment descriptor format.
pub const SEGMENT_INFO_FORMAT_NAME: &str = "SegmentInfo10";

const CODEC_NAME: &str = "SegmentInfo";
const VERSION_START: u32 = 1;
const VERSION_CURRENT: u32 = VERSION_START;

/// Reads and writes segment descriptors.
#[derive(Debug, Clone, Default)]
pub struct SegmentInfoFormat;

impl SegmentInfoFormat {
    pub fn new() -> Self {
        SegmentInfoFormat
    }

    /// Name of the descriptor file of `segment`.
    pub fn file_name(&self, segment: &str) -> String {
        segment_file_name(segment, "", SEGMENT_INFO_EXTENSION)
    }

    /// Write the descriptor of `info`.
    ///
    /// The descriptor's own name is added to `info.files` before it is
    /// written, so the stored file set is complete.
    pub fn write(&self, storage: &dyn Storage, info: &mut SegmentInfo) -> Result<()> {
        if info.version.major < Version::MIN_SUPPORTED_MAJOR {
            return Err(PilumError::consistency(format!(
                "cannot write segment {} with version {}: oldest supported major is {}",
                info.name,
                info.version,
                Version::MIN_SUPPORTED_MAJOR
            )));
        }
        info.check_file_names(info.files.iter())?;
        let name = self.file_name(&info.name);
        info.add_file(name.clone())?;

        let result = (|| -> Result<()> {
            let mut out = StructWriter::new(storage.create_output(&name)?);
            codec_util::write_header(&mut out, CODEC_NAME, VERSION_CURRENT)?;
            out.write_u32(info.version.major)?;
            out.write_u32(info.version.minor)?;
            out.write_u32(info.version.bugfix)?;
            out.write_u32(info.max_doc)?;
            out.write_u8(u8::from(info.is_compound_file))?;
            out.write_string(&info.codec_name)?;
            out.write_string_map(&info.diagnostics)?;
            out.write_string_set(&info.files)?;
            out.write_raw(&info.id)?;
            codec_util::write_footer(&mut out)?;
            out.close()
        })();

        match result {
            Ok(()) => {
                log::debug!(
                    "Wrote {name}: {} docs, {} files, compound={}",
                    info.max_doc,
                    info.files.len(),
                    info.is_compound_file
                );
                Ok(())
            }
            Err(e) => {
                delete_files_quietly(storage, [name.as_str()]);
                Err(e)
            }
        }
    }

    /// Read the descriptor of `segment`.
    pub fn read(&self, storage: &dyn Storage, segment: &str) -> Result<SegmentInfo> {
        let name = self.file_name(segment);
        let mut input = StructReader::new(storage.open_input(&name)?)?;
        codec_util::check_header(&mut input, CODEC_NAME, VERSION_START, VERSION_CURRENT)?;

        let version = Version::new(input.read_u32()?, input.read_u32()?, input.read_u32()?);
        if !version.is_supported() {
            return Err(PilumError::corruption(format!(
                "{name}: unsupported version {version}, expected major in [{}, {}]",
                Version::MIN_SUPPORTED_MAJOR,
                Version::LATEST.major
            )));
        }
        let max_doc = input.read_u32()?;
        let is_compound_file = match input.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(PilumError::corruption(format!(
                    "{name}: invalid compound flag {other}"
                )));
            }
        };
        let codec_name = input.read_string()?;
        let diagnostics = input.read_string_map()?;
        let files = input.read_string_set()?;
        let mut id = [0u8; ID_LENGTH];
        input.read_raw_into(&mut id)?;
        codec_util::check_footer(&mut input)?;
        input.close()?;

        let mut info = SegmentInfo::new(
            segment,
            max_doc,
            is_compound_file,
            codec_name,
            diagnostics,
            id,
        );
        info.version = version;
        info.set_files(files)
            .map_err(|e| PilumError::corruption(format!("{name}: {e}")))?;
        log::debug!("Read {name}: {} docs, codec {}", info.max_doc, info.codec_name);
        Ok(info)
    }
}

/// Names of the segments in `storage` that have a descriptor, oldest first.
pub fn list_segments(storage: &dyn Storage) -> Result<Vec<String>> {
    let mut segments: Vec<(u64, String)> = storage
        .list_files()?
        .into_iter()
        .filter(|file| file_names::file_extension(file) == Some(SEGMENT_INFO_EXTENSION))
        .filter_map(|file| {
            let segment = file_names::parse_segment_name(&file).to_string();
            match file_names::parse_generation(&segment) {
                Ok(generation) if segment_file_name(&segment, "", SEGMENT_INFO_EXTENSION) == file => {
                    Some((generation, segment))
                }
                _ => {
                    log::trace!("Ignoring {file}: not a segment descriptor");
                    None
                }
            }
        })
        .collect();
    segments.sort();
    Ok(segments.into_iter().map(|(_, segment)| segment).collect())
}
