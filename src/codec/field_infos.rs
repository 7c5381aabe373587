//! Field-infos format: the `.fnm` file listing every field of a segment.

use crate::codec::codec_util::{self, ID_LENGTH};
use crate::error::{PilumError, Result};
use crate::index::field_info::{DocValuesType, FieldInfo, FieldInfos};
use crate::index::file_names::segment_file_name;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, delete_files_quietly};

/// Name of the field-infos format.
pub const FIELD_INFOS_FORMAT_NAME: &str = "FieldInfos10";

/// Extension of the field-infos file.
pub const FIELD_INFOS_EXTENSION: &str = "fnm";

const CODEC_NAME: &str = "FieldInfos";
const VERSION_START: u32 = 1;
const VERSION_CURRENT: u32 = VERSION_START;

const FLAG_HAS_POSTINGS: u8 = 0x01;
const KNOWN_FLAGS: u8 = FLAG_HAS_POSTINGS;

/// Reads and writes the field infos of a segment.
#[derive(Debug, Clone, Default)]
pub struct FieldInfosFormat;

impl FieldInfosFormat {
    pub fn new() -> Self {
        FieldInfosFormat
    }

    /// Name of the field-infos file of `segment`.
    pub fn file_name(&self, segment: &str, suffix: &str) -> String {
        segment_file_name(segment, suffix, FIELD_INFOS_EXTENSION)
    }

    /// Write `infos`, including each field's current attributes.
    pub fn write(
        &self,
        storage: &dyn Storage,
        segment: &str,
        segment_id: &[u8; ID_LENGTH],
        suffix: &str,
        infos: &FieldInfos,
    ) -> Result<()> {
        let name = self.file_name(segment, suffix);
        let result = (|| -> Result<()> {
            let mut out = StructWriter::new(storage.create_output(&name)?);
            codec_util::write_index_header(&mut out, CODEC_NAME, VERSION_CURRENT, segment_id, suffix)?;
            out.write_varint(infos.len() as u64)?;
            for field in infos.iter() {
                out.write_string(&field.name)?;
                out.write_varint(field.number as u64)?;
                let flags = if field.has_postings { FLAG_HAS_POSTINGS } else { 0 };
                out.write_u8(flags)?;
                out.write_u8(field.doc_values_type.code())?;
                out.write_string_map(&field.attributes())?;
            }
            codec_util::write_footer(&mut out)?;
            out.close()
        })();

        match result {
            Ok(()) => {
                log::debug!("Wrote {name}: {} fields", infos.len());
                Ok(())
            }
            Err(e) => {
                delete_files_quietly(storage, [name.as_str()]);
                Err(e)
            }
        }
    }

    /// Read the field infos of `segment`.
    pub fn read(
        &self,
        storage: &dyn Storage,
        segment: &str,
        segment_id: &[u8; ID_LENGTH],
        suffix: &str,
    ) -> Result<FieldInfos> {
        let name = self.file_name(segment, suffix);
        let mut input = StructReader::new(storage.open_input(&name)?)?;
        codec_util::check_index_header(
            &mut input,
            CODEC_NAME,
            VERSION_START,
            VERSION_CURRENT,
            segment_id,
            suffix,
        )?;

        let count = input.read_varint()?;
        // A field takes at least five bytes.
        if count.saturating_mul(5) > input.remaining() {
            return Err(PilumError::corruption(format!(
                "{name} claims {count} fields"
            )));
        }
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let field_name = input.read_string()?;
            let number = input.read_varint_u32()?;
            let flags = input.read_u8()?;
            if flags & !KNOWN_FLAGS != 0 {
                return Err(PilumError::corruption(format!(
                    "field {field_name:?} has unknown flags {flags:#04x}"
                )));
            }
            let doc_values_type = DocValuesType::from_code(input.read_u8()?)?;
            let attributes = input.read_string_map()?;
            fields.push(FieldInfo::with_attributes(
                field_name,
                number,
                doc_values_type,
                flags & FLAG_HAS_POSTINGS != 0,
                attributes,
            ));
        }
        codec_util::check_footer(&mut input)?;
        input.close()?;

        FieldInfos::new(fields).map_err(|e| PilumError::corruption(format!("{name}: {e}")))
    }
}
