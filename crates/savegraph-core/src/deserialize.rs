//! Body decoding: container bytes to typed records.
//!
//! Records and attribute values are decoded through the tag tables in
//! [`crate::schema`]. Unknown tags are skipped by their stored length and kept
//! as opaque blobs; each skip is reported as a diagnostic.

use crate::attribute::{Attribute, AttributeValue, ObjectReference};
use crate::chunk::{SaveHeader, read_container};
use crate::config::AnalysisConfig;
use crate::diagnostic::{Diagnostic, DiagnosticKind, SkipContext, TrailingContext};
use crate::error::{CorruptKind, ParseError};
use crate::id::ObjectId;
use crate::model::Transform;
use crate::reader::ByteReader;
use crate::schema::{self, AttributeKind, ROTATION_SINCE, RecordKind};

/// Maximum nesting of struct and array values.
pub const MAX_ATTRIBUTE_DEPTH: usize = 32;

/// tag u8 + id u64 + len u32.
pub const RECORD_HEADER_LEN: usize = 13;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    EntityHeader {
        class: String,
        transform: Transform,
    },
    Component {
        owner: ObjectId,
        name: String,
        attributes: Vec<Attribute>,
    },
    /// Attributes of the entity or component named by the record id.
    Properties { attributes: Vec<Attribute> },
    Unknown { tag: u8, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: ObjectId,
    /// Offset of the record header in the body.
    pub offset: u64,
    pub body: RecordBody,
    /// Unconsumed payload bytes of a known record.
    pub trailing: Vec<u8>,
}

/// Output of [`decode_save`].
#[derive(Debug, Clone)]
pub struct DecodedSave {
    pub header: SaveHeader,
    pub records: Vec<RawRecord>,
    /// Bytes after the last complete record.
    pub trailing: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Decode a complete save file.
///
/// Offsets in header and chunk errors are file offsets; offsets in record
/// errors and diagnostics are positions in the assembled body.
pub fn decode_save(bytes: &[u8], config: &AnalysisConfig) -> Result<DecodedSave, ParseError> {
    let limit = config.max_declared_size_bytes;
    let container = read_container(bytes, limit)?;
    let mut diagnostics = Vec::new();
    if container.trailing_file_bytes > 0 {
        tracing::warn!(len = container.trailing_file_bytes, "bytes after last chunk");
        diagnostics.push(Diagnostic::at(
            bytes.len() as u64 - container.trailing_file_bytes,
            DiagnosticKind::TrailingBytes {
                context: TrailingContext::File,
                len: container.trailing_file_bytes,
            },
        ));
    }
    let decoded = decode_records(
        &container.body,
        container.header.format_version,
        limit,
    )?;
    diagnostics.extend(decoded.diagnostics);
    Ok(DecodedSave {
        header: container.header,
        records: decoded.records,
        trailing: decoded.trailing,
        diagnostics,
    })
}

/// Records decoded from an assembled body.
#[derive(Debug, Clone, Default)]
pub struct DecodedRecords {
    pub records: Vec<RawRecord>,
    pub trailing: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Decode the record sequence of an assembled body.
pub fn decode_records(body: &[u8], version: u32, limit: u64) -> Result<DecodedRecords, ParseError> {
    let mut reader = ByteReader::new(body, limit);
    let mut out = DecodedRecords::default();

    while !reader.is_empty() {
        if reader.remaining() < RECORD_HEADER_LEN {
            let at = reader.offset();
            out.trailing = reader.rest().to_vec();
            out.diagnostics.push(Diagnostic::at(
                at,
                DiagnosticKind::TrailingBytes {
                    context: TrailingContext::Body,
                    len: out.trailing.len() as u64,
                },
            ));
            break;
        }
        let offset = reader.offset();
        let tag = reader.read_u8()?;
        let id = ObjectId(reader.read_u64()?);
        let len = reader.read_len()?;
        let mut payload = reader.sub_reader(len)?;

        let mut decoder = Decoder {
            version,
            diagnostics: &mut out.diagnostics,
        };
        let body = match schema::record_kind(tag, version) {
            Some(kind) => decoder.record_body(kind, &mut payload)?,
            None => {
                decoder.skip(SkipContext::Record, tag, offset, len);
                RecordBody::Unknown {
                    tag,
                    bytes: payload.rest().to_vec(),
                }
            }
        };
        let trailing = if payload.is_empty() {
            Vec::new()
        } else {
            let at = payload.offset();
            let rest = payload.rest().to_vec();
            out.diagnostics.push(Diagnostic::at(
                at,
                DiagnosticKind::TrailingBytes {
                    context: TrailingContext::Record,
                    len: rest.len() as u64,
                },
            ));
            rest
        };
        out.records.push(RawRecord {
            id,
            offset,
            body,
            trailing,
        });
    }

    tracing::debug!(
        records = out.records.len(),
        diagnostics = out.diagnostics.len(),
        "decoded body"
    );
    Ok(out)
}

// ---------------------------------------------------------------------------
// Payload decoding
// ---------------------------------------------------------------------------

struct Decoder<'d> {
    version: u32,
    diagnostics: &'d mut Vec<Diagnostic>,
}

impl Decoder<'_> {
    fn skip(&mut self, context: SkipContext, tag: u8, offset: u64, len: usize) {
        tracing::warn!(?context, tag, offset, len, "skipping unknown tag");
        self.diagnostics.push(Diagnostic::at(
            offset,
            DiagnosticKind::SkippedUnknown {
                context,
                tag,
                len: len as u64,
            },
        ));
    }

    fn record_body(
        &mut self,
        kind: RecordKind,
        r: &mut ByteReader<'_>,
    ) -> Result<RecordBody, ParseError> {
        Ok(match kind {
            RecordKind::EntityHeader => {
                let class = r.read_string()?;
                let mut position = [0f32; 3];
                for p in &mut position {
                    *p = r.read_f32()?;
                }
                let mut transform = Transform::at(position);
                if self.version >= ROTATION_SINCE {
                    for q in &mut transform.rotation {
                        *q = r.read_f32()?;
                    }
                }
                RecordBody::EntityHeader { class, transform }
            }
            RecordKind::Component => {
                let owner = ObjectId(r.read_u64()?);
                let name = r.read_string()?;
                let attributes = self.attribute_list(r, 0)?;
                RecordBody::Component {
                    owner,
                    name,
                    attributes,
                }
            }
            RecordKind::Properties => RecordBody::Properties {
                attributes: self.attribute_list(r, 0)?,
            },
        })
    }

    fn attribute_list(
        &mut self,
        r: &mut ByteReader<'_>,
        depth: usize,
    ) -> Result<Vec<Attribute>, ParseError> {
        // name length + tag + value length
        let count = r.read_count(9)?;
        let mut attributes = Vec::with_capacity(count);
        for _ in 0..count {
            let name = r.read_string()?;
            let tag_at = r.offset();
            let tag = r.read_u8()?;
            let len = r.read_len()?;
            let mut value = r.sub_reader(len)?;
            let value = self.value(tag, tag_at, &mut value, depth)?;
            attributes.push(Attribute { name, value });
        }
        Ok(attributes)
    }

    /// Decode one value that must fill `r` exactly.
    fn value(
        &mut self,
        tag: u8,
        tag_at: u64,
        r: &mut ByteReader<'_>,
        depth: usize,
    ) -> Result<AttributeValue, ParseError> {
        let declared = r.remaining() as u64;
        let Some(kind) = schema::attribute_kind(tag, self.version) else {
            self.skip(SkipContext::Attribute, tag, tag_at, r.remaining());
            return Ok(AttributeValue::Opaque {
                tag,
                bytes: r.rest().to_vec(),
            });
        };
        let nested = depth + 1;
        if matches!(kind, AttributeKind::Struct | AttributeKind::Array)
            && nested > MAX_ATTRIBUTE_DEPTH
        {
            return Err(ParseError::corrupt(
                tag_at,
                CorruptKind::NestingTooDeep {
                    limit: MAX_ATTRIBUTE_DEPTH,
                },
            ));
        }
        let at = r.offset();
        let value = match kind {
            AttributeKind::Bool => match r.read_u8()? {
                0 => AttributeValue::Bool(false),
                1 => AttributeValue::Bool(true),
                _ => return Err(ParseError::corrupt(at, CorruptKind::InvalidValue("bool"))),
            },
            AttributeKind::Int => AttributeValue::Int(r.read_i64()?),
            AttributeKind::Float => AttributeValue::Float(r.read_f32()?),
            AttributeKind::Double => AttributeValue::Double(r.read_f64()?),
            AttributeKind::Text => AttributeValue::Text(r.read_string()?),
            AttributeKind::Reference => {
                AttributeValue::Reference(ObjectReference::pending(ObjectId(r.read_u64()?)))
            }
            AttributeKind::Enum => AttributeValue::Enum {
                type_name: r.read_string()?,
                symbol: r.read_string()?,
            },
            AttributeKind::Struct => AttributeValue::Struct {
                type_name: r.read_string()?,
                fields: self.attribute_list(r, nested)?,
            },
            AttributeKind::Array => {
                let element_tag = r.read_u8()?;
                let count = r.read_count(4)?;
                let mut elements = Vec::with_capacity(count);
                for _ in 0..count {
                    let element_at = r.offset();
                    let len = r.read_len()?;
                    let mut element = r.sub_reader(len)?;
                    elements.push(self.value(element_tag, element_at, &mut element, nested)?);
                }
                AttributeValue::Array {
                    element_tag,
                    elements,
                }
            }
        };
        if !r.is_empty() {
            return Err(ParseError::corrupt(
                tag_at,
                CorruptKind::LengthMismatch {
                    declared,
                    actual: declared - r.remaining() as u64,
                },
            ));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordWriter, SaveWriter, attr};

    fn decode(bytes: &[u8]) -> Result<DecodedSave, ParseError> {
        decode_save(bytes, &AnalysisConfig::default())
    }

    #[test]
    fn decodes_entity_component_and_properties() {
        let bytes = SaveWriter::new(3)
            .entity(10, "Build_SmelterMk1_C", [1.0, 2.0, 3.0])
            .component(11, 10, "Input0", vec![attr::reference("mConnectedComponent", 21)])
            .properties(10, vec![attr::float("mCurrentPotential", 1.5)])
            .finish();
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.diagnostics.is_empty(), "{:?}", decoded.diagnostics);
        assert_eq!(decoded.records.len(), 3);
        match &decoded.records[0].body {
            RecordBody::EntityHeader { class, transform } => {
                assert_eq!(class, "Build_SmelterMk1_C");
                assert_eq!(transform.position, [1.0, 2.0, 3.0]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &decoded.records[1].body {
            RecordBody::Component { owner, name, attributes } => {
                assert_eq!(*owner, ObjectId(10));
                assert_eq!(name, "Input0");
                assert_eq!(attributes.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn v1_entity_header_has_identity_rotation() {
        let bytes = SaveWriter::new(1)
            .entity(1, "Build_MinerMk1_C", [0.0, 0.0, 0.0])
            .finish();
        let decoded = decode(&bytes).unwrap();
        match &decoded.records[0].body {
            RecordBody::EntityHeader { transform, .. } => {
                assert_eq!(transform.rotation, [0.0, 0.0, 0.0, 1.0]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(decoded.records[0].trailing.is_empty());
    }

    #[test]
    fn unknown_record_is_skipped_and_preserved() {
        let bytes = SaveWriter::new(3)
            .raw_record(0x7F, 5, &[1, 2, 3])
            .entity(6, "Build_MinerMk1_C", [0.0; 3])
            .finish();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            decoded.records[0].body,
            RecordBody::Unknown {
                tag: 0x7F,
                bytes: vec![1, 2, 3]
            }
        );
        assert!(matches!(
            decoded.diagnostics[0].kind,
            DiagnosticKind::SkippedUnknown {
                context: SkipContext::Record,
                tag: 0x7F,
                len: 3
            }
        ));
        assert_eq!(decoded.records.len(), 2);
    }

    #[test]
    fn unknown_attribute_is_opaque() {
        let bytes = SaveWriter::new(3)
            .properties(
                1,
                vec![attr::raw("mFuture", 0x42, vec![9, 9]), attr::int("mCount", 4)],
            )
            .finish();
        let decoded = decode(&bytes).unwrap();
        let RecordBody::Properties { attributes } = &decoded.records[0].body else {
            panic!("expected properties");
        };
        assert_eq!(
            attributes[0].value,
            AttributeValue::Opaque {
                tag: 0x42,
                bytes: vec![9, 9]
            }
        );
        assert_eq!(attributes[1].value, AttributeValue::Int(4));
        assert_eq!(decoded.diagnostics.len(), 1);
    }

    #[test]
    fn newer_tag_in_older_version_is_opaque() {
        let bytes = SaveWriter::new(2)
            .properties(1, vec![attr::double("mPrecise", 0.25)])
            .finish();
        let decoded = decode(&bytes).unwrap();
        let RecordBody::Properties { attributes } = &decoded.records[0].body else {
            panic!("expected properties");
        };
        assert!(matches!(attributes[0].value, AttributeValue::Opaque { tag: 0x09, .. }));
    }

    #[test]
    fn trailing_record_bytes_are_kept() {
        let mut record = RecordWriter::entity_payload(3, "Build_MinerMk1_C", [0.0; 3]);
        record.extend_from_slice(&[0xAB, 0xCD]);
        let bytes = SaveWriter::new(3).raw_record(0x01, 4, &record).finish();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.records[0].trailing, vec![0xAB, 0xCD]);
        assert!(matches!(
            decoded.diagnostics[0].kind,
            DiagnosticKind::TrailingBytes {
                context: TrailingContext::Record,
                len: 2
            }
        ));
    }

    #[test]
    fn short_tail_of_body_is_kept() {
        let mut body = RecordWriter::record(0x01, 1, &RecordWriter::entity_payload(3, "X", [0.0; 3]));
        body.extend_from_slice(&[1, 2, 3]);
        let bytes = SaveWriter::new(3).raw_body(&body).finish();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.trailing, vec![1, 2, 3]);
        assert_eq!(decoded.records.len(), 1);
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let mut body = RecordWriter::record(0x01, 1, &RecordWriter::entity_payload(3, "X", [0.0; 3]));
        body.truncate(body.len() - 4);
        let bytes = SaveWriter::new(3).raw_body(&body).finish();
        assert!(matches!(
            decode(&bytes),
            Err(ParseError::CorruptSave {
                offset: 9,
                kind: CorruptKind::Truncated { .. }
            })
        ));
    }

    #[test]
    fn record_length_over_limit_is_resource_error() {
        let mut body = vec![0x01];
        body.extend_from_slice(&1u64.to_le_bytes());
        body.extend_from_slice(&u32::MAX.to_le_bytes());
        let bytes = SaveWriter::new(3).raw_body(&body).finish();
        let config = AnalysisConfig {
            max_declared_size_bytes: 1024,
            ..AnalysisConfig::default()
        };
        assert_eq!(
            decode_save(&bytes, &config).unwrap_err(),
            ParseError::ResourceLimitExceeded {
                declared: u64::from(u32::MAX),
                limit: 1024,
                offset: 9
            }
        );
    }

    #[test]
    fn nesting_beyond_limit_is_corrupt() {
        let mut value = attr::int("leaf", 1);
        for _ in 0..=MAX_ATTRIBUTE_DEPTH {
            value = attr::structure("nest", "Nest", vec![value]);
        }
        let bytes = SaveWriter::new(3).properties(1, vec![value]).finish();
        assert!(matches!(
            decode(&bytes),
            Err(ParseError::CorruptSave {
                kind: CorruptKind::NestingTooDeep { limit: MAX_ATTRIBUTE_DEPTH },
                ..
            })
        ));
    }

    #[test]
    fn nesting_at_limit_is_accepted() {
        let mut value = attr::int("leaf", 1);
        for _ in 0..MAX_ATTRIBUTE_DEPTH {
            value = attr::structure("nest", "Nest", vec![value]);
        }
        let bytes = SaveWriter::new(3).properties(1, vec![value]).finish();
        assert!(decode(&bytes).is_ok());
    }

    #[test]
    fn invalid_bool_is_corrupt() {
        let bytes = SaveWriter::new(3)
            .properties(1, vec![attr::raw("mFlag", 0x01, vec![7])])
            .finish();
        assert!(matches!(
            decode(&bytes),
            Err(ParseError::CorruptSave {
                kind: CorruptKind::InvalidValue("bool"),
                ..
            })
        ));
    }

    #[test]
    fn value_shorter_than_declared_is_length_mismatch() {
        let bytes = SaveWriter::new(3)
            .properties(1, vec![attr::raw("mCount", 0x02, vec![0; 10])])
            .finish();
        assert!(matches!(
            decode(&bytes),
            Err(ParseError::CorruptSave {
                kind: CorruptKind::LengthMismatch { declared: 10, actual: 8 },
                ..
            })
        ));
    }

    #[test]
    fn arrays_of_references() {
        let bytes = SaveWriter::new(3)
            .properties(1, vec![attr::reference_array("mLinks", &[2, 3])])
            .finish();
        let decoded = decode(&bytes).unwrap();
        let RecordBody::Properties { attributes } = &decoded.records[0].body else {
            panic!("expected properties");
        };
        let AttributeValue::Array { elements, element_tag } = &attributes[0].value else {
            panic!("expected array");
        };
        assert_eq!(*element_tag, 0x07);
        assert_eq!(elements.len(), 2);
        assert_eq!(
            elements[1].as_reference().map(|r| r.target),
            Some(ObjectId(3))
        );
    }
}
