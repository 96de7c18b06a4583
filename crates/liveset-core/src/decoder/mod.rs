//! Project container decoder.
//!
//! A container is a gzip-compressed XML document. [`decode`] verifies the
//! gzip magic, inflates, reads the XML into an element tree, and runs the
//! independent field extractors in [`fields`]. It only ever reads the
//! bytes it is handed.
//!
//! Failure is split in two tiers: a container that cannot be opened at
//! all is a [`FormatError`]; anything less (an unreadable field, a
//! truncated stream with usable content, an unfamiliar root element)
//! becomes a [`ParseWarning`](crate::models::ParseWarning) on an otherwise
//! normal record.

pub mod fields;
pub mod tempo;
pub mod tree;

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;

use crate::models::{ParseWarning, ProjectMetadata};

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("not a project container: bad compression magic")]
    BadMagic,
    #[error("decompression failed: {0}")]
    Decompress(String),
    #[error("malformed XML: {0}")]
    Xml(String),
    #[error("container holds no document")]
    Empty,
}

/// True when `bytes` start with the gzip magic.
pub fn has_container_magic(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

/// Decodes one container. `project_dir` anchors relative sample paths.
pub fn decode(bytes: &[u8], project_dir: Option<&Path>) -> Result<ProjectMetadata, FormatError> {
    if !has_container_magic(bytes) {
        return Err(FormatError::BadMagic);
    }

    let mut xml = Vec::new();
    let mut container_warning = None;
    if let Err(e) = GzDecoder::new(bytes).read_to_end(&mut xml) {
        if xml.is_empty() {
            return Err(FormatError::Decompress(e.to_string()));
        }
        container_warning = Some(ParseWarning::new(
            "container",
            format!("stream truncated after {} bytes: {}", xml.len(), e),
        ));
    }
    if xml.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(FormatError::Empty);
    }

    let doc = tree::parse(&xml)?;
    let mut meta = fields::extract(&doc.root, project_dir);

    let mut leading = Vec::new();
    leading.extend(container_warning);
    if let Some(reason) = doc.truncated {
        leading.push(ParseWarning::new("xml", format!("document cut short: {}", reason)));
    }
    if !leading.is_empty() {
        leading.append(&mut meta.parse_warnings);
        meta.parse_warnings = leading;
    }
    Ok(meta)
}

#[cfg(test)]
pub(crate) mod test_support {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub fn gzip(xml: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(xml.as_bytes()).unwrap();
        enc.finish().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::gzip;
    use super::*;

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Ableton MajorVersion="5" MinorVersion="11.0_433" Creator="Ableton Live 11.3.4">
  <LiveSet>
    <Tracks><AudioTrack/><MidiTrack/></Tracks>
    <MasterTrack><DeviceChain><Mixer>
      <Tempo><Manual Value="126"/></Tempo>
      <TimeSignature><TimeSignatures><RemoteableTimeSignature>
        <Numerator Value="4"/><Denominator Value="4"/>
      </RemoteableTimeSignature></TimeSignatures></TimeSignature>
    </Mixer></DeviceChain></MasterTrack>
  </LiveSet>
</Ableton>"#;

    #[test]
    fn decodes_minimal_container() {
        let meta = decode(&gzip(MINIMAL), None).unwrap();
        assert_eq!(meta.tempo, Some(126.0));
        assert_eq!(meta.tracks.total(), 2);
        assert_eq!(meta.creator.as_deref(), Some("Ableton Live 11.3.4"));
        assert!(meta.has_master_track);
        assert!(meta.parse_warnings.is_empty(), "{:?}", meta.parse_warnings);
    }

    #[test]
    fn rejects_plain_xml() {
        assert!(matches!(
            decode(MINIMAL.as_bytes(), None),
            Err(FormatError::BadMagic)
        ));
        assert!(matches!(decode(&[0x1f], None), Err(FormatError::BadMagic)));
    }

    #[test]
    fn rejects_corrupt_stream() {
        let bytes = [0x1f, 0x8b, 0x00, 0x00, 0xde, 0xad];
        assert!(matches!(
            decode(&bytes, None),
            Err(FormatError::Decompress(_))
        ));
    }

    #[test]
    fn empty_document_is_an_error() {
        assert!(matches!(decode(&gzip("  \n"), None), Err(FormatError::Empty)));
    }

    #[test]
    fn truncated_stream_yields_partial_record() {
        // Enough payload that the deflate stream emits output before the cut.
        let mut xml = String::from(r#"<Ableton><LiveSet><Tracks>"#);
        for _ in 0..2000 {
            xml.push_str("<AudioTrack/>");
        }
        xml.push_str("</Tracks></LiveSet></Ableton>");
        let full = gzip(&xml);
        let cut = &full[..full.len() - 12];

        let meta = decode(cut, None).unwrap();
        assert!(meta
            .parse_warnings
            .iter()
            .any(|w| w.field == "container" || w.field == "xml"));
        assert!(meta.tracks.audio > 0);
    }
}
