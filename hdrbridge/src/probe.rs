use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;
use quick_xml::{Reader, escape::resolve_xml_entity, events::Event};

use crate::error::{Error, Result};
use crate::gateway::{Invocation, ToolGateway, ToolRunner};

/// Tags requested from the metadata reader, in one invocation.
const REQUESTED_TAGS: &[&str] = &[
    "ImageWidth",
    "ImageHeight",
    "TransferCharacteristics",
    "ColorSpace",
    "ColorPrimaries",
    "PrimaryChromaticities",
    "ProfileDescription",
    "ICCProfileName",
    "HDRHeadroom",
    "HDRGain",
];

const PLACEHOLDERS: &[&str] = &["unknown", "n/a", "uncalibrated", "none", "undefined"];

/// Colour-adjacent tags in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorTags {
    pub color_space: Option<String>,
    pub color_primaries: Option<String>,
    pub chromaticities: Option<String>,
    pub profile_description: Option<String>,
    pub icc_name: Option<String>,
}

impl ColorTags {
    /// Present values, in order.
    pub fn present(&self) -> impl Iterator<Item = &str> {
        [
            &self.color_space,
            &self.color_primaries,
            &self.chromaticities,
            &self.profile_description,
            &self.icc_name,
        ]
        .into_iter()
        .filter_map(|v| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

/// What the metadata reader told us about one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetDescriptor {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub transfer_tag: Option<String>,
    pub color_tags: ColorTags,
    /// Apple maker-note `HDRHeadroom`.
    pub hdr_headroom: Option<f64>,
    /// Apple maker-note `HDRGain`.
    pub hdr_gain: Option<f64>,
}

impl AssetDescriptor {
    fn from_records(path: &Path, records: &BTreeMap<String, String>) -> Result<Self> {
        let text = |key: &str| records.get(key).cloned();
        let dimension = |key: &str| {
            records
                .get(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
        };
        let float = |key: &str| {
            records
                .get(key)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
        };

        let (Some(width), Some(height)) = (dimension("ImageWidth"), dimension("ImageHeight"))
        else {
            return Err(Error::DimensionsUnavailable {
                path: path.to_path_buf(),
            });
        };

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            transfer_tag: text("TransferCharacteristics"),
            color_tags: ColorTags {
                color_space: text("ColorSpace"),
                color_primaries: text("ColorPrimaries"),
                chromaticities: text("PrimaryChromaticities"),
                profile_description: text("ProfileDescription"),
                icc_name: text("ICCProfileName"),
            },
            hdr_headroom: float("HDRHeadroom"),
            hdr_gain: float("HDRGain"),
        })
    }
}

/// `None` for empty strings and the reader's placeholder values.
pub fn normalize_tag(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || PLACEHOLDERS
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn probe_invocation(exiftool: &str, path: &Path) -> Invocation {
    Invocation::new(exiftool)
        .arg("-X")
        .args(REQUESTED_TAGS.iter().map(|t| format!("-{t}")))
        .arg(path)
}

/// Query dimensions and colour/transfer tags for `path`.
pub fn probe<R: ToolRunner>(
    gateway: &ToolGateway<R>,
    exiftool: &str,
    path: &Path,
) -> Result<AssetDescriptor> {
    let output = gateway.invoke(&probe_invocation(exiftool, path))?;
    let records = parse_rdf_records(&output.stdout)?;
    debug!("{}: {records:?}", path.display());
    AssetDescriptor::from_records(path, &records)
}

/// Flatten the reader's RDF/XML into `local-name -> value`.
///
/// The first non-placeholder value of a name wins. Output without an
/// `rdf:Description` record is rejected.
pub fn parse_rdf_records(xml: &str) -> Result<BTreeMap<String, String>> {
    let bad = |e: &dyn std::fmt::Display| Error::shape(format!("metadata reader XML: {e}"));

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut records = BTreeMap::new();
    let mut saw_description = false;
    let mut in_description = false;
    let mut current: Option<String> = None;
    let mut nested = 0usize;
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(|e| bad(&e))? {
            Event::Start(e) => {
                if e.name().as_ref() == b"rdf:Description" {
                    saw_description = true;
                    in_description = true;
                } else if in_description {
                    if current.is_none() {
                        let key = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                        current = Some(key);
                        text.clear();
                    } else {
                        nested += 1;
                    }
                }
            }
            Event::Empty(e) if e.name().as_ref() == b"rdf:Description" => {
                saw_description = true;
            }
            Event::Text(t) if current.is_some() => {
                text.push_str(&t.decode().map_err(|e| bad(&e))?);
            }
            Event::GeneralRef(r) if current.is_some() => {
                let name = r.decode().map_err(|e| bad(&e))?;
                if let Some(ch) = r.resolve_char_ref().map_err(|e| bad(&e))? {
                    text.push(ch);
                } else if let Some(resolved) = resolve_xml_entity(&name) {
                    text.push_str(resolved);
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == b"rdf:Description" {
                    in_description = false;
                } else if nested > 0 {
                    nested -= 1;
                    text.push(' ');
                } else if let Some(key) = current.take() {
                    if let Some(value) = normalize_tag(&text) {
                        records.entry(key).or_insert(value);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_description {
        return Err(Error::shape("metadata reader output has no rdf:Description"));
    }
    Ok(records)
}
