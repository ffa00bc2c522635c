//! Bidirectional mapping between parameter documents and engine XML.
//!
//! A parameter document is a nested mapping (parsed from YAML or JSON) with
//! up to five recognized sections: `rawFiles`, `fastaFiles`, `globalParams`,
//! `MSMSParams` and `topLevelParams`. Input files are referred to by logical
//! name only; absolute paths are substituted from [`ExtraPaths`] at the
//! moment of XML emission, so documents stay machine-independent.
//!
//! Both directions are pure tree transformations; file I/O is limited to
//! [`write_params_file`].

pub mod defaults;
pub mod schema;
pub mod sections;
pub mod value;
pub mod xml;

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{MqError, Result};
use crate::params::sections::{ROOT_TAG, SECTIONS};
use crate::params::xml::Element;

/// A parsed parameter document.
pub type ParamDoc = Map<String, Value>;

/// Paths carried alongside a document: logical name resolution for input
/// files plus the output and temporary directories.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraPaths {
    pub file_paths: HashMap<String, PathBuf>,
    pub fasta_paths: HashMap<String, PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub tmp_dir: Option<PathBuf>,
}

/// Convert a parameter document into the engine's XML tree.
///
/// Presets named under `defaults` keys are overlaid beneath the explicit
/// values first, so the produced XML always spells out every parameter.
pub fn to_xml(
    doc: &ParamDoc,
    file_paths: &HashMap<String, PathBuf>,
    fasta_paths: &HashMap<String, PathBuf>,
    output_dir: Option<&Path>,
    tmp_dir: Option<&Path>,
) -> Result<Element> {
    for key in doc.keys() {
        if !SECTIONS.iter().any(|s| s.doc_key() == Some(key.as_str())) {
            return Err(MqError::SchemaMismatch(format!("unknown section '{key}'")));
        }
    }
    let extra = ExtraPaths {
        file_paths: file_paths.clone(),
        fasta_paths: fasta_paths.clone(),
        output_dir: output_dir.map(Path::to_path_buf),
        tmp_dir: tmp_dir.map(Path::to_path_buf),
    };

    let mut root = Element::new(ROOT_TAG);
    for section in SECTIONS {
        let data = section.doc_key().and_then(|key| doc.get(key));
        section.write_into_xml(&mut root, data, &extra)?;
    }
    Ok(root)
}

/// Reconstruct a parameter document and its path data from engine XML.
pub fn from_xml(root: &Element) -> Result<(ParamDoc, ExtraPaths)> {
    if root.name != ROOT_TAG {
        return Err(MqError::XmlShape(format!(
            "expected <{ROOT_TAG}> root, found <{}>",
            root.name
        )));
    }
    let mut doc = Map::new();
    let mut extra = ExtraPaths::default();
    for section in SECTIONS {
        section.read_from_xml(root, &mut doc, &mut extra)?;
    }
    Ok((doc, extra))
}

/// Write an XML tree to disk as the engine parameter file.
pub fn write_params_file(root: &Element, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    xml::write_document(root, &mut file)?;
    file.flush()?;
    Ok(())
}
