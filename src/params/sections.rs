//! Section writers for the engine parameter file.
//!
//! Each writer owns one subsection of the document and knows how to place it
//! in the XML tree and how to read it back. Most sections go through the
//! generic schema-driven object codec; `rawFiles` and `fastaFiles` have
//! custom shapes because the engine flattens them into parallel lists.

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::error::{MqError, Result};
use crate::params::defaults::overlay_section;
use crate::params::schema::{self, SchemaNode, SchemaType};
use crate::params::value::{decode, encode_scalar};
use crate::params::xml::Element;
use crate::params::ExtraPaths;

pub const ROOT_TAG: &str = "MaxQuantParams";

/// Fields of an msmsParamsArray entry that are written as child elements
/// holding a single number; everything else becomes an XML attribute.
const TOLERANCE_FIELDS: &[&str] = &["Tolerance", "DeNovoTolerance"];

pub(crate) trait Section {
    /// Key of this section in the parameter document, if it has one.
    fn doc_key(&self) -> Option<&'static str>;

    fn write_into_xml(
        &self,
        root: &mut Element,
        data: Option<&Value>,
        extra: &ExtraPaths,
    ) -> Result<()>;

    fn read_from_xml(
        &self,
        root: &Element,
        doc: &mut Map<String, Value>,
        extra: &mut ExtraPaths,
    ) -> Result<()>;
}

pub(crate) const SECTIONS: [&dyn Section; 6] = [
    &MsmsSection,
    &GlobalSection,
    &RawFilesSection,
    &OutputSection,
    &FastaSection,
    &TopLevelSection,
];

/// Sections that may be omitted from the document behave as if they
/// contained only a `defaults: default` selector.
fn merge_or_default(section: &str, data: Option<&Value>) -> Result<Map<String, Value>> {
    let merged = match data {
        Some(value) => overlay_section(section, value)?,
        None => overlay_section(section, &serde_json::json!({ "defaults": "default" }))?,
    };
    match merged {
        Value::Object(map) => Ok(map),
        _ => Err(MqError::SchemaMismatch(format!(
            "section '{section}' must be a mapping"
        ))),
    }
}

fn is_ignored(node: &SchemaNode, ignore: &[&str]) -> bool {
    node.id.as_deref().is_some_and(|id| ignore.contains(&id))
}

/// Generic schema-driven writer for a flat object section.
fn write_object(
    parent: &mut Element,
    data: &Map<String, Value>,
    schema: &SchemaNode,
    ignore: &[&str],
) -> Result<()> {
    let props = schema.props()?;
    for (key, value) in data {
        if key == "defaults" {
            continue;
        }
        let node = props
            .get(key)
            .ok_or_else(|| MqError::SchemaMismatch(format!("unknown key '{key}'")))?;
        if is_ignored(node, ignore) {
            continue;
        }
        let mut element = Element::new(key.clone());
        match node.ty {
            SchemaType::Array => write_array(&mut element, key, value, node.item()?)?,
            SchemaType::Object => {
                return Err(MqError::SchemaMismatch(format!(
                    "nested mapping '{key}' is not supported here"
                )))
            }
            scalar => {
                if !value.is_null() {
                    element.text = Some(encode_scalar(value, scalar)?);
                }
            }
        }
        parent.push(element);
    }
    Ok(())
}

fn write_array(element: &mut Element, key: &str, value: &Value, item: &SchemaNode) -> Result<()> {
    let rows = value
        .as_array()
        .ok_or_else(|| MqError::SchemaMismatch(format!("'{key}' must be a list")))?;
    match item.ty {
        SchemaType::String => {
            for row in rows {
                element.push(Element::with_text(
                    "string",
                    encode_scalar(row, SchemaType::String)?,
                ));
            }
        }
        SchemaType::Array => {
            if item.item()?.ty != SchemaType::String {
                return Err(MqError::SchemaMismatch(format!(
                    "'{key}': only lists of strings and lists of lists of strings are supported"
                )));
            }
            for row in rows {
                let parts = row.as_array().ok_or_else(|| {
                    MqError::SchemaMismatch(format!("'{key}' entries must be lists"))
                })?;
                let mut encoded = Vec::with_capacity(parts.len());
                for part in parts {
                    encoded.push(encode_scalar(part, SchemaType::String)?);
                }
                // An empty inner list still produces an (empty) leaf.
                element.push(Element::with_text("string", encoded.join(";")));
            }
        }
        other => {
            return Err(MqError::SchemaMismatch(format!(
                "'{key}': list of {} not supported",
                other.name()
            )))
        }
    }
    Ok(())
}

/// Generic schema-driven reader for a flat object section.
fn read_object(base: &Element, schema: &SchemaNode, ignore: &[&str]) -> Result<Map<String, Value>> {
    let mut data = Map::new();
    for (key, node) in schema.props()? {
        if key == "defaults" || is_ignored(node, ignore) {
            continue;
        }
        let element = base.get(key)?;
        let value = match node.ty {
            SchemaType::Array => read_array(element, key, node.item()?)?,
            SchemaType::Object => {
                return Err(MqError::SchemaMismatch(format!(
                    "nested mapping '{key}' is not supported here"
                )))
            }
            scalar => match &element.text {
                Some(text) => decode(text, scalar)?,
                None => Value::Null,
            },
        };
        data.insert(key.clone(), value);
    }
    Ok(data)
}

fn read_array(element: &Element, key: &str, item: &SchemaNode) -> Result<Value> {
    match item.ty {
        SchemaType::String => {
            let values = element
                .children
                .iter()
                .map(|child| Value::String(child.text.as_deref().unwrap_or("").trim().to_string()))
                .collect();
            Ok(Value::Array(values))
        }
        SchemaType::Array => {
            if item.item()?.ty != SchemaType::String {
                return Err(MqError::SchemaMismatch(format!("cannot decode element '{key}'")));
            }
            let mut rows = Vec::with_capacity(element.children.len());
            for child in &element.children {
                let text = child.text.as_deref().unwrap_or("");
                let parts = if text.is_empty() {
                    Vec::new()
                } else {
                    text.split(';').map(|s| Value::String(s.to_string())).collect()
                };
                rows.push(Value::Array(parts));
            }
            Ok(Value::Array(rows))
        }
        other => Err(MqError::SchemaMismatch(format!(
            "'{key}': list of {} not supported",
            other.name()
        ))),
    }
}

/// Stem of a path that may use either separator; the engine side runs on
/// Windows, so `C:\data\input1.raw` must yield `input1`.
fn path_stem(path: &str) -> String {
    let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file.to_string(),
    }
}

struct GlobalSection;

impl Section for GlobalSection {
    fn doc_key(&self) -> Option<&'static str> {
        Some("globalParams")
    }

    fn write_into_xml(
        &self,
        root: &mut Element,
        data: Option<&Value>,
        _extra: &ExtraPaths,
    ) -> Result<()> {
        let merged = merge_or_default("globalParams", data)?;
        write_object(root, &merged, schema::section("globalParams")?, &[])
    }

    fn read_from_xml(
        &self,
        root: &Element,
        doc: &mut Map<String, Value>,
        _extra: &mut ExtraPaths,
    ) -> Result<()> {
        let data = read_object(root, schema::section("globalParams")?, &[])?;
        doc.insert("globalParams".to_string(), Value::Object(data));
        Ok(())
    }
}

struct MsmsSection;

const MSMS_IGNORE: &[&str] = &["#msmsParamsArray"];

impl Section for MsmsSection {
    fn doc_key(&self) -> Option<&'static str> {
        Some("MSMSParams")
    }

    fn write_into_xml(
        &self,
        root: &mut Element,
        data: Option<&Value>,
        _extra: &ExtraPaths,
    ) -> Result<()> {
        let schema = schema::section("MSMSParams")?;
        let merged = merge_or_default("MSMSParams", data)?;
        write_object(root, &merged, schema, MSMS_IGNORE)?;

        let item_schema = schema.prop("msmsParamsArray")?.item()?;
        let rows = merged
            .get("msmsParamsArray")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                MqError::SchemaMismatch("'msmsParamsArray' must be a list".to_string())
            })?;
        let mut base = Element::new("msmsParamsArray");
        for row in rows {
            let row = row.as_object().ok_or_else(|| {
                MqError::SchemaMismatch("'msmsParamsArray' entries must be mappings".to_string())
            })?;
            let mut entry = Element::new("msmsParams");
            for (name, value) in row {
                let field = item_schema.prop(name)?;
                let text = encode_scalar(value, field.ty)?;
                if TOLERANCE_FIELDS.contains(&name.as_str()) {
                    entry.push(Element::with_text(name.clone(), text));
                } else {
                    entry.attrs.push((name.clone(), text));
                }
            }
            base.push(entry);
        }
        root.push(base);
        Ok(())
    }

    fn read_from_xml(
        &self,
        root: &Element,
        doc: &mut Map<String, Value>,
        _extra: &mut ExtraPaths,
    ) -> Result<()> {
        let schema = schema::section("MSMSParams")?;
        let mut data = read_object(root, schema, MSMS_IGNORE)?;

        let item_schema = schema.prop("msmsParamsArray")?.item()?;
        let mut rows = Vec::new();
        for entry in &root.get("msmsParamsArray")?.children {
            let mut row = Map::new();
            for (name, field) in item_schema.props()? {
                let value = if TOLERANCE_FIELDS.contains(&name.as_str()) {
                    match &entry.get(name)?.text {
                        Some(text) => decode(text, field.ty)?,
                        None => Value::Null,
                    }
                } else {
                    let text = entry.attr(name).ok_or_else(|| {
                        MqError::XmlShape(format!("missing attribute '{name}' on msmsParams"))
                    })?;
                    decode(text, field.ty)?
                };
                row.insert(name.clone(), value);
            }
            rows.push(Value::Object(row));
        }
        data.insert("msmsParamsArray".to_string(), Value::Array(rows));
        doc.insert("MSMSParams".to_string(), Value::Object(data));
        Ok(())
    }
}

struct RawFilesSection;

impl Section for RawFilesSection {
    fn doc_key(&self) -> Option<&'static str> {
        Some("rawFiles")
    }

    fn write_into_xml(
        &self,
        root: &mut Element,
        data: Option<&Value>,
        extra: &ExtraPaths,
    ) -> Result<()> {
        let schema = schema::section("rawFiles")?;
        let group_schema = schema.item()?;
        let entry_schema = group_schema.prop("files")?.item()?;
        let params_schema = group_schema.prop("params")?;

        let groups = data
            .ok_or_else(|| {
                MqError::SchemaMismatch("missing required section 'rawFiles'".to_string())
            })?
            .as_array()
            .ok_or_else(|| MqError::SchemaMismatch("'rawFiles' must be a list".to_string()))?;

        let mut experiments = Element::new("experiments");
        let mut file_paths = Element::new("filePaths");
        let mut fractions = Element::new("fractions");
        let mut group_indices = Element::new("paramGroupIndices");
        let mut param_groups = Element::new("parameterGroups");

        for (index, group) in groups.iter().enumerate() {
            let group = group.as_object().ok_or_else(|| {
                MqError::SchemaMismatch("'rawFiles' entries must be mappings".to_string())
            })?;
            for key in group.keys() {
                group_schema.prop(key)?;
            }
            let files = group.get("files").and_then(Value::as_array).ok_or_else(|| {
                MqError::SchemaMismatch("every rawFiles group needs a 'files' list".to_string())
            })?;

            for file in files {
                let entry = file.as_object().ok_or_else(|| {
                    MqError::SchemaMismatch("raw file entries must be mappings".to_string())
                })?;
                for key in entry.keys() {
                    entry_schema.prop(key)?;
                }
                let name = entry.get("name").and_then(Value::as_str).ok_or_else(|| {
                    MqError::SchemaMismatch("raw file entry without a 'name'".to_string())
                })?;

                let mut experiment = Element::new("string");
                if let Some(value) = entry.get("experiment").filter(|v| !v.is_null()) {
                    experiment.text = Some(encode_scalar(value, SchemaType::String)?);
                }
                experiments.push(experiment);

                let resolved = match extra.file_paths.get(name) {
                    Some(path) => path.display().to_string(),
                    None => match entry.get("path").and_then(Value::as_str) {
                        Some(path) => path.to_string(),
                        None => return Err(MqError::MissingPath(name.to_string())),
                    },
                };
                file_paths.push(Element::with_text("string", resolved));

                let mut fraction = Element::new("short");
                if let Some(value) = entry.get("fraction").filter(|v| !v.is_null()) {
                    fraction.text = Some(encode_scalar(value, SchemaType::Integer)?);
                }
                fractions.push(fraction);

                group_indices.push(Element::with_text("int", index.to_string()));
            }

            let params = group
                .get("params")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({ "defaults": "default" }));
            let merged = overlay_section("rawFiles", &params)?;
            let merged = merged.as_object().ok_or_else(|| {
                MqError::SchemaMismatch("group 'params' must be a mapping".to_string())
            })?;
            let mut param_group = Element::new("parameterGroup");
            write_object(&mut param_group, merged, params_schema, &[])?;
            param_groups.push(param_group);
        }

        for element in [experiments, file_paths, fractions, group_indices, param_groups] {
            root.push(element);
        }
        Ok(())
    }

    fn read_from_xml(
        &self,
        root: &Element,
        doc: &mut Map<String, Value>,
        extra: &mut ExtraPaths,
    ) -> Result<()> {
        let schema = schema::section("rawFiles")?;
        let params_schema = schema.item()?.prop("params")?;

        let experiments = root.get("experiments")?;
        let file_paths = root.get("filePaths")?;
        let fractions = root.get("fractions")?;
        let group_indices = root.get("paramGroupIndices")?;
        let param_groups = root.get("parameterGroups")?;

        let count = file_paths.children.len();
        if experiments.children.len() != count
            || fractions.children.len() != count
            || group_indices.children.len() != count
        {
            return Err(MqError::XmlShape(
                "raw file lists do not have matching lengths".to_string(),
            ));
        }

        // Bucket files by group index, keeping within-group file order.
        let mut buckets: Vec<(usize, Vec<Value>)> = Vec::new();
        for position in 0..count {
            let path_text = file_paths.children[position]
                .text
                .as_deref()
                .map(str::trim)
                .unwrap_or("");
            if path_text.is_empty() {
                return Err(MqError::XmlShape("empty file path entry".to_string()));
            }
            let name = path_stem(path_text);

            let mut entry = Map::new();
            entry.insert("name".to_string(), Value::String(name.clone()));
            if let Some(text) = experiments.children[position].text.as_deref() {
                let text = text.trim();
                if !text.is_empty() {
                    entry.insert("experiment".to_string(), Value::String(text.to_string()));
                }
            }
            if let Some(text) = fractions.children[position].text.as_deref() {
                if !text.trim().is_empty() {
                    entry.insert("fraction".to_string(), decode(text, SchemaType::Integer)?);
                }
            }
            extra.file_paths.insert(name, PathBuf::from(path_text));

            let index_text = group_indices.children[position]
                .text
                .as_deref()
                .ok_or_else(|| MqError::XmlShape("empty group index entry".to_string()))?;
            let index: usize = index_text.trim().parse().map_err(|_| {
                MqError::XmlShape(format!("invalid group index '{}'", index_text.trim()))
            })?;

            match buckets.iter_mut().find(|(group, _)| *group == index) {
                Some((_, bucket)) => bucket.push(Value::Object(entry)),
                None => buckets.push((index, vec![Value::Object(entry)])),
            }
        }
        buckets.sort_by_key(|(index, _)| *index);

        let mut groups = Vec::with_capacity(buckets.len());
        for (index, files) in buckets {
            let group_element = param_groups.children.get(index).ok_or_else(|| {
                MqError::XmlShape(format!("missing parameter group {index}"))
            })?;
            let params = read_object(group_element, params_schema, &[])?;

            let mut group = Map::new();
            group.insert("files".to_string(), Value::Array(files));
            group.insert("params".to_string(), Value::Object(params));
            groups.push(Value::Object(group));
        }
        doc.insert("rawFiles".to_string(), Value::Array(groups));
        Ok(())
    }
}

struct OutputSection;

impl Section for OutputSection {
    fn doc_key(&self) -> Option<&'static str> {
        None
    }

    fn write_into_xml(
        &self,
        root: &mut Element,
        _data: Option<&Value>,
        extra: &ExtraPaths,
    ) -> Result<()> {
        if let Some(tmp_dir) = &extra.tmp_dir {
            root.push(Element::with_text("tempFolder", tmp_dir.display().to_string()));
        }
        if let Some(output_dir) = &extra.output_dir {
            root.push(Element::with_text(
                "fixedCombinedFolder",
                output_dir.display().to_string(),
            ));
        }
        Ok(())
    }

    fn read_from_xml(
        &self,
        root: &Element,
        _doc: &mut Map<String, Value>,
        extra: &mut ExtraPaths,
    ) -> Result<()> {
        extra.tmp_dir = root
            .find("tempFolder")
            .and_then(|el| el.text.as_deref())
            .map(|text| PathBuf::from(text.trim()));
        extra.output_dir = root
            .find("fixedCombinedFolder")
            .and_then(|el| el.text.as_deref())
            .map(|text| PathBuf::from(text.trim()));
        Ok(())
    }
}

struct FastaSection;

impl Section for FastaSection {
    fn doc_key(&self) -> Option<&'static str> {
        Some("fastaFiles")
    }

    fn write_into_xml(
        &self,
        root: &mut Element,
        data: Option<&Value>,
        extra: &ExtraPaths,
    ) -> Result<()> {
        let schema = schema::section("fastaFiles")?;
        let data = data
            .ok_or_else(|| {
                MqError::SchemaMismatch("missing required section 'fastaFiles'".to_string())
            })?
            .as_object()
            .ok_or_else(|| {
                MqError::SchemaMismatch("'fastaFiles' must be a mapping".to_string())
            })?;
        for key in data.keys() {
            schema.prop(key)?;
        }

        let empty = Vec::new();
        for (doc_key, tag) in [("fileNames", "fastaFiles"), ("firstSearch", "fastaFilesFirstSearch")] {
            let names = match data.get(doc_key) {
                Some(value) => value.as_array().ok_or_else(|| {
                    MqError::SchemaMismatch(format!("'fastaFiles.{doc_key}' must be a list"))
                })?,
                None => &empty,
            };
            let mut base = Element::new(tag);
            for name in names {
                let name = name.as_str().ok_or_else(|| {
                    MqError::SchemaMismatch(format!("'fastaFiles.{doc_key}' entries must be strings"))
                })?;
                let path = extra
                    .fasta_paths
                    .get(name)
                    .ok_or_else(|| MqError::MissingPath(name.to_string()))?;
                base.push(Element::with_text("string", path.display().to_string()));
            }
            root.push(base);
        }
        Ok(())
    }

    fn read_from_xml(
        &self,
        root: &Element,
        doc: &mut Map<String, Value>,
        extra: &mut ExtraPaths,
    ) -> Result<()> {
        let mut data = Map::new();
        for (doc_key, tag) in [("fileNames", "fastaFiles"), ("firstSearch", "fastaFilesFirstSearch")] {
            let mut names = Vec::new();
            for child in &root.get(tag)?.children {
                let text = child.text.as_deref().map(str::trim).unwrap_or("");
                if text.is_empty() {
                    return Err(MqError::XmlShape(format!("empty entry in '{tag}'")));
                }
                let name = path_stem(text);
                if let Some(known) = extra.fasta_paths.get(&name) {
                    if known != &PathBuf::from(text) {
                        return Err(MqError::XmlShape(format!(
                            "fasta file name '{name}' is not unique"
                        )));
                    }
                }
                extra.fasta_paths.insert(name.clone(), PathBuf::from(text));
                names.push(Value::String(name));
            }
            data.insert(doc_key.to_string(), Value::Array(names));
        }
        doc.insert("fastaFiles".to_string(), Value::Object(data));
        Ok(())
    }
}

struct TopLevelSection;

impl Section for TopLevelSection {
    fn doc_key(&self) -> Option<&'static str> {
        Some("topLevelParams")
    }

    fn write_into_xml(
        &self,
        root: &mut Element,
        data: Option<&Value>,
        _extra: &ExtraPaths,
    ) -> Result<()> {
        let schema = schema::section("topLevelParams")?;
        let merged = merge_or_default("topLevelParams", data)?;
        for key in merged.keys() {
            schema.prop(key)?;
        }
        for (key, node) in schema.props()? {
            if key == "defaults" {
                continue;
            }
            let value = merged.get(key).ok_or_else(|| {
                MqError::SchemaMismatch(format!("missing value for root attribute '{key}'"))
            })?;
            root.attrs.push((key.clone(), encode_scalar(value, node.ty)?));
        }
        Ok(())
    }

    fn read_from_xml(
        &self,
        root: &Element,
        doc: &mut Map<String, Value>,
        _extra: &mut ExtraPaths,
    ) -> Result<()> {
        let schema = schema::section("topLevelParams")?;
        let mut data = Map::new();
        for (key, node) in schema.props()? {
            if key == "defaults" {
                continue;
            }
            let text = root.attr(key).ok_or_else(|| {
                MqError::XmlShape(format!("missing root attribute '{key}'"))
            })?;
            data.insert(key.clone(), decode(text, node.ty)?);
        }
        doc.insert("topLevelParams".to_string(), Value::Object(data));
        Ok(())
    }
}
