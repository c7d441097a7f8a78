//! Cell model and its serialized record form.
//!
//! A `CellModel` is the in-memory unit of a notebook. Its kind never changes;
//! converting a cell builds a fresh model from the old one's serialized record.
//! `SerializedCell` mirrors the nbformat cell record but keeps `cell_type` as a
//! plain string so that records of unknown kinds can be read and skipped.

use crate::error::NotebookError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The three notebook cell kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    #[default]
    Code,
    Markdown,
    Raw,
}

impl CellKind {
    /// Parse a kind name, treating anything unrecognized as `Raw`.
    pub fn parse_lossy(s: &str) -> CellKind {
        s.parse().unwrap_or(CellKind::Raw)
    }
}

impl std::fmt::Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellKind::Code => write!(f, "code"),
            CellKind::Markdown => write!(f, "markdown"),
            CellKind::Raw => write!(f, "raw"),
        }
    }
}

impl std::str::FromStr for CellKind {
    type Err = NotebookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(CellKind::Code),
            "markdown" => Ok(CellKind::Markdown),
            "raw" => Ok(CellKind::Raw),
            other => Err(NotebookError::UnsupportedCellKind(other.to_string())),
        }
    }
}

/// One cell record as it appears in a serialized notebook.
///
/// `source` accepts both a single string and nbformat's list-of-lines form and
/// is always written back as a single string. Fields this type doesn't model
/// (e.g. `attachments`) are kept in `extra` and written back verbatim.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SerializedCell {
    pub cell_type: String,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default, deserialize_with = "deserialize_source")]
    pub source: String,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default)]
    pub outputs: Vec<Value>,

    #[serde(default)]
    pub execution_count: Option<i32>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SerializedCell {
    pub fn new(cell_type: &str, source: &str) -> Self {
        SerializedCell {
            cell_type: cell_type.to_string(),
            id: None,
            source: source.to_string(),
            metadata: Map::new(),
            outputs: Vec::new(),
            execution_count: None,
            extra: Map::new(),
        }
    }
}

/// Code records always carry `outputs` and `execution_count`; markdown and raw
/// records never do.
impl Serialize for SerializedCell {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("cell_type", &self.cell_type)?;
        if let Some(id) = &self.id {
            map.serialize_entry("id", id)?;
        }
        map.serialize_entry("metadata", &self.metadata)?;
        map.serialize_entry("source", &self.source)?;
        if self.cell_type == "code" {
            map.serialize_entry("execution_count", &self.execution_count)?;
            map.serialize_entry("outputs", &self.outputs)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Deserialize a cell source that accepts both:
/// - `"x = 1\nprint(x)"` (single string)
/// - `["x = 1\n", "print(x)"]` (nbformat multiline list)
fn deserialize_source<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct SourceVisitor;

    impl<'de> de::Visitor<'de> for SourceVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or array of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_unit<E: de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<String, A::Error> {
            let mut joined = String::new();
            while let Some(line) = seq.next_element::<String>()? {
                joined.push_str(&line);
            }
            Ok(joined)
        }
    }

    deserializer.deserialize_any(SourceVisitor)
}

/// Serialized notebook document: the ordered cell records plus the
/// notebook-level fields that are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNotebook {
    pub cells: Vec<SerializedCell>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default = "default_nbformat")]
    pub nbformat: u32,

    #[serde(default = "default_nbformat_minor")]
    pub nbformat_minor: u32,
}

fn default_nbformat() -> u32 {
    4
}

fn default_nbformat_minor() -> u32 {
    5
}

impl SerializedNotebook {
    pub fn from_cells(cells: Vec<SerializedCell>) -> Self {
        SerializedNotebook {
            cells,
            metadata: Map::new(),
            nbformat: default_nbformat(),
            nbformat_minor: default_nbformat_minor(),
        }
    }

    /// Parse either a full notebook object or a bare array of cell records.
    pub fn from_json_str(json: &str) -> Result<Self, NotebookError> {
        let value: Value = serde_json::from_str(json)?;
        if value.is_array() {
            let cells: Vec<SerializedCell> = serde_json::from_value(value)?;
            return Ok(SerializedNotebook::from_cells(cells));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// A single notebook cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellModel {
    id: String,
    kind: CellKind,
    source: String,
    metadata: Map<String, Value>,
    outputs: Vec<Value>,
    execution_count: Option<i32>,
    trusted: bool,
    extra: Map<String, Value>,
}

impl CellModel {
    /// Create an empty cell with a fresh id.
    pub fn new(kind: CellKind) -> Self {
        CellModel {
            id: Uuid::new_v4().to_string(),
            kind,
            source: String::new(),
            metadata: Map::new(),
            outputs: Vec::new(),
            execution_count: None,
            trusted: false,
            extra: Map::new(),
        }
    }

    /// Materialize a cell of `kind` from a serialized record.
    ///
    /// The record's own `cell_type` is ignored so that conversions can reuse a
    /// record of another kind. A missing or empty id is replaced with a new one.
    /// Outputs and execution count only survive into code cells.
    pub fn from_serialized(record: SerializedCell, kind: CellKind) -> Self {
        let id = match record.id {
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        let trusted = record
            .metadata
            .get("trusted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut extra = record.extra;
        if kind != CellKind::Markdown {
            extra.remove("attachments");
        }

        let (outputs, execution_count) = match kind {
            CellKind::Code => (record.outputs, record.execution_count),
            CellKind::Markdown | CellKind::Raw => (Vec::new(), None),
        };

        CellModel {
            id,
            kind,
            source: record.source,
            metadata: record.metadata,
            outputs,
            execution_count,
            trusted,
            extra,
        }
    }

    pub fn to_serialized(&self) -> SerializedCell {
        SerializedCell {
            cell_type: self.kind.to_string(),
            id: Some(self.id.clone()),
            source: self.source.clone(),
            metadata: self.metadata.clone(),
            outputs: self.outputs.iter().map(without_transient).collect(),
            execution_count: self.execution_count,
            extra: self.extra.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn set_source(&mut self, source: &str) {
        self.source = source.to_string();
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.metadata
    }

    /// Whether the host may edit this cell (`metadata.editable`, default true).
    pub fn is_editable(&self) -> bool {
        self.metadata
            .get("editable")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn outputs(&self) -> &[Value] {
        &self.outputs
    }

    pub fn execution_count(&self) -> Option<i32> {
        self.execution_count
    }

    pub fn trusted(&self) -> bool {
        self.trusted
    }

    /// Update the trust flag, mirroring it into `metadata.trusted` when the
    /// key is already present or the cell becomes trusted.
    pub fn set_trusted(&mut self, trusted: bool) {
        self.trusted = trusted;
        if trusted || self.metadata.contains_key("trusted") {
            self.metadata
                .insert("trusted".to_string(), Value::Bool(trusted));
        }
    }

    /// Drop outputs and execution count. Returns false for non-code cells.
    pub fn clear_outputs(&mut self) -> bool {
        if self.kind != CellKind::Code {
            return false;
        }
        self.outputs.clear();
        self.execution_count = None;
        true
    }

    /// Append an nbformat output record. A stream output directly following a
    /// stream of the same name is merged into it. Returns false for non-code
    /// cells.
    pub fn push_output(&mut self, output: Value) -> bool {
        if self.kind != CellKind::Code {
            return false;
        }
        if let Some(last) = self.outputs.last_mut() {
            if let Some(merged) = merge_stream(last, &output) {
                *last = merged;
                return true;
            }
        }
        self.outputs.push(output);
        true
    }

    /// Replace data and metadata of every output carrying `display_id`.
    /// Returns how many outputs matched.
    pub fn update_display(&mut self, display_id: &str, data: &Value, metadata: &Value) -> usize {
        let mut updated = 0;
        for output in &mut self.outputs {
            if output.pointer("/transient/display_id").and_then(Value::as_str) != Some(display_id) {
                continue;
            }
            output["data"] = data.clone();
            output["metadata"] = metadata.clone();
            updated += 1;
        }
        updated
    }

    pub fn set_execution_count(&mut self, count: Option<i32>) -> bool {
        if self.kind != CellKind::Code {
            return false;
        }
        self.execution_count = count;
        true
    }
}

/// `transient` only lives in memory; nbformat outputs do not allow it.
fn without_transient(output: &Value) -> Value {
    let mut output = output.clone();
    if let Some(record) = output.as_object_mut() {
        record.remove("transient");
    }
    output
}

fn merge_stream(last: &Value, next: &Value) -> Option<Value> {
    let is_stream = |v: &Value| v.get("output_type").and_then(Value::as_str) == Some("stream");
    if !is_stream(last) || !is_stream(next) || last.get("name") != next.get("name") {
        return None;
    }
    let prev = last.get("text")?.as_str()?;
    let more = next.get("text")?.as_str()?;
    let mut merged = last.clone();
    merged["text"] = Value::String(format!("{prev}{more}"));
    Some(merged)
}
