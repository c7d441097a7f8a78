//! Mime-bundle rendering for cell outputs.
//!
//! Factories register with a rank; when an output offers several mime types
//! the lowest-ranked factory that understands one of them wins. Untrusted
//! outputs only go to factories marked safe.

use anyhow::Result;
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const STDOUT_MIME: &str = "application/vnd.jupyter.stdout";
pub const STDERR_MIME: &str = "application/vnd.jupyter.stderr";
pub const DEFAULT_RANK: u32 = 100;

/// Rendered form of one output, ready for the host to display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Displayable {
    pub mime_type: String,
    pub content: String,
    pub renderer: String,
}

pub trait RendererFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Mime types this factory renders, most preferred first.
    fn mime_types(&self) -> Vec<&str>;

    /// Whether untrusted data may be handed to this factory.
    fn safe(&self) -> bool;

    fn render(&self, mime_type: &str, data: &Value, metadata: &Value) -> Result<Displayable>;
}

/// Renders plain text and the stdout/stderr stream types verbatim.
pub struct TextRendererFactory;

impl RendererFactory for TextRendererFactory {
    fn name(&self) -> &str {
        "text"
    }

    fn mime_types(&self) -> Vec<&str> {
        vec!["text/plain", STDOUT_MIME, STDERR_MIME]
    }

    fn safe(&self) -> bool {
        true
    }

    fn render(&self, mime_type: &str, data: &Value, _metadata: &Value) -> Result<Displayable> {
        Ok(Displayable {
            mime_type: mime_type.to_string(),
            content: multiline_text(data),
            renderer: self.name().to_string(),
        })
    }
}

/// nbformat text fields may be a string or a list of lines.
fn multiline_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(lines) => lines.iter().filter_map(Value::as_str).collect(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

struct Entry {
    factory: Arc<dyn RendererFactory>,
    rank: u32,
    seq: usize,
}

#[derive(Default)]
pub struct RendererRegistry {
    entries: Vec<Entry>,
    next_seq: usize,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the text renderer installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.add_factory(Arc::new(TextRendererFactory), None);
        registry
    }

    pub fn add_factory(&mut self, factory: Arc<dyn RendererFactory>, rank: Option<u32>) {
        let rank = rank.unwrap_or(DEFAULT_RANK);
        debug!("[render] Added {} renderer at rank {}", factory.name(), rank);
        self.entries.push(Entry {
            factory,
            rank,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.entries.sort_by_key(|e| (e.rank, e.seq));
    }

    fn eligible(&self, trusted: bool) -> impl Iterator<Item = &Arc<dyn RendererFactory>> {
        self.entries
            .iter()
            .map(|e| &e.factory)
            .filter(move |f| trusted || f.safe())
    }

    /// Best mime type in `bundle` that some eligible factory can render.
    pub fn preferred_mime_type(&self, bundle: &Map<String, Value>, trusted: bool) -> Option<String> {
        self.eligible(trusted)
            .flat_map(|f| f.mime_types())
            .find(|mime| bundle.contains_key(*mime))
            .map(str::to_string)
    }

    fn factory_for(&self, mime_type: &str, trusted: bool) -> Option<&Arc<dyn RendererFactory>> {
        self.eligible(trusted)
            .find(|f| f.mime_types().contains(&mime_type))
    }

    /// Render an nbformat output record. Returns `Ok(None)` when nothing
    /// registered can display it.
    pub fn render_output(&self, output: &Value, trusted: bool) -> Result<Option<Displayable>> {
        let (mime_type, data, metadata) = match output["output_type"].as_str() {
            Some("stream") => {
                let mime = if output["name"] == "stderr" {
                    STDERR_MIME
                } else {
                    STDOUT_MIME
                };
                (mime.to_string(), output["text"].clone(), Value::Null)
            }
            Some("error") => {
                let traceback = output["traceback"]
                    .as_array()
                    .map(|lines| {
                        lines
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .filter(|t| !t.is_empty());
                let text = traceback.unwrap_or_else(|| {
                    format!(
                        "{}: {}",
                        output["ename"].as_str().unwrap_or_default(),
                        output["evalue"].as_str().unwrap_or_default()
                    )
                });
                (STDERR_MIME.to_string(), Value::String(text), Value::Null)
            }
            Some("display_data") | Some("execute_result") => {
                let Some(bundle) = output["data"].as_object() else {
                    return Ok(None);
                };
                let Some(mime) = self.preferred_mime_type(bundle, trusted) else {
                    return Ok(None);
                };
                let data = bundle.get(&mime).cloned().unwrap_or(Value::Null);
                let metadata = output["metadata"]
                    .get(&mime)
                    .cloned()
                    .unwrap_or(Value::Null);
                (mime, data, metadata)
            }
            other => {
                debug!("[render] Unknown output type {:?}", other);
                return Ok(None);
            }
        };

        match self.factory_for(&mime_type, trusted) {
            Some(factory) => factory.render(&mime_type, &data, &metadata).map(Some),
            None => Ok(None),
        }
    }
}
