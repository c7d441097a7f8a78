//! Interpretation of kernel iopub contents as edits to a code cell.

use jupyter_protocol::{ExecutionCount, JupyterMessageContent, Stdio};
use log::warn;
use serde_json::{json, Map, Value};

/// What one iopub message does to the cell that is executing.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Append an nbformat output record.
    Append(Value),
    /// Drop every output produced so far.
    Clear,
    ExecutionCount(i32),
    /// Replace data and metadata of earlier outputs sharing `display_id`.
    UpdateDisplay {
        display_id: String,
        data: Value,
        metadata: Value,
    },
}

/// Map a message content onto cell edits, in the order they apply.
///
/// jupyter_protocol serializes as `{"ExecuteResult": {...}}` while cells store
/// nbformat records shaped like `{"output_type": "execute_result", ...}`.
/// Contents that don't touch the cell map to nothing.
pub fn interpret(content: &JupyterMessageContent) -> Vec<OutputEvent> {
    match content {
        JupyterMessageContent::ExecuteInput(input) => count_of(&input.execution_count)
            .map(OutputEvent::ExecutionCount)
            .into_iter()
            .collect(),
        JupyterMessageContent::StreamContent(stream) => {
            let name = match stream.name {
                Stdio::Stdout => "stdout",
                Stdio::Stderr => "stderr",
            };
            vec![OutputEvent::Append(json!({
                "output_type": "stream",
                "name": name,
                "text": stream.text,
            }))]
        }
        JupyterMessageContent::DisplayData(display) => {
            let mut record = rich_output("display_data", json!(display.data), json!(display.metadata));
            let display_id = display
                .transient
                .as_ref()
                .and_then(|t| t.display_id.as_ref());
            if let Some(display_id) = display_id {
                // Kept so later update_display_data messages can find it.
                record.insert("transient".into(), json!({ "display_id": display_id }));
            }
            vec![OutputEvent::Append(Value::Object(record))]
        }
        JupyterMessageContent::UpdateDisplayData(update) => match &update.transient.display_id {
            Some(display_id) => vec![OutputEvent::UpdateDisplay {
                display_id: display_id.clone(),
                data: json!(update.data),
                metadata: json!(update.metadata),
            }],
            None => {
                warn!("[outputs] update_display_data without a display_id");
                Vec::new()
            }
        },
        JupyterMessageContent::ExecuteResult(result) => {
            let count = count_of(&result.execution_count);
            let mut record =
                rich_output("execute_result", json!(result.data), json!(result.metadata));
            record.insert("execution_count".into(), json!(count));
            count
                .map(OutputEvent::ExecutionCount)
                .into_iter()
                .chain([OutputEvent::Append(Value::Object(record))])
                .collect()
        }
        JupyterMessageContent::ErrorOutput(error) => vec![OutputEvent::Append(json!({
            "output_type": "error",
            "ename": error.ename,
            "evalue": error.evalue,
            "traceback": error.traceback,
        }))],
        JupyterMessageContent::ClearOutput(_) => vec![OutputEvent::Clear],
        _ => Vec::new(),
    }
}

/// nbformat stores counts as 32-bit integers. Larger counts are dropped.
fn count_of(count: &ExecutionCount) -> Option<i32> {
    match i32::try_from(count.0) {
        Ok(count) => Some(count),
        Err(_) => {
            warn!("[outputs] Execution count {} out of range", count.0);
            None
        }
    }
}

fn rich_output(output_type: &str, data: Value, metadata: Value) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("output_type".into(), json!(output_type));
    record.insert("data".into(), data);
    record.insert("metadata".into(), metadata);
    record
}
