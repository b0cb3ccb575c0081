//! Markdown document codec: YAML front matter header plus opaque body.
//!
//! ```text
//! ---
//! id: 0b0c...
//! type: email
//! state: needs_action
//! ...
//! ---
//!
//! body text
//! ```

use crate::error::{Error, Result};
use crate::model::WorkItem;

const FENCE: &str = "---";

/// Render an item as a front-matter document.
pub fn render(item: &WorkItem) -> Result<String> {
    let mut header = item.clone();
    let body = std::mem::take(&mut header.body);
    let yaml = serde_yaml::to_string(&header)?;

    let mut doc = String::with_capacity(yaml.len() + body.len() + 16);
    doc.push_str(FENCE);
    doc.push('\n');
    doc.push_str(&yaml);
    if !yaml.ends_with('\n') {
        doc.push('\n');
    }
    doc.push_str(FENCE);
    doc.push_str("\n\n");
    doc.push_str(&body);
    Ok(doc)
}

/// Parse a front-matter document. Malformed input is a validation error.
pub fn parse(text: &str) -> Result<WorkItem> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
        .ok_or_else(|| Error::Validation("document does not start with front matter".into()))?;

    let (yaml, body) = split_header(rest)
        .ok_or_else(|| Error::Validation("front matter is not terminated".into()))?;

    let mut item: WorkItem = serde_yaml::from_str(yaml)
        .map_err(|e| Error::Validation(format!("malformed front matter: {e}")))?;
    if !item.fields.is_object() {
        return Err(Error::Validation("header fields must be a mapping".into()));
    }
    item.body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body)
        .to_string();
    Ok(item)
}

/// Split at the closing fence line. Returns (header, text after the fence line).
fn split_header(rest: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}
