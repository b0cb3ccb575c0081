//! Classification and drafting capabilities.
//!
//! The engine consumes these as narrow contracts and stays correct no matter
//! what implements them. The defaults are deterministic and rule based; a
//! reasoning engine can be plugged in behind the same traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ItemType, NewWorkItem, Priority, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub item_type: ItemType,
    pub priority: Priority,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, item: &NewWorkItem) -> Result<Classification>;
}

#[async_trait]
pub trait Drafter: Send + Sync {
    /// Write the body of a new item of `item_type` derived from `parent`.
    async fn draft(
        &self,
        parent: &WorkItem,
        item_type: ItemType,
        fields: &serde_json::Value,
    ) -> Result<String>;
}

const URGENT_KEYWORDS: [&str; 6] = ["urgent", "asap", "immediately", "invoice", "payment", "overdue"];

/// Email is high priority, anything mentioning urgency is high, the rest medium.
pub struct RuleClassifier;

#[async_trait]
impl Classifier for RuleClassifier {
    async fn classify(&self, item: &NewWorkItem) -> Result<Classification> {
        let item_type = item.item_type();
        let priority = if item_type == ItemType::Email || mentions_urgency(item) {
            Priority::High
        } else {
            Priority::Medium
        };
        Ok(Classification {
            item_type,
            priority,
        })
    }
}

fn mentions_urgency(item: &NewWorkItem) -> bool {
    let mut text = item.get_body().to_ascii_lowercase();
    for key in ["subject", "title"] {
        if let Some(v) = item.get_fields().get(key).and_then(|v| v.as_str()) {
            text.push(' ');
            text.push_str(&v.to_ascii_lowercase());
        }
    }
    URGENT_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Renders a Markdown proposal from the parent item and the requested fields.
pub struct TemplateDrafter;

#[async_trait]
impl Drafter for TemplateDrafter {
    async fn draft(
        &self,
        parent: &WorkItem,
        item_type: ItemType,
        fields: &serde_json::Value,
    ) -> Result<String> {
        let mut body = format!("# Proposed {item_type}\n\n");
        body.push_str(&format!(
            "In response to {} `{}`: {}\n",
            parent.item_type,
            parent.id,
            parent.summary()
        ));
        if let Some(map) = fields.as_object()
            && !map.is_empty()
        {
            body.push_str("\n## Details\n\n");
            for (key, value) in map {
                let value = value
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                body.push_str(&format!("- **{key}**: {value}\n"));
            }
        }
        body.push_str("\n---\n*Drafted automatically. Review before approving.*\n");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn email_and_urgent_items_are_high_priority() {
        let email = NewWorkItem::new(ItemType::Email, "gmail");
        let urgent = NewWorkItem::new(ItemType::Task, "cli").field("subject", "URGENT: call back");
        let plain = NewWorkItem::new(ItemType::FileDrop, "drop_folder").body("hello");

        assert_eq!(RuleClassifier.classify(&email).await.unwrap().priority, Priority::High);
        assert_eq!(RuleClassifier.classify(&urgent).await.unwrap().priority, Priority::High);
        let c = RuleClassifier.classify(&plain).await.unwrap();
        assert_eq!(c.priority, Priority::Medium);
        assert_eq!(c.item_type, ItemType::FileDrop);
    }
}
