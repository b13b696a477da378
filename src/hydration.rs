//! Structured hydration: fill a loaded document from caller data.
//!
//! Callers never ship code into the rendering surface. They name a strategy
//! and pass a JSON payload; the strategy turns that payload into a closed set
//! of [`DomOp`]s, which a fixed in-page applier executes. Unknown strategies
//! are skipped.

use crate::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A serializable hydration instruction attached to a render job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydrationRequest {
    /// Name of a registered [`HydrationStrategy`]
    pub strategy: String,
    /// Strategy-specific data
    #[serde(default)]
    pub payload: Value,
}

impl HydrationRequest {
    pub fn new(strategy: impl Into<String>, payload: Value) -> Self {
        Self {
            strategy: strategy.into(),
            payload,
        }
    }
}

/// DOM mutations a surface knows how to apply. Operations naming elements
/// that do not exist are skipped by the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DomOp {
    /// Replace the text content of `#id`
    #[serde(rename_all = "camelCase")]
    SetText { id: String, text: String },
    /// Move `#child_id` to the end of `#parent_id`
    #[serde(rename_all = "camelCase")]
    AppendChild { parent_id: String, child_id: String },
    /// Set an attribute on `#id`
    #[serde(rename_all = "camelCase")]
    SetAttribute {
        id: String,
        name: String,
        value: String,
    },
    /// Detach `#id` from the document
    #[serde(rename_all = "camelCase")]
    Remove { id: String },
}

/// In-page applier. The ops array is spliced in as JSON data.
const APPLIER_TEMPLATE: &str = r#"(function(ops){
    var applied = 0;
    ops.forEach(function(op){
        var el = document.getElementById(op.id || op.childId);
        if (!el) return;
        switch (op.op) {
            case 'setText': el.textContent = op.text; break;
            case 'appendChild': {
                var parent = document.getElementById(op.parentId);
                if (!parent) return;
                parent.appendChild(el);
                break;
            }
            case 'setAttribute': el.setAttribute(op.name, op.value); break;
            case 'remove': el.remove(); break;
            default: return;
        }
        applied++;
    });
    return applied;
})(__PAGEPRESS_OPS__)"#;

/// Build the script that applies `ops` inside a surface.
pub fn applier_script(ops: &[DomOp]) -> Result<String> {
    let json = serde_json::to_string(ops)
        .map_err(|e| Error::Other(format!("Failed to serialize DOM ops: {}", e)))?;
    Ok(APPLIER_TEMPLATE.replace("__PAGEPRESS_OPS__", &json))
}

/// Turns a hydration payload into DOM operations
pub trait HydrationStrategy: Send + Sync {
    /// Registry key callers put in [`HydrationRequest::strategy`]
    fn name(&self) -> &str;

    fn plan(&self, payload: &Value) -> Result<Vec<DomOp>>;
}

/// The fixed set of strategies a pool accepts
#[derive(Clone, Default)]
pub struct HydrationRegistry {
    strategies: HashMap<String, Arc<dyn HydrationStrategy>>,
}

impl HydrationRegistry {
    /// An empty registry: every hydration request is skipped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with [`ResumeStrategy`] and [`TextStrategy`]
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(ResumeStrategy);
        reg.register(TextStrategy);
        reg
    }

    pub fn register<S: HydrationStrategy + 'static>(&mut self, strategy: S) {
        self.strategies
            .insert(strategy.name().to_string(), Arc::new(strategy));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Plan a request. `Ok(None)` means no strategy is registered under that name.
    pub fn plan(&self, request: &HydrationRequest) -> Result<Option<Vec<DomOp>>> {
        match self.strategies.get(&request.strategy) {
            Some(strategy) => strategy.plan(&request.payload).map(Some),
            None => {
                debug!(
                    "no hydration strategy named '{}'; skipping",
                    request.strategy
                );
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PersonalInfo {
    first_name: String,
    last_name: String,
    job_title: String,
    summary: String,
    email: String,
    phone: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ResumePayload {
    personal_info: Option<PersonalInfo>,
    order: Vec<String>,
}

/// Fills the resume profile block and reorders sections.
///
/// Expects `#full-name`, `#job-title`, `#summary-text`, `#contact-info`, and
/// sections `#section-<key>` under `#resume-root`.
pub struct ResumeStrategy;

impl HydrationStrategy for ResumeStrategy {
    fn name(&self) -> &str {
        "resume"
    }

    fn plan(&self, payload: &Value) -> Result<Vec<DomOp>> {
        let data: ResumePayload = serde_json::from_value(payload.clone())
            .map_err(|e| Error::Other(format!("Invalid resume payload: {}", e)))?;

        let mut ops = Vec::new();
        if let Some(p) = data.personal_info {
            let full_name = format!("{} {}", p.first_name, p.last_name);
            ops.push(set_text("full-name", full_name.trim()));
            ops.push(set_text("job-title", &p.job_title));
            ops.push(set_text("summary-text", &p.summary));
            ops.push(set_text("contact-info", &format!("{} | {}", p.phone, p.email)));
        }
        for key in data.order {
            ops.push(DomOp::AppendChild {
                parent_id: "resume-root".to_string(),
                child_id: format!("section-{}", key),
            });
        }
        Ok(ops)
    }
}

/// Sets text content from a flat `{ "element-id": "text" }` object.
pub struct TextStrategy;

impl HydrationStrategy for TextStrategy {
    fn name(&self) -> &str {
        "text"
    }

    fn plan(&self, payload: &Value) -> Result<Vec<DomOp>> {
        let map = payload
            .as_object()
            .ok_or_else(|| Error::Other("text hydration expects a JSON object".into()))?;
        Ok(map
            .iter()
            .map(|(id, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                DomOp::SetText {
                    id: id.clone(),
                    text,
                }
            })
            .collect())
    }
}

fn set_text(id: &str, text: &str) -> DomOp {
    DomOp::SetText {
        id: id.to_string(),
        text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resume_strategy_fills_profile_and_orders_sections() {
        let payload = json!({
            "personalInfo": {
                "firstName": "Ada",
                "lastName": "Lovelace",
                "jobTitle": "Analyst",
                "summary": "Engines.",
                "email": "ada@example.com",
                "phone": "555-0100"
            },
            "order": ["experience", "profile"]
        });
        let ops = ResumeStrategy.plan(&payload).unwrap();
        assert_eq!(ops[0], set_text("full-name", "Ada Lovelace"));
        assert_eq!(ops[3], set_text("contact-info", "555-0100 | ada@example.com"));
        assert_eq!(
            ops[4],
            DomOp::AppendChild {
                parent_id: "resume-root".into(),
                child_id: "section-experience".into()
            }
        );
        assert_eq!(ops.len(), 6);
    }

    #[test]
    fn resume_strategy_tolerates_missing_fields() {
        let ops = ResumeStrategy.plan(&json!({ "order": ["skills"] })).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(ResumeStrategy.plan(&json!("not an object")).is_err());
    }

    #[test]
    fn text_strategy_stringifies_values() {
        let ops = TextStrategy
            .plan(&json!({ "a": "x", "b": 3, "c": null }))
            .unwrap();
        assert_eq!(ops[0], set_text("a", "x"));
        assert_eq!(ops[1], set_text("b", "3"));
        assert_eq!(ops[2], set_text("c", ""));
    }

    #[test]
    fn unknown_strategy_plans_nothing() {
        let reg = HydrationRegistry::with_builtins();
        assert_eq!(reg.names(), vec!["resume".to_string(), "text".to_string()]);
        let planned = reg
            .plan(&HydrationRequest::new("nope", json!({})))
            .unwrap();
        assert!(planned.is_none());
    }

    #[test]
    fn applier_embeds_ops_as_json() {
        let script = applier_script(&[set_text("x", "</script>\"q")]).unwrap();
        assert!(script.contains(r#"{"op":"setText","id":"x","text":"</script>\"q"}"#));
        assert!(!script.contains("__PAGEPRESS_OPS__"));
    }
}
