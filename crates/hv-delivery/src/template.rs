//! Template registry and rendering.
//!
//! Rendering is pure: `{var}` placeholders are substituted from the binding
//! map and anything unresolved stays as the literal placeholder, which keeps
//! a missing binding visible in the delivered output instead of silently
//! disappearing.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::info;

use hv_common::{MessageTemplate, TransportKind};

/// Registry of named templates with per-transport variants.
pub struct TemplateEngine {
    templates: RwLock<HashMap<String, MessageTemplate>>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace a template.
    pub fn register(&self, template: MessageTemplate) {
        info!(template_id = %template.id, variants = template.variants.len(), "Template registered");
        self.templates.write().insert(template.id.clone(), template);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }

    /// Render the variant for `kind`, or `None` when the template has no
    /// variant for that transport (callers fall back to the message body).
    pub fn render(
        &self,
        template_id: &str,
        kind: TransportKind,
        variables: &BTreeMap<String, String>,
    ) -> Option<String> {
        let templates = self.templates.read();
        let template = templates.get(template_id)?;
        let body = template.variants.get(&kind)?;
        Some(substitute(body, variables))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace `{name}` placeholders with their bindings.
fn substitute(body: &str, variables: &BTreeMap<String, String>) -> String {
    let mut rendered = body.to_string();
    for (name, value) in variables {
        rendered = rendered.replace(&format!("{{{}}}", name), value);
    }
    rendered
}
