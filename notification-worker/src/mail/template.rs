//! File-backed email templates with `{{key}}` placeholders.
//!
//! Layout, one directory per template:
//!
//! ```text
//! <root>/<template>/subject.txt
//! <root>/<template>/html.html
//! <root>/<template>/text.txt      (optional)
//! ```

use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use super::EmailContext;
use crate::error::DeliveryError;

/// A fully rendered email, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load and render `template` with `context`.
    pub async fn render(
        &self,
        template: &str,
        context: &EmailContext,
    ) -> Result<RenderedEmail, DeliveryError> {
        let dir = self.template_dir(template)?;

        debug!(template, variable_count = context.len(), "Rendering template");

        let subject = read(&dir.join("subject.txt"), template).await?;
        let html = read(&dir.join("html.html"), template).await?;
        let text = match tokio::fs::read_to_string(dir.join("text.txt")).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(render_error(template, e.to_string())),
        };

        Ok(RenderedEmail {
            subject: substitute(subject.trim(), context, false)
                .map_err(|reason| render_error(template, reason))?,
            html: substitute(&html, context, true).map_err(|reason| render_error(template, reason))?,
            text: text
                .map(|t| substitute(&t, context, false))
                .transpose()
                .map_err(|reason| render_error(template, reason))?,
        })
    }

    fn template_dir(&self, template: &str) -> Result<PathBuf, DeliveryError> {
        let mut components = Path::new(template).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(template)),
            _ => Err(render_error(template, "invalid template name".to_string())),
        }
    }
}

async fn read(path: &Path, template: &str) -> Result<String, DeliveryError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| render_error(template, format!("{}: {}", path.display(), e)))
}

fn render_error(template: &str, reason: String) -> DeliveryError {
    DeliveryError::Render {
        template: template.to_string(),
        reason,
    }
}

/// Replace every `{{ key }}` with the context value.
///
/// Keys absent from the context (optional fields the producer left out or
/// sent as null) render as empty. A placeholder that is unterminated or not
/// an identifier is an error.
fn substitute(source: &str, context: &EmailContext, escape: bool) -> Result<String, String> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| "unterminated placeholder".to_string())?;
        let key = after[..end].trim();

        if !is_identifier(key) {
            warn!(placeholder = %key, "Template contains invalid placeholder");
            return Err(format!("invalid placeholder '{}'", key));
        }

        let value = match context.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Null) | None => {
                debug!(variable = %key, "Template variable absent, rendering empty");
                String::new()
            }
            Some(_) => return Err(format!("unsupported value type for '{}'", key)),
        };

        if escape {
            out.push_str(&escape_html(&value));
        } else {
            out.push_str(&value);
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
