//! Placeholder substitution for template subjects and bodies.

use std::collections::HashMap;

use regex::{Captures, Regex};

use super::model::Template;

/// A template rendered for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
}

/// Replace every `{{key}}` with `vars[key]`. Unknown keys are left verbatim.
///
/// Keys are matched literally, so any characters are allowed in a key.
/// Single pass: substituted values are not scanned again.
pub fn render(body: &str, vars: &HashMap<&str, &str>) -> String {
    if vars.is_empty() {
        return body.to_string();
    }

    let mut keys: Vec<&str> = vars.keys().copied().collect();
    keys.sort_unstable();
    let alternation = keys
        .iter()
        .map(|key| regex::escape(key))
        .collect::<Vec<_>>()
        .join("|");

    let placeholder = match Regex::new(&format!(r"\{{\{{({alternation})\}}\}}")) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!("Placeholder pattern rejected, rendering verbatim: {e}");
            return body.to_string();
        }
    };

    placeholder
        .replace_all(body, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => (*value).to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Render both subject and body of a template.
pub fn render_template(template: &Template, vars: &HashMap<&str, &str>) -> RenderedEmail {
    RenderedEmail {
        subject: render(&template.subject, vars),
        html_body: render(&template.html_body, vars),
    }
}
