use crate::error::{BqChainError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{|\}\}|\{(\w+)\}").expect("placeholder regex is valid"));

/// Substitutes `{name}` placeholders from `params`.
///
/// `{{` and `}}` produce literal braces. Any other brace text is left alone.
pub fn render(template: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        rendered.push_str(&template[last..whole.start()]);

        match caps.get(1) {
            Some(name) => {
                let value = params.get(name.as_str()).ok_or_else(|| {
                    BqChainError::Template(format!("unknown parameter '{}'", name.as_str()))
                })?;
                rendered.push_str(value);
            }
            None if whole.as_str() == "{{" => rendered.push('{'),
            None => rendered.push('}'),
        }
        last = whole.end();
    }

    rendered.push_str(&template[last..]);
    Ok(rendered)
}
