//! Label map (`.pbtxt`) parsing
//!
//! Label maps are lists of `item { ... }` blocks:
//!
//! ```text
//! item {
//!   name: "screw"
//!   id: 1
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::DeployError;

/// Detection class id to display name
pub type CategoryIndex = BTreeMap<u32, String>;

/// Parse label map text into a category index.
///
/// `display_name` wins over `name` when both are present.
pub fn parse_labelmap(text: &str) -> Result<CategoryIndex, DeployError> {
    let mut index = CategoryIndex::new();
    let mut current: Option<(Option<u32>, Option<String>, Option<String>)> = None;

    for token in tokenize(text) {
        match token.as_str() {
            "item" => {}
            "{" => {
                if current.is_some() {
                    return Err(invalid("nested item block"));
                }
                current = Some((None, None, None));
            }
            "}" => {
                let (id, name, display_name) =
                    current.take().ok_or_else(|| invalid("unbalanced '}'"))?;
                let id = id.ok_or_else(|| invalid("item without id"))?;
                let name = display_name
                    .or(name)
                    .ok_or_else(|| invalid("item without name"))?;
                index.insert(id, name);
            }
            field => {
                let Some(entry) = current.as_mut() else {
                    return Err(invalid(&format!("unexpected token '{}'", field)));
                };
                let (key, value) = field
                    .split_once(':')
                    .ok_or_else(|| invalid(&format!("malformed field '{}'", field)))?;
                let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                match key.trim() {
                    "id" => {
                        entry.0 = Some(
                            value
                                .parse()
                                .map_err(|_| invalid(&format!("invalid id '{}'", value)))?,
                        )
                    }
                    "name" => entry.1 = Some(value.to_string()),
                    "display_name" => entry.2 = Some(value.to_string()),
                    _ => {}
                }
            }
        }
    }

    if current.is_some() {
        return Err(invalid("unterminated item block"));
    }
    Ok(index)
}

/// Read and parse a label map file
pub fn load_labelmap(path: &Path) -> Result<CategoryIndex, DeployError> {
    let text = std::fs::read_to_string(path)?;
    parse_labelmap(&text)
}

/// Class names ordered by id, as classifiers index their outputs
pub fn class_names(index: &CategoryIndex) -> Vec<String> {
    index.values().cloned().collect()
}

fn invalid(reason: &str) -> DeployError {
    DeployError::ModelError(format!("Invalid label map: {}", reason))
}

// Splits into braces, the word `item`, and `key: value` fields. Values may be
// quoted and may contain spaces.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '{' || c == '}' {
            tokens.push(c.to_string());
            chars.next();
        } else if c == '#' {
            while chars.next().is_some_and(|c| c != '\n') {}
        } else {
            let mut token = String::new();
            let mut in_quotes = false;
            let mut seen_colon = false;
            let mut seen_value = false;
            while let Some(&c) = chars.peek() {
                if c == '"' {
                    in_quotes = !in_quotes;
                } else if !in_quotes {
                    if c == '{' || c == '}' {
                        break;
                    }
                    if c.is_whitespace() {
                        // `key: value` spans the whitespace after the colon
                        if !seen_colon || seen_value {
                            break;
                        }
                        chars.next();
                        continue;
                    }
                    if c == ':' {
                        seen_colon = true;
                    } else if seen_colon {
                        seen_value = true;
                    }
                } else {
                    seen_value = true;
                }
                token.push(c);
                chars.next();
            }
            tokens.push(token);
        }
    }
    tokens
}
