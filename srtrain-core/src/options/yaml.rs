//! Raw YAML handling: loading, `--force_yml` overrides and rendering.

use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::error::OptionsError;

/// Load an option file, or parse `source` as literal YAML when it is not a file.
///
/// A `source` ending in `.yml`/`.yaml` that does not exist is reported as a
/// missing file rather than parsed as a one-word YAML document.
pub fn yaml_load(source: &str) -> Result<Value, OptionsError> {
    let path = Path::new(source);
    let text = if path.is_file() {
        std::fs::read_to_string(path).map_err(|e| OptionsError::Malformed {
            message: format!("{}: {e}", path.display()),
        })?
    } else if looks_like_path(source) {
        return Err(OptionsError::FileNotFound {
            path: path.to_path_buf(),
        });
    } else {
        source.to_string()
    };
    let mut value: Value = serde_yaml::from_str(&text)?;
    resolve_core_tags(&mut value);
    Ok(value)
}

/// Replace `!!float`/`!!int`/`!!str`/`!!bool` tagged scalars by plain values.
fn resolve_core_tags(value: &mut Value) {
    match value {
        Value::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            let text = match &tagged.value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    resolve_core_tags(&mut tagged.value);
                    return;
                }
            };
            let short = tag.rsplit(['!', ':']).next().unwrap_or_default();
            let resolved = match short {
                "float" => text.trim().parse::<f64>().ok().map(Value::from),
                "int" => text.trim().parse::<i64>().ok().map(Value::from),
                "bool" => text.trim().parse::<bool>().ok().map(Value::Bool),
                "str" => Some(Value::String(text)),
                _ => None,
            };
            if let Some(resolved) = resolved {
                *value = resolved;
            }
        }
        Value::Mapping(map) => map.values_mut().for_each(resolve_core_tags),
        Value::Sequence(items) => items.iter_mut().for_each(resolve_core_tags),
        _ => {}
    }
}

fn looks_like_path(source: &str) -> bool {
    !source.contains('\n') && (source.ends_with(".yml") || source.ends_with(".yaml"))
}

fn is_numeric_text(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
}

/// Coerce the textual value of an override into a typed YAML value.
pub fn postprocess_yml_value(text: &str) -> Value {
    let text = text.trim();
    let lower = text.to_ascii_lowercase();
    if text == "~" || lower == "none" || lower == "null" {
        return Value::Null;
    }
    if lower == "true" {
        return Value::Bool(true);
    }
    if lower == "false" {
        return Value::Bool(false);
    }
    if let Some(rest) = text.strip_prefix("!!float") {
        if let Ok(f) = rest.trim().parse::<f64>() {
            return Value::from(f);
        }
    }
    if is_numeric_text(text) {
        if let Ok(i) = text.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return Value::from(f);
        }
    }
    if text.starts_with('[') {
        if let Ok(list @ Value::Sequence(_)) = serde_yaml::from_str::<Value>(text) {
            return list;
        }
    }
    Value::String(text.to_string())
}

/// Apply `key:sub:leaf=value` overrides in order.
///
/// Every intermediate key must already exist; the leaf may be new.
pub fn apply_force_yml<S: AsRef<str>>(root: &mut Value, entries: &[S]) -> Result<(), OptionsError> {
    for entry in entries {
        apply_one(root, entry.as_ref())?;
    }
    Ok(())
}

fn apply_one(root: &mut Value, entry: &str) -> Result<(), OptionsError> {
    let (keys, raw) = entry
        .split_once('=')
        .ok_or_else(|| OptionsError::MalformedOverride {
            entry: entry.to_string(),
        })?;
    let keys: Vec<&str> = keys.trim().split(':').map(str::trim).collect();
    if keys.iter().any(|k| k.is_empty()) {
        return Err(OptionsError::MalformedOverride {
            entry: entry.to_string(),
        });
    }
    let value = postprocess_yml_value(raw);

    let (leaf, parents) = keys
        .split_last()
        .ok_or_else(|| OptionsError::MalformedOverride {
            entry: entry.to_string(),
        })?;
    let mut node = root;
    for key in parents {
        node = node
            .as_mapping_mut()
            .and_then(|m| m.get_mut(*key))
            .ok_or_else(|| OptionsError::UnknownOverrideKey {
                entry: entry.to_string(),
                key: key.to_string(),
            })?;
    }
    let map = node
        .as_mapping_mut()
        .ok_or_else(|| OptionsError::invalid(entry, "parent of the override is not a mapping"))?;
    map.insert(Value::String(leaf.to_string()), value);
    Ok(())
}

/// Render options as the indented `key:value` block written to the run log.
pub fn dict2str(value: &Value) -> String {
    let mut out = String::from("\n");
    if let Value::Mapping(map) = value {
        render_mapping(map, 1, &mut out);
    }
    out
}

fn render_mapping(map: &Mapping, level: usize, out: &mut String) {
    let indent = " ".repeat(level * 2);
    for (k, v) in map {
        let key = scalar_text(k);
        match v {
            Value::Mapping(inner) => {
                out.push_str(&format!("{indent}{key}:[\n"));
                render_mapping(inner, level + 1, out);
                out.push_str(&format!("{indent}]\n"));
            }
            other => out.push_str(&format!("{indent}{key}: {}\n", scalar_text(other))),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => format!(
            "[{}]",
            items.iter().map(scalar_text).collect::<Vec<_>>().join(", ")
        ),
        Value::Mapping(_) => "{..}".to_string(),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
    }
}

/// Copy the option file into the experiment root with a provenance header.
pub fn copy_opt_file(source: &Path, experiments_root: &Path, cmd: &str) -> std::io::Result<()> {
    let body = std::fs::read_to_string(source)?;
    let file_name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "options.yml".into());
    let header = format!(
        "# GENERATE TIME: {}\n# CMD:\n# {cmd}\n\n",
        chrono::Local::now().format("%a %b %e %H:%M:%S %Y")
    );
    crate::persistence::atomic_write(
        &experiments_root.join(file_name),
        format!("{header}{body}").as_bytes(),
    )
}
