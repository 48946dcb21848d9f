use std::collections::HashMap;

use crate::config::normalize_extension;

const INVALID_ENTRY: &str = "extension map entries must be written as <extension>=<category>, separated by commas.";

pub fn check_extension_map(value: &str) -> Result<String, String> {
    parse_extension_map(value)?;
    Ok(value.to_string())
}

/// Parses `.vbk=full,.vib=incremental` into a normalized extension to category map.
pub fn parse_extension_map(value: &str) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();

    for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let Some((extension, category)) = entry.split_once('=') else {
            return Err(INVALID_ENTRY.to_string());
        };
        let (extension, category) = (extension.trim(), category.trim());
        if extension.trim_start_matches('.').is_empty() || category.is_empty() {
            return Err(INVALID_ENTRY.to_string());
        }

        map.insert(normalize_extension(extension), category.to_string());
    }

    Ok(map)
}

/// Comma separated list with blanks removed.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
