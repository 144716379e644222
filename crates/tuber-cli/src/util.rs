//! Shared argument parsing for CLI commands

use std::collections::BTreeMap;

use tuber_core::ResourceRef;

use crate::error::{CliError, Result};

/// Parse `key=value` pairs; later keys override earlier ones
pub fn parse_vars(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            CliError::input_with_help(
                format!("'{}' is not a key=value pair", pair),
                "pass variables as --var name=value",
            )
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::input(format!("'{}' has an empty key", pair)));
        }
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Parse `Kind/name` exclusions
pub fn parse_resources(values: &[String]) -> Result<Vec<ResourceRef>> {
    values
        .iter()
        .map(|v| v.parse::<ResourceRef>().map_err(CliError::from))
        .collect()
}
