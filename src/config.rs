//! Ambient config-parsing layer: layer configuration is a simple mapping
//! from string keys to string values (`LayerOption`); a net is described
//! as a JSON array of those maps, loaded with `serde_json`.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{GPError, GPResult};

pub type LayerOption = HashMap<String, String>;

pub fn load_net_config(path: &Path) -> GPResult<Vec<LayerOption>> {
    let text = std::fs::read_to_string(path)?;
    parse_net_config(&text)
}

pub fn parse_net_config(text: &str) -> GPResult<Vec<LayerOption>> {
    serde_json::from_str(text).map_err(|e| GPError::BadOption {
        layer: "<net>".to_string(),
        detail: e.to_string(),
    })
}

pub fn opt_find_string(opt: &LayerOption, key: &str, default: &str) -> String {
    opt.get(key).cloned().unwrap_or_else(|| default.to_string())
}

pub fn opt_find_int(opt: &LayerOption, key: &str, default: i64) -> i64 {
    opt.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

pub fn opt_find_float(opt: &LayerOption, key: &str, default: f64) -> f64 {
    opt.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

pub fn opt_check_bool(opt: &LayerOption, key: &str) -> bool {
    matches!(opt.get(key).map(String::as_str), Some("1") | Some("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_of_maps() {
        let json = r#"[{"type":"Input","name":"data","w":"4"}]"#;
        let opts = parse_net_config(json).unwrap();
        assert_eq!(opts.len(), 1);
        assert_eq!(opt_find_string(&opts[0], "type", ""), "Input");
        assert_eq!(opt_find_int(&opts[0], "w", 0), 4);
    }
}
