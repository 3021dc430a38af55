//! Parameter sweep generation
//!
//! Expands the config's `grid` section (strategy parameter name -> candidate
//! values) into one config per combination.

use itertools::Itertools;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::Config;

/// Generate all config combinations from the sweep parameters.
///
/// Keys are visited in sorted order so the output order is deterministic.
/// Without a sweep section the base config is returned alone.
pub fn generate_configs(config: &Config) -> Vec<Config> {
    let grid = match &config.grid {
        Some(g) if !g.is_empty() => g,
        _ => return vec![config.clone()],
    };

    let mut keys: Vec<&String> = grid.keys().collect();
    keys.sort();

    if keys.iter().any(|k| grid[*k].is_empty()) {
        return Vec::new();
    }

    keys.iter()
        .map(|k| grid[*k].iter())
        .multi_cartesian_product()
        .map(|combo| {
            let mut cfg = config.clone();
            cfg.grid = None;
            if !cfg.strategy.is_object() {
                cfg.strategy = Value::Object(serde_json::Map::new());
            }
            if let Some(obj) = cfg.strategy.as_object_mut() {
                for (key, value) in keys.iter().zip(combo) {
                    obj.insert((*key).clone(), value.clone());
                }
            }
            cfg
        })
        .collect()
}

/// Get total number of sweep combinations
pub fn total_combinations(config: &Config) -> usize {
    match &config.grid {
        Some(grid) if !grid.is_empty() => grid.values().map(|v| v.len()).product(),
        _ => 1,
    }
}

fn parse_scalar(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Value::from(n));
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Some(Value::from(n));
    }
    match raw {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        _ => Some(Value::String(raw.to_string())),
    }
}

/// Parse a CLI override of the form `param=v1,v2,v3`
pub fn parse_override(s: &str) -> Option<(String, Vec<Value>)> {
    let (key, values) = s.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let values: Vec<Value> = values.split(',').filter_map(parse_scalar).collect();
    if values.is_empty() {
        None
    } else {
        Some((key.to_string(), values))
    }
}

/// Apply CLI overrides to the sweep section; malformed entries are skipped
pub fn apply_overrides(config: &mut Config, overrides: &[String]) {
    for override_str in overrides {
        match parse_override(override_str) {
            Some((key, values)) => {
                config
                    .grid
                    .get_or_insert_with(HashMap::new)
                    .insert(key, values);
            }
            None => tracing::warn!("Ignoring malformed sweep override: {}", override_str),
        }
    }
}

/// Numeric strategy params of a config, for reporting
pub fn extract_params(config: &Config) -> BTreeMap<String, f64> {
    let Some(obj) = config.strategy.as_object() else {
        return BTreeMap::new();
    };

    obj.iter()
        .filter_map(|(k, v)| {
            let n = match v {
                Value::Number(n) => n.as_f64()?,
                Value::Bool(b) => f64::from(u8::from(*b)),
                _ => return None,
            };
            Some((k.clone(), n))
        })
        .collect()
}

/// Format params for display
pub fn format_params(params: &BTreeMap<String, f64>) -> String {
    params
        .iter()
        .map(|(k, v)| {
            if v.fract() == 0.0 && v.abs() < 1e6 {
                format!("{}={}", k, *v as i64)
            } else {
                format!("{}={:.2}", k, v)
            }
        })
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sweep_config() -> Config {
        let mut grid = HashMap::new();
        grid.insert("num_grids".to_string(), vec![json!(8), json!(10)]);
        grid.insert("range_pct".to_string(), vec![json!(3.0), json!(5.0), json!(7.0)]);
        Config {
            strategy: json!({ "max_positions": 3 }),
            grid: Some(grid),
            ..Config::default()
        }
    }

    #[test]
    fn test_generate_configs_cartesian_product() {
        let config = sweep_config();
        let configs = generate_configs(&config);
        assert_eq!(configs.len(), 6);
        assert_eq!(total_combinations(&config), 6);

        // first key varies slowest
        assert_eq!(configs[0].strategy["num_grids"], 8);
        assert_eq!(configs[0].strategy["range_pct"], 3.0);
        assert_eq!(configs[5].strategy["num_grids"], 10);
        assert_eq!(configs[5].strategy["range_pct"], 7.0);
        assert!(configs.iter().all(|c| c.strategy["max_positions"] == 3));
        assert!(configs.iter().all(|c| c.grid.is_none()));
    }

    #[test]
    fn test_no_sweep_returns_base() {
        let config = Config::default();
        assert_eq!(generate_configs(&config), vec![config.clone()]);
        assert_eq!(total_combinations(&config), 1);
    }

    #[test]
    fn test_parse_override() {
        let (key, values) = parse_override("adx_threshold=20,25.5,true,tight").unwrap();
        assert_eq!(key, "adx_threshold");
        assert_eq!(values, vec![json!(20), json!(25.5), json!(true), json!("tight")]);
        assert!(parse_override("no_equals").is_none());
        assert!(parse_override("empty=").is_none());
    }

    #[test]
    fn test_apply_overrides_replaces_key() {
        let mut config = sweep_config();
        apply_overrides(&mut config, &["num_grids=12".to_string(), "bad".to_string()]);
        assert_eq!(total_combinations(&config), 3);
    }

    #[test]
    fn test_extract_and_format_params() {
        let config = Config {
            strategy: json!({ "num_grids": 10, "range_pct": 4.25, "tight_sl": true, "label": "x" }),
            ..Config::default()
        };
        let params = extract_params(&config);
        assert_eq!(params.len(), 3);
        assert_eq!(
            format_params(&params),
            "num_grids=10, range_pct=4.25, tight_sl=1"
        );
    }
}
