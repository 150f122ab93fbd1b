//! Layered config merge
//!
//! Priority order is defaults < env < region < variant. Maps merge
//! key-by-key; scalars and lists are replaced wholesale by the higher
//! layer. Delete markers survive the merge and are stripped in one pass at
//! the end, so a deletion wins no matter which layer carries it.

use std::collections::BTreeMap;

use crate::appconfig::schema::{parse_yaml, AppConfig, ConfigValue};
use crate::errors::Error;

/// Merge one override layer's body into the base body.
pub fn merge(base: &mut BTreeMap<String, ConfigValue>, overlay: BTreeMap<String, ConfigValue>) {
    for (key, overlay_value) in overlay {
        match (base.get_mut(&key), overlay_value) {
            (Some(ConfigValue::Map(base_map)), ConfigValue::Map(overlay_map)) => {
                merge(base_map, overlay_map);
            }
            (_, overlay_value) => {
                base.insert(key, overlay_value);
            }
        }
    }
}

/// Remove every key whose value is the delete marker, recursing into maps.
pub fn strip_deleted(map: &mut BTreeMap<String, ConfigValue>) {
    map.retain(|_, value| !matches!(value, ConfigValue::Delete));
    for value in map.values_mut() {
        if let ConfigValue::Map(inner) = value {
            strip_deleted(inner);
        }
    }
}

/// Compile the four configuration layers into one document.
///
/// The defaults layer is required; the other three may be empty strings and
/// contribute nothing. Head fields come from defaults only.
pub fn multi_merge(
    default_yaml: &str,
    env_yaml: &str,
    region_yaml: &str,
    variant_yaml: &str,
) -> Result<AppConfig, Error> {
    if default_yaml.is_empty() {
        return Err(Error::Parse(
            "must provide a default yaml at minimum".into(),
        ));
    }

    let mut compiled = parse_yaml(default_yaml)
        .map_err(|e| Error::Parse(format!("could not parse default layer: {e}")))?;

    for (role, layer) in [
        ("env", env_yaml),
        ("region", region_yaml),
        ("variant", variant_yaml),
    ] {
        if layer.is_empty() {
            continue;
        }
        let parsed = parse_yaml(layer)
            .map_err(|e| Error::Parse(format!("could not parse {role} layer: {e}")))?;
        merge(&mut compiled.other, parsed.other);
    }

    strip_deleted(&mut compiled.other);
    Ok(compiled)
}
