//! Frame deserialization helpers.
//!
//! With the `tracing` feature, fields the typed model does not capture are logged
//! as warnings so backend protocol drift shows up in the logs instead of vanishing.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize `value` into `T`, warning about fields `T` ignores.
///
/// Unknown fields never fail deserialization. On failure the offending path is
/// logged at `error` level before the error is returned.
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    let original = value.clone();
    let mut ignored: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        ignored.push(path.to_string());
    })
    .inspect_err(|_| {
        let raw = original.to_string();
        let de = &mut serde_json::Deserializer::from_str(&raw);
        if let Err(path_err) = serde_path_to_error::deserialize::<_, T>(de) {
            let path = path_err.path().to_string();
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path,
                value = %describe(lookup(&original, &path)),
                error = %path_err.inner(),
                "frame deserialization failed"
            );
        }
    })?;

    for path in ignored {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %describe(lookup(&original, &path)),
            "unknown field in frame"
        );
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Resolve a dotted path as reported by `serde_ignored` or `serde_path_to_error`.
///
/// `?` segments mark `Option` layers and are skipped; numeric segments index arrays.
#[cfg(feature = "tracing")]
fn lookup<'value>(root: &'value Value, path: &str) -> Option<&'value Value> {
    path.split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .try_fold(root, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}

#[cfg(feature = "tracing")]
fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "<unable to retrieve>".to_owned(), Value::to_string)
}
