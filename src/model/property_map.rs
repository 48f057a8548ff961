//! PropertyMap: free-form metadata attached to a context token.

use std::collections::HashMap;
use super::Value;

/// A map of metadata keys to values.
pub type PropertyMap = HashMap<String, Value>;

/// Build a PropertyMap from (key, value) pairs.
pub fn properties<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> PropertyMap
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Merge `patch` into `target`; a `Null` in the patch deletes the key.
pub fn merge_properties(target: &mut PropertyMap, patch: PropertyMap) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}
