use serde_json::map::Entry;
use serde_json::{Map, Value as Json};

use crate::MergeKeys;

fn child(path: &str, key: &str) -> String {
    if path.is_empty() { key.to_string() } else { format!("{}.{}", path, key) }
}

pub(crate) fn diff(current: &Json, desired: &Json, keys: &MergeKeys) -> Json {
    match (current, desired) {
        (Json::Object(c), Json::Object(d)) => Json::Object(diff_map(c, d, keys, "", false)),
        _ if current == desired => Json::Object(Map::new()),
        _ => desired.clone(),
    }
}

/// `None` when the two values are equal. With `additive` set (inside a keyed list
/// element) fields missing from `desired` are left alone instead of deleted.
fn diff_value(current: &Json, desired: &Json, keys: &MergeKeys, path: &str, additive: bool) -> Option<Json> {
    if current == desired {
        return None;
    }
    match (current, desired) {
        (Json::Object(c), Json::Object(d)) => {
            let m = diff_map(c, d, keys, path, additive);
            (!m.is_empty()).then_some(Json::Object(m))
        }
        (Json::Array(c), Json::Array(d)) => match keys.key_for(path) {
            Some(key) => diff_keyed_list(c, d, key, keys, path),
            None => Some(desired.clone()),
        },
        _ => Some(desired.clone()),
    }
}

fn diff_map(current: &Map<String, Json>, desired: &Map<String, Json>, keys: &MergeKeys, path: &str, additive: bool) -> Map<String, Json> {
    let mut out = Map::new();
    for (k, dv) in desired {
        match current.get(k) {
            Some(cv) => {
                if let Some(v) = diff_value(cv, dv, keys, &child(path, k), additive) {
                    out.insert(k.clone(), v);
                }
            }
            // absent and null mean the same thing in a merge document
            None if dv.is_null() => {}
            None => {
                out.insert(k.clone(), dv.clone());
            }
        }
    }
    if !additive {
        for (k, cv) in current {
            if !cv.is_null() && !desired.contains_key(k) {
                out.insert(k.clone(), Json::Null);
            }
        }
    }
    out
}

fn diff_keyed_list(current: &[Json], desired: &[Json], key: &str, keys: &MergeKeys, path: &str) -> Option<Json> {
    let desired_keys: Option<Vec<&Json>> = desired.iter().map(|e| e.get(key)).collect();
    let Some(desired_keys) = desired_keys else {
        return Some(Json::Array(desired.to_vec()));
    };

    let mut out = Vec::new();
    for (de, k) in desired.iter().zip(desired_keys) {
        match current.iter().find(|ce| ce.get(key) == Some(k)) {
            Some(ce) => {
                if let Some(Json::Object(mut m)) = diff_value(ce, de, keys, path, true) {
                    m.insert(key.to_string(), k.clone());
                    out.push(Json::Object(m));
                }
            }
            None => out.push(de.clone()),
        }
    }
    (!out.is_empty()).then_some(Json::Array(out))
}

pub(crate) fn apply(target: &mut Json, patch: &Json, keys: &MergeKeys, path: &str) {
    let Json::Object(pm) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Json::Object(Map::new());
    }
    let Some(tm) = target.as_object_mut() else { return };

    for (k, pv) in pm {
        if pv.is_null() {
            tm.remove(k);
            continue;
        }
        let p = child(path, k);
        match tm.entry(k.clone()) {
            Entry::Occupied(mut o) => {
                let existing = o.get_mut();
                match (keys.key_for(&p), existing, pv) {
                    (Some(key), Json::Array(items), Json::Array(patches)) => merge_keyed_items(items, patches, key, keys, &p),
                    (_, existing, _) => apply(existing, pv, keys, &p),
                }
            }
            Entry::Vacant(v) => {
                let mut fresh = Json::Null;
                apply(&mut fresh, pv, keys, &p);
                v.insert(fresh);
            }
        }
    }
}

fn merge_keyed_items(items: &mut Vec<Json>, patches: &[Json], key: &str, keys: &MergeKeys, path: &str) {
    // a list that was not fully keyed was diffed as a replacement
    if patches.iter().any(|p| p.get(key).is_none()) {
        *items = patches.to_vec();
        return;
    }
    for pe in patches {
        let k = pe.get(key);
        match items.iter().position(|it| it.get(key) == k) {
            Some(i) => apply(&mut items[i], pe, keys, path),
            None => {
                let mut fresh = Json::Null;
                apply(&mut fresh, pe, keys, path);
                items.push(fresh);
            }
        }
    }
}
