//! Dotted-path access used by filter evaluation and mutations.
//!
//! Arrays met along the way fan out: `friends.ref` reaches the `ref` of every
//! element of `friends`. A numeric segment addresses one element.

use serde_json::{Map, Value};

pub fn split(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Every value reachable at `segments`.
pub fn values_at<'a>(node: &'a Value, segments: &[&str]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    collect(node, segments, &mut out);
    out
}

fn collect<'a>(node: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(node);
        return;
    };

    match node {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect(child, rest, out);
            }
        }
        Value::Array(items) => match head.parse::<usize>() {
            Ok(idx) => {
                if let Some(item) = items.get(idx) {
                    collect(item, rest, out);
                }
            }
            Err(_) => {
                for item in items {
                    collect(item, segments, out);
                }
            }
        },
        _ => {}
    }
}

/// Call `visit` with every object that owns the last segment of `segments`,
/// together with that last segment.
pub fn visit_parents_mut(
    node: &mut Value,
    segments: &[&str],
    visit: &mut dyn FnMut(&mut Map<String, Value>, &str),
) {
    match node {
        Value::Object(map) => match segments {
            [] => {}
            [last] => visit(map, *last),
            [head, rest @ ..] => {
                if let Some(child) = map.get_mut(*head) {
                    visit_parents_mut(child, rest, visit);
                }
            }
        },
        Value::Array(items) => {
            let Some((head, rest)) = segments.split_first() else {
                return;
            };
            match head.parse::<usize>() {
                Ok(idx) if !rest.is_empty() => {
                    if let Some(item) = items.get_mut(idx) {
                        visit_parents_mut(item, rest, visit);
                    }
                }
                Ok(_) => {}
                Err(_) => {
                    for item in items.iter_mut() {
                        visit_parents_mut(item, segments, visit);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Copy the value at a dotted path (objects only) from `src` into `dst`.
pub fn copy_path(src: &Map<String, Value>, dst: &mut Map<String, Value>, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let Some(value) = src.get(*head) else {
        return;
    };

    if rest.is_empty() {
        dst.insert((*head).to_string(), value.clone());
        return;
    }

    if let Value::Object(child_src) = value {
        let slot = dst
            .entry((*head).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(child_dst) = slot {
            copy_path(child_src, child_dst, rest);
        }
    }
}
