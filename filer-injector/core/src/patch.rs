//! JSON Patch (RFC 6902) operations that extend a pod spec without touching
//! its existing entries.

use crate::{Container, Volume, VolumeMount};
use json_patch::{AddOperation, PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const CONTAINERS: [&str; 2] = ["spec", "containers"];
const VOLUMES: [&str; 2] = ["spec", "volumes"];
const ANNOTATIONS: [&str; 2] = ["metadata", "annotations"];

/// Appends `added` to the pod's containers, given the number of containers
/// the spec holds once all earlier operations are applied.
pub fn add_containers(
    existing: usize,
    added: &[Container],
) -> serde_json::Result<Vec<PatchOperation>> {
    append(PointerBuf::from_tokens(CONTAINERS), existing, added)
}

/// Appends `added` to the pod's volumes, given the number of volumes the spec
/// holds once all earlier operations are applied.
pub fn add_volumes(existing: usize, added: &[Volume]) -> serde_json::Result<Vec<PatchOperation>> {
    append(PointerBuf::from_tokens(VOLUMES), existing, added)
}

/// Appends `mount` to the volume mounts of the container at `index`.
pub fn add_volume_mount(
    index: usize,
    existing: usize,
    mount: &VolumeMount,
) -> serde_json::Result<PatchOperation> {
    let mut list = PointerBuf::from_tokens(CONTAINERS);
    list.push_back(index.to_string());
    list.push_back("volumeMounts");
    let mut ops = append(list, existing, std::slice::from_ref(mount))?;
    Ok(ops.remove(0))
}

/// Sets `added` on the pod's annotations, merging with `current` rather than
/// replacing the whole map.
pub fn update_annotations(
    current: Option<&BTreeMap<String, String>>,
    added: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    if added.is_empty() {
        return vec![];
    }

    let Some(current) = current else {
        return vec![PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(ANNOTATIONS),
            value: Value::Object(
                added
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        })];
    };

    added
        .iter()
        .map(|(key, value)| {
            let mut path = PointerBuf::from_tokens(ANNOTATIONS);
            path.push_back(key.as_str());
            let value = Value::String(value.clone());
            if current.get(key).is_some_and(|v| !v.is_empty()) {
                PatchOperation::Replace(ReplaceOperation { path, value })
            } else {
                PatchOperation::Add(AddOperation { path, value })
            }
        })
        .collect()
}

/// Creates the list at `list` when it is empty, then appends to it.
fn append<T: Serialize>(
    list: PointerBuf,
    existing: usize,
    added: &[T],
) -> serde_json::Result<Vec<PatchOperation>> {
    added
        .iter()
        .enumerate()
        .map(|(i, item)| -> serde_json::Result<PatchOperation> {
            let value = serde_json::to_value(item)?;
            if existing + i == 0 {
                return Ok(PatchOperation::Add(AddOperation {
                    path: list.clone(),
                    value: Value::Array(vec![value]),
                }));
            }

            let mut path = list.clone();
            path.push_back("-");
            Ok(PatchOperation::Add(AddOperation { path, value }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use serde_json::json;

    fn mk_container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn mk_volume(name: &str) -> Volume {
        Volume {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn to_json(ops: &[PatchOperation]) -> Value {
        serde_json::to_value(ops).unwrap()
    }

    #[test]
    fn appends_to_existing_list() {
        let ops = add_containers(1, &[mk_container("a"), mk_container("b")]).unwrap();
        assert_eq!(
            to_json(&ops),
            json!([
                { "op": "add", "path": "/spec/containers/-", "value": { "name": "a" } },
                { "op": "add", "path": "/spec/containers/-", "value": { "name": "b" } },
            ])
        );
    }

    #[test]
    fn creates_empty_list() {
        let ops = add_volumes(0, &[mk_volume("a"), mk_volume("b")]).unwrap();
        assert_eq!(
            to_json(&ops),
            json!([
                { "op": "add", "path": "/spec/volumes", "value": [{ "name": "a" }] },
                { "op": "add", "path": "/spec/volumes/-", "value": { "name": "b" } },
            ])
        );
    }

    #[test]
    fn adds_nothing_for_no_items() {
        assert!(add_volumes(0, &[]).unwrap().is_empty());
        assert!(update_annotations(None, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn adds_volume_mounts() {
        let mount = VolumeMount {
            name: "vol".to_string(),
            mount_path: "/mnt".to_string(),
            ..Default::default()
        };
        let ops = [
            add_volume_mount(2, 0, &mount).unwrap(),
            add_volume_mount(0, 3, &mount).unwrap(),
        ];
        assert_eq!(
            to_json(&ops),
            json!([
                {
                    "op": "add",
                    "path": "/spec/containers/2/volumeMounts",
                    "value": [{ "name": "vol", "mountPath": "/mnt" }],
                },
                {
                    "op": "add",
                    "path": "/spec/containers/0/volumeMounts/-",
                    "value": { "name": "vol", "mountPath": "/mnt" },
                },
            ])
        );
    }

    #[test]
    fn adds_annotation_map_when_absent() {
        let added = btreemap! { "example.com/status".to_string() => "injected".to_string() };
        assert_eq!(
            to_json(&update_annotations(None, &added)),
            json!([{
                "op": "add",
                "path": "/metadata/annotations",
                "value": { "example.com/status": "injected" },
            }])
        );
    }

    #[test]
    fn merges_into_existing_annotations() {
        let current = btreemap! {
            "other".to_string() => "kept".to_string(),
            "example.com/status".to_string() => String::new(),
        };
        let added = btreemap! { "example.com/status".to_string() => "injected".to_string() };
        assert_eq!(
            to_json(&update_annotations(Some(&current), &added)),
            json!([{
                "op": "add",
                "path": "/metadata/annotations/example.com~1status",
                "value": "injected",
            }])
        );
    }

    #[test]
    fn replaces_set_annotations() {
        let current = btreemap! { "example.com/status".to_string() => "pending".to_string() };
        let added = btreemap! { "example.com/status".to_string() => "injected".to_string() };
        let ops = update_annotations(Some(&current), &added);
        assert!(matches!(
            &ops[..],
            [PatchOperation::Replace(op)]
                if op.path == PointerBuf::from_tokens(["metadata", "annotations", "example.com/status"])
        ));
        assert_eq!(
            to_json(&ops),
            json!([{
                "op": "replace",
                "path": "/metadata/annotations/example.com~1status",
                "value": "injected",
            }])
        );
    }

    #[test]
    fn escapes_annotation_keys() {
        let added = btreemap! { "a/b~c".to_string() => "v".to_string() };
        let ops = update_annotations(Some(&BTreeMap::new()), &added);
        assert_eq!(to_json(&ops)[0]["path"], json!("/metadata/annotations/a~1b~0c"));

        let mut doc = json!({ "metadata": { "annotations": {} } });
        json_patch::patch(&mut doc, &ops).expect("patch must apply");
        assert_eq!(doc["metadata"]["annotations"]["a/b~c"], json!("v"));
    }
}
