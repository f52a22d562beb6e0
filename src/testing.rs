//! Tree builders shared by unit tests

use crate::models::{ContainerType, Node, NodeType, Storage};

pub(crate) const PROJECT: &str = "proj";
pub(crate) const DATASET: &str = "ds1";
pub(crate) const OWNER: &str = "admin";

fn node(
    id: &str,
    name: &str,
    node_type: NodeType,
    parent: Option<&Node>,
    code: &str,
    container_type: ContainerType,
    size: u64,
) -> Node {
    Node {
        id: id.to_string(),
        node_type,
        name: name.to_string(),
        parent: parent.map(|p| p.id.clone()),
        parent_path: parent.map(|p| p.full_path()),
        container_code: code.to_string(),
        container_type,
        size,
        owner: OWNER.to_string(),
        ..Node::default()
    }
}

fn with_location(mut node: Node, bucket: &str, key: String) -> Node {
    node.storage = Some(Storage {
        location_uri: format!("minio://http://minio.minio:9000/{}/{}", bucket, key),
    });
    node
}

pub(crate) fn project_folder(id: &str, name: &str, parent: Option<&Node>) -> Node {
    node(id, name, NodeType::Folder, parent, PROJECT, ContainerType::Project, 0)
}

pub(crate) fn project_file(id: &str, name: &str, parent: Option<&Node>, size: u64) -> Node {
    let n = node(id, name, NodeType::File, parent, PROJECT, ContainerType::Project, size);
    let key = n.full_path();
    with_location(n, &format!("core-{}", PROJECT), key)
}

pub(crate) fn dataset_folder(id: &str, name: &str, parent: Option<&Node>) -> Node {
    node(id, name, NodeType::Folder, parent, DATASET, ContainerType::Dataset, 0)
}

pub(crate) fn dataset_file(id: &str, name: &str, parent: Option<&Node>, size: u64) -> Node {
    let n = node(id, name, NodeType::File, parent, DATASET, ContainerType::Dataset, size);
    let key = format!("data/{}", n.full_path());
    with_location(n, DATASET, key)
}
