//! Pre-checks run before a worker is enqueued
//!
//! They split the requested items into the ones a worker will process and
//! the ones it will not, each ignored entry carrying a feedback string.

use std::collections::{HashMap, HashSet};

use crate::models::{
    ContainerType, Node, NodeType, Renames, FEEDBACK_BATCH_DUPLICATE, FEEDBACK_DUPLICATE,
    FEEDBACK_EXIST, FEEDBACK_UNAUTHORIZED,
};
use crate::services::{ItemQuery, MetadataRegistry};
use crate::types::{DatasetError, Result};

/// Items split into the processed and the ignored ones
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Checked {
    pub accepted: Vec<Node>,
    pub ignored: Vec<Node>,
}

type DestinationKey = (String, Option<String>, NodeType);

fn destination_key(name: &str, parent_path: Option<&str>, node_type: NodeType) -> DestinationKey {
    (
        name.to_string(),
        parent_path.filter(|p| !p.is_empty()).map(str::to_string),
        node_type,
    )
}

fn with_feedback(mut node: Node, feedback: &str) -> Node {
    node.feedback = Some(feedback.to_string());
    node
}

/// Resolve `ids` inside one container.
///
/// Ids that are unknown, archived or owned by another container are ignored
/// as `unauthorized`; the rest keep request order with feedback `exist`.
pub async fn validate_items(
    registry: &dyn MetadataRegistry,
    ids: &[String],
    container_code: &str,
    container_type: ContainerType,
) -> Result<Checked> {
    let mut checked = Checked::default();
    let mut seen = HashSet::new();

    for id in ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        let found = match registry.get_by_id(id).await {
            Ok(node) => Some(node),
            Err(DatasetError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        match found {
            Some(node)
                if node.container_code == container_code
                    && node.container_type == container_type
                    && !node.is_archived() =>
            {
                checked.accepted.push(with_feedback(node, FEEDBACK_EXIST));
            }
            _ => {
                let missing = Node {
                    id: id.clone(),
                    ..Node::default()
                };
                checked
                    .ignored
                    .push(with_feedback(missing, FEEDBACK_UNAUTHORIZED));
            }
        }
    }
    Ok(checked)
}

/// Keep the first item per name and type under `destination` (a folder path,
/// `None` for the dataset root). Later ones stay accepted under a name
/// prefixed by their flattened source parent path; a duplicate without a
/// parent path cannot be renamed and is ignored.
pub fn flag_batch_duplicates(items: Vec<Node>, destination: Option<&str>) -> Checked {
    let mut checked = Checked::default();
    let mut seen = HashSet::new();

    for item in items {
        if seen.insert(destination_key(&item.name, destination, item.node_type)) {
            checked.accepted.push(item);
            continue;
        }
        let mut duplicate = with_feedback(item, FEEDBACK_BATCH_DUPLICATE);
        match duplicate.parent_path.as_deref().filter(|p| !p.is_empty()) {
            Some(parent) => {
                duplicate.name = format!("{}_{}", parent.replace('/', "_"), duplicate.name);
                seen.insert(destination_key(&duplicate.name, destination, duplicate.node_type));
                checked.accepted.push(duplicate);
            }
            None => checked.ignored.push(duplicate),
        }
    }
    checked
}

/// Recover the source nodes of `processing` from `originals`, together with
/// the new leaf name of every node the pre-check renamed
pub fn split_renames(processing: &[Node], originals: &[Node]) -> (Vec<Node>, Renames) {
    let by_id: HashMap<&str, &Node> = originals.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut sources = Vec::with_capacity(processing.len());
    let mut renames = Renames::new();

    for item in processing {
        let source = by_id.get(item.id.as_str()).copied().unwrap_or(item);
        if source.name != item.name {
            renames.insert(item.id.clone(), item.name.clone());
        }
        let mut source = source.clone();
        source.feedback = None;
        sources.push(source);
    }
    (sources, renames)
}

/// Ignore items whose name and type already exist under `destination`
pub async fn remove_existing(
    registry: &dyn MetadataRegistry,
    items: Vec<Node>,
    destination: Option<&str>,
    dataset_code: &str,
) -> Result<Checked> {
    let existing: HashSet<DestinationKey> = registry
        .search(&ItemQuery::container(dataset_code, ContainerType::Dataset))
        .await?
        .iter()
        .filter(|n| !n.is_archived())
        .map(|n| destination_key(&n.name, n.parent_path.as_deref(), n.node_type))
        .collect();

    let mut checked = Checked::default();
    for item in items {
        if existing.contains(&destination_key(&item.name, destination, item.node_type)) {
            checked.ignored.push(with_feedback(item, FEEDBACK_DUPLICATE));
        } else {
            checked.accepted.push(item);
        }
    }
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryRegistry;
    use crate::testing::*;

    #[tokio::test]
    async fn test_validate_items_flags_foreign_and_missing_ids() {
        let registry = InMemoryRegistry::new();
        let mine = project_file("p1", "a.txt", None, 1);
        let other = dataset_file("d1", "b.txt", None, 1);
        registry.insert(mine).await;
        registry.insert(other).await;

        let ids = vec!["missing".to_string(), "p1".to_string(), "d1".to_string()];
        let checked = validate_items(&registry, &ids, PROJECT, ContainerType::Project)
            .await
            .unwrap();

        assert_eq!(checked.accepted.len(), 1);
        assert_eq!(checked.accepted[0].id, "p1");
        assert_eq!(checked.accepted[0].feedback.as_deref(), Some(FEEDBACK_EXIST));
        let ignored: Vec<_> = checked.ignored.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ignored, vec!["missing", "d1"]);
        assert!(checked
            .ignored
            .iter()
            .all(|n| n.feedback.as_deref() == Some(FEEDBACK_UNAUTHORIZED)));
    }

    #[test]
    fn test_batch_duplicates_renamed_with_flattened_parent() {
        let root = project_folder("f", "raw", None);
        let nested = project_folder("g", "day1", Some(&root));
        let other = project_folder("h", "day2", Some(&root));
        let mut first = project_file("a", "x.txt", Some(&nested), 1);
        let mut second = project_file("b", "x.txt", Some(&other), 1);
        let folder_same_name = project_folder("c", "x.txt", Some(&nested));
        for n in [&mut first, &mut second] {
            n.feedback = Some(FEEDBACK_EXIST.to_string());
        }

        let checked = flag_batch_duplicates(vec![first, second, folder_same_name], None);
        let accepted: Vec<_> = checked
            .accepted
            .iter()
            .map(|n| (n.id.as_str(), n.name.as_str()))
            .collect();
        assert_eq!(
            accepted,
            vec![("a", "x.txt"), ("b", "raw_day2_x.txt"), ("c", "x.txt")]
        );
        assert_eq!(
            checked.accepted[1].feedback.as_deref(),
            Some(FEEDBACK_BATCH_DUPLICATE)
        );
        assert!(checked.ignored.is_empty());
    }

    #[test]
    fn test_batch_duplicate_without_parent_is_ignored() {
        let first = project_folder("a", "x", None);
        let second = project_folder("b", "x", None);

        let checked = flag_batch_duplicates(vec![first, second], Some("dest"));
        assert_eq!(checked.accepted.len(), 1);
        assert_eq!(checked.ignored[0].id, "b");
        assert_eq!(
            checked.ignored[0].feedback.as_deref(),
            Some(FEEDBACK_BATCH_DUPLICATE)
        );
    }

    #[test]
    fn test_split_renames_restores_source_names() {
        let folder = project_folder("f", "raw", None);
        let original = project_file("b", "x.txt", Some(&folder), 1);
        let kept = project_file("a", "y.txt", None, 1);
        let mut renamed = original.clone();
        renamed.name = "raw_x.txt".to_string();
        renamed.feedback = Some(FEEDBACK_BATCH_DUPLICATE.to_string());

        let (sources, renames) =
            split_renames(&[kept.clone(), renamed], &[kept, original.clone()]);
        assert_eq!(sources[1], original);
        assert_eq!(renames.len(), 1);
        assert_eq!(renames.get("b").map(String::as_str), Some("raw_x.txt"));
    }

    #[tokio::test]
    async fn test_remove_existing_matches_name_path_and_type() {
        let registry = InMemoryRegistry::new();
        let folder = dataset_folder("d0", "raw", None);
        registry.insert(dataset_file("d1", "a.txt", Some(&folder), 1)).await;
        registry.insert(folder.clone()).await;

        let incoming = project_file("p1", "a.txt", None, 1);
        let clash = remove_existing(&registry, vec![incoming.clone()], Some("raw"), DATASET)
            .await
            .unwrap();
        assert_eq!(clash.ignored[0].id, "p1");
        assert_eq!(clash.ignored[0].feedback.as_deref(), Some(FEEDBACK_DUPLICATE));

        let checked = remove_existing(&registry, vec![incoming], None, DATASET)
            .await
            .unwrap();
        assert_eq!(checked.accepted[0].id, "p1");
        assert!(checked.ignored.is_empty());
    }
}
