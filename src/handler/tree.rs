//! Bracketed field-name flattening.
//!
//! Form fields such as `user[address][city]` or `tags[]` are split into path
//! segments and mounted into a nested [`Tree`]. The same mount rules serve the
//! form data tree (string leaves) and the upload tree (file references).

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Deepest accepted field path. Longer names are dropped without error.
pub const MAX_LEVEL: usize = 127;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("invalid multiple values to key '{key}' in tree")]
    Conflict { key: String },
}

/// A value that can sit at the end of a field path.
pub trait Leaf {
    /// Blank leaves yield to real data and may be promoted to branches.
    fn is_blank(&self) -> bool;
}

impl Leaf for String {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Node<T> {
    Value(T),
    List(Vec<T>),
    Branch(Tree<T>),
}

impl<T: Leaf> Node<T> {
    fn is_blank(&self) -> bool {
        match self {
            Node::Value(value) => value.is_blank(),
            Node::List(values) => is_blank(values),
            Node::Branch(_) => false,
        }
    }

    fn collapse(mut values: Vec<T>) -> Self {
        match values.len() {
            1 => match values.pop() {
                Some(value) => Node::Value(value),
                None => Node::List(values),
            },
            _ => Node::List(values),
        }
    }
}

fn is_blank<T: Leaf>(values: &[T]) -> bool {
    match values {
        [] => true,
        [only] => only.is_blank(),
        _ => false,
    }
}

/// Nested mapping built from flat field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Tree<T> {
    nodes: BTreeMap<String, Node<T>>,
}

/// Form values keyed by field path.
pub type DataTree = Tree<String>;

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

impl<T: Leaf> Tree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Node<T>> {
        self.nodes.get(key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Node<T>> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Mount `values` under the path encoded in a bracketed field name.
    pub fn push(&mut self, name: &str, values: Vec<T>) -> Result<(), TreeError> {
        let path = fetch_indexes(name);
        if path.len() > MAX_LEVEL {
            tracing::debug!(field = name, depth = path.len(), "field nesting too deep, dropped");
            return Ok(());
        }
        self.mount(&path, values)
    }

    /// Mount `values` under an already split path.
    ///
    /// A trailing empty segment (`a[]`) appends instead of replacing.
    pub fn mount(&mut self, path: &[String], values: Vec<T>) -> Result<(), TreeError> {
        let Some((key, rest)) = path.split_first() else {
            return Ok(());
        };

        let incoming_blank = is_blank(&values);
        let append = matches!(rest, [marker] if marker.is_empty());
        if rest.is_empty() || append {
            return self.mount_leaf(key, values, append, incoming_blank);
        }

        let node = self
            .nodes
            .entry(key.clone())
            .or_insert_with(|| Node::Branch(Tree::new()));

        match node {
            Node::Branch(tree) => tree.mount(rest, values),
            leaf if leaf.is_blank() => {
                let mut tree = Tree::new();
                tree.mount(rest, values)?;
                *leaf = Node::Branch(tree);
                Ok(())
            }
            _ if incoming_blank => Ok(()),
            _ => Err(TreeError::Conflict { key: key.clone() }),
        }
    }

    fn mount_leaf(
        &mut self,
        key: &str,
        values: Vec<T>,
        append: bool,
        incoming_blank: bool,
    ) -> Result<(), TreeError> {
        let Some(node) = self.nodes.get_mut(key) else {
            let node = if append {
                Node::List(values)
            } else {
                Node::collapse(values)
            };
            self.nodes.insert(key.to_owned(), node);
            return Ok(());
        };

        if let Node::Branch(_) = node {
            if incoming_blank {
                return Ok(());
            }
            return Err(TreeError::Conflict {
                key: key.to_owned(),
            });
        }

        if append {
            // Arrays keep every entry, blanks included, in arrival order.
            if let Node::List(existing) = node {
                existing.extend(values);
                return Ok(());
            }
        }

        if incoming_blank && !node.is_blank() {
            return Ok(());
        }
        *node = if append {
            Node::List(values)
        } else {
            Node::collapse(values)
        };
        Ok(())
    }
}

/// Split a bracketed field name into path segments.
///
/// Whitespace is ignored. `key[a][b]` yields `["key", "a", "b"]`, `key[]`
/// yields `["key", ""]` and text after a closing bracket starts a new segment.
pub fn fetch_indexes(name: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum Position {
        Segment,
        Open,
        Closed,
    }

    let mut keys = vec![String::new()];
    let mut position = Position::Segment;

    for c in name.chars() {
        match c {
            c if c.is_whitespace() => {}
            '[' => position = Position::Open,
            ']' => {
                if position == Position::Open {
                    keys.push(String::new());
                }
                position = Position::Closed;
            }
            c => {
                if position != Position::Segment {
                    keys.push(String::new());
                }
                if let Some(current) = keys.last_mut() {
                    current.push(c);
                }
                position = Position::Segment;
            }
        }
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(s: &str) -> Node<String> {
        Node::Value(s.to_owned())
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splits_bracketed_names() {
        let cases: &[(&str, &[&str])] = &[
            ("key", &["key"]),
            ("key[subkey]", &["key", "subkey"]),
            ("key[subkey]value", &["key", "subkey", "value"]),
            ("key[subkey][value]", &["key", "subkey", "value"]),
            ("key[subkey][value][]", &["key", "subkey", "value", ""]),
            ("key[subkey] [value][]", &["key", "subkey", "value", ""]),
            ("key [ subkey ] [ value ] [ ]", &["key", "subkey", "value", ""]),
            ("tags[]", &["tags", ""]),
        ];

        for (name, expected) in cases {
            assert_eq!(fetch_indexes(name), strings(expected), "name: {name}");
        }
    }

    #[test]
    fn nested_options_build_branches() {
        let mut tree = DataTree::new();
        tree.push("options[0][id]", strings(&["1"])).unwrap();
        tree.push("options[0][name]", strings(&["a"])).unwrap();
        tree.push("options[1][id]", strings(&["2"])).unwrap();
        tree.push("options[1][name]", strings(&["b"])).unwrap();

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "options": {
                    "0": {"id": "1", "name": "a"},
                    "1": {"id": "2", "name": "b"}
                }
            })
        );
    }

    #[test]
    fn last_write_wins_for_plain_keys() {
        let mut tree = DataTree::new();
        tree.push("key", strings(&["value"])).unwrap();
        tree.push("key", strings(&["value2"])).unwrap();
        assert_eq!(tree.get("key"), Some(&value("value2")));
    }

    #[test]
    fn append_marker_accumulates_in_order() {
        let mut tree = DataTree::new();
        tree.push("tags[]", strings(&["a"])).unwrap();
        tree.push("tags[]", strings(&["b"])).unwrap();
        tree.push("tags[]", strings(&["c"])).unwrap();
        assert_eq!(tree.get("tags"), Some(&Node::List(strings(&["a", "b", "c"]))));
    }

    #[test]
    fn append_marker_keeps_single_value_as_list() {
        let mut tree = DataTree::new();
        tree.push("tags[]", strings(&["a"])).unwrap();
        assert_eq!(serde_json::to_value(&tree).unwrap(), serde_json::json!({"tags": ["a"]}));
    }

    #[test]
    fn empty_value_never_overwrites_data() {
        let mut tree = DataTree::new();
        tree.push("key", strings(&["value"])).unwrap();
        tree.push("key", strings(&[""])).unwrap();
        tree.push("key", Vec::new()).unwrap();
        assert_eq!(tree.get("key"), Some(&value("value")));
    }

    #[test]
    fn blank_leaf_is_promoted_to_branch() {
        let mut tree = DataTree::new();
        tree.push("key", strings(&[""])).unwrap();
        tree.push("key[sub]", strings(&["value"])).unwrap();

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json, serde_json::json!({"key": {"sub": "value"}}));
    }

    #[test]
    fn empty_value_leaves_existing_branch_alone() {
        let mut tree = DataTree::new();
        tree.push("key[sub]", strings(&["value"])).unwrap();
        tree.push("key", strings(&[""])).unwrap();

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json, serde_json::json!({"key": {"sub": "value"}}));
    }

    #[test]
    fn value_over_branch_is_a_conflict() {
        let mut tree = DataTree::new();
        tree.push("key[sub]", strings(&["value"])).unwrap();
        let err = tree.push("key", strings(&["scalar"])).unwrap_err();
        assert_eq!(err.to_string(), "invalid multiple values to key 'key' in tree");
    }

    #[test]
    fn branch_under_value_is_a_conflict() {
        let mut tree = DataTree::new();
        tree.push("key", strings(&["scalar"])).unwrap();
        let err = tree.push("key[sub]", strings(&["value"])).unwrap_err();
        assert_eq!(err, TreeError::Conflict { key: "key".into() });
    }

    #[test]
    fn empty_value_under_existing_value_is_ignored() {
        let mut tree = DataTree::new();
        tree.push("key", strings(&["scalar"])).unwrap();
        tree.push("key[sub]", strings(&[""])).unwrap();
        assert_eq!(tree.get("key"), Some(&value("scalar")));
    }

    #[test]
    fn too_deep_paths_are_dropped() {
        let mut tree = DataTree::new();
        let name = format!("root{}", "[x]".repeat(MAX_LEVEL));
        tree.push(&name, strings(&["deep"])).unwrap();
        assert!(tree.is_empty());

        let name = format!("root{}", "[x]".repeat(MAX_LEVEL - 1));
        tree.push(&name, strings(&["deep"])).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn repeated_plain_push_is_idempotent() {
        let mut once = DataTree::new();
        once.push("a[b]", strings(&["1"])).unwrap();

        let mut twice = once.clone();
        twice.push("a[b]", strings(&["1"])).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn append_marker_keeps_blank_entries() {
        let mut tree = DataTree::new();
        for value in ["a", "", "b"] {
            tree.push("tags[]", strings(&[value])).unwrap();
        }
        assert_eq!(tree.get("tags"), Some(&Node::List(strings(&["a", "", "b"]))));

        let mut tree = DataTree::new();
        tree.push("tags[]", strings(&[""])).unwrap();
        tree.push("tags[]", strings(&["a"])).unwrap();
        tree.push("tags[]", strings(&[""])).unwrap();
        assert_eq!(tree.get("tags"), Some(&Node::List(strings(&["", "a", ""]))));
    }

    #[test]
    fn mixing_scalar_and_append_is_last_write_wins() {
        let mut tree = DataTree::new();
        tree.push("tags", strings(&["x"])).unwrap();
        tree.push("tags[]", strings(&["y"])).unwrap();
        assert_eq!(tree.get("tags"), Some(&Node::List(strings(&["y"]))));

        let mut tree = DataTree::new();
        tree.push("tags[]", strings(&["y"])).unwrap();
        tree.push("tags", strings(&["x"])).unwrap();
        assert_eq!(tree.get("tags"), Some(&value("x")));
    }

    #[test]
    fn blank_never_replaces_the_other_form() {
        let mut tree = DataTree::new();
        tree.push("tags", strings(&["x"])).unwrap();
        tree.push("tags[]", strings(&[""])).unwrap();
        assert_eq!(tree.get("tags"), Some(&value("x")));

        let mut tree = DataTree::new();
        tree.push("tags[]", strings(&["y"])).unwrap();
        tree.push("tags", strings(&[""])).unwrap();
        assert_eq!(tree.get("tags"), Some(&Node::List(strings(&["y"]))));
    }

    #[test]
    fn append_onto_branch_is_a_conflict() {
        let mut tree = DataTree::new();
        tree.push("tags[x]", strings(&["1"])).unwrap();
        let err = tree.push("tags[]", strings(&["y"])).unwrap_err();
        assert_eq!(err, TreeError::Conflict { key: "tags".into() });

        tree.push("tags[]", strings(&[""])).unwrap();
        assert!(matches!(tree.get("tags"), Some(Node::Branch(_))));
    }
}
