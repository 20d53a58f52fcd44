//! # Data Module Tree
//!
//! A data module is a recursive unit of sample data: typed measurement
//! arrays, metadata arrays, raw byte payloads, and child modules. On disk
//! each node owns four groups under its path:
//!
//! ```text
//! <node>/Data       typed measurement arrays
//! <node>/Meta       metadata arrays (including the reserved Sample_ID)
//! <node>/Raw        raw byte payloads
//! <node>/Children   nested modules, one group per child index
//! ```
//!
//! Trees are arenas: nodes live in one `Vec` and refer to each other by
//! [`NodeId`], so the structure stays cheap to clone and free of interior
//! reference cycles.

use log::debug;

use crate::array::{ArrayData, TypedArray};
use crate::container::{Container, ContainerError};

/// Group name holding nested modules
pub const CHILDREN_GROUP: &str = "Children";
/// Reserved metadata array carrying the owning sample's identifier
pub const SAMPLE_ID_NAME: &str = "Sample_ID";

const DATA_GROUP: &str = "Data";
const META_GROUP: &str = "Meta";
const RAW_GROUP: &str = "Raw";

/// Stable handle to a node within one [`ModuleTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One module: its container path, arrays, and child links
#[derive(Debug, Clone, Default)]
pub struct ModuleNode {
    pub sample_id: Option<String>,
    pub group_path: String,
    pub data: Vec<TypedArray>,
    pub meta: Vec<TypedArray>,
    pub raw: Vec<TypedArray>,
    children: Vec<NodeId>,
}

/// Arena of module nodes with a distinguished root
#[derive(Debug, Clone)]
pub struct ModuleTree {
    nodes: Vec<ModuleNode>,
    root: NodeId,
}

impl ModuleTree {
    /// New tree with a single root node at `group_path`.
    pub fn new(group_path: impl Into<String>) -> Self {
        let root = ModuleNode {
            group_path: group_path.into(),
            ..Default::default()
        };
        ModuleTree {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ModuleNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ModuleNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Append a child module; its path is `<parent>/Children/<index>` where
    /// the index continues the parent's current child count.
    pub fn add_child(&mut self, parent: NodeId) -> NodeId {
        let index = self.nodes[parent.0].children.len();
        let path = format!(
            "{}/{CHILDREN_GROUP}/{index}",
            self.nodes[parent.0].group_path
        );
        let child = ModuleNode {
            group_path: path,
            ..Default::default()
        };
        let id = NodeId(self.nodes.len());
        self.nodes.push(child);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn add_data(&mut self, id: NodeId, arr: TypedArray) {
        self.nodes[id.0].data.push(arr);
    }

    pub fn add_meta(&mut self, id: NodeId, arr: TypedArray) {
        self.nodes[id.0].meta.push(arr);
    }

    pub fn add_raw(&mut self, id: NodeId, arr: TypedArray) {
        self.nodes[id.0].raw.push(arr);
    }

    /// Stamp a sample identifier on a node and mirror it into the reserved
    /// `Sample_ID` metadata array.
    pub fn set_sample_id(&mut self, id: NodeId, sample_id: impl Into<String>) {
        let sample_id = sample_id.into();
        let node = &mut self.nodes[id.0];
        node.sample_id = Some(sample_id.clone());
        node.meta.retain(|m| m.name() != SAMPLE_ID_NAME);
        node.meta
            .push(TypedArray::text_scalar(SAMPLE_ID_NAME, sample_id));
    }

    /// Rewrite the first occurrence of `old` in every node's path. Used by
    /// merge renumbering when a tree is grafted under a new child index.
    pub fn replace_path(&mut self, old: &str, new: &str) {
        for node in &mut self.nodes {
            node.group_path = node.group_path.replacen(old, new, 1);
        }
    }

    /// Write the whole tree into a container: skeleton groups first, then
    /// the node's arrays, then children.
    pub fn write(&self, c: &mut Container) -> Result<(), ContainerError> {
        self.write_node(c, self.root)
    }

    fn write_node(&self, c: &mut Container, id: NodeId) -> Result<(), ContainerError> {
        let node = &self.nodes[id.0];
        let base = &node.group_path;
        for group in [DATA_GROUP, META_GROUP, RAW_GROUP, CHILDREN_GROUP] {
            c.ensure_group(&format!("{base}/{group}"))?;
        }
        for arr in &node.data {
            c.write_dataset(&format!("{base}/{DATA_GROUP}"), arr)?;
        }
        for arr in &node.meta {
            c.write_dataset(&format!("{base}/{META_GROUP}"), arr)?;
        }
        for arr in &node.raw {
            c.write_dataset(&format!("{base}/{RAW_GROUP}"), arr)?;
        }
        debug!(
            "wrote module '{base}' ({} data, {} meta, {} raw, {} children)",
            node.data.len(),
            node.meta.len(),
            node.raw.len(),
            node.children.len()
        );
        for &child in &node.children {
            self.write_node(c, child)?;
        }
        Ok(())
    }

    /// Load a module tree rooted at `root_path` from a container.
    pub fn load(c: &mut Container, root_path: &str) -> Result<Self, ContainerError> {
        let mut tree = ModuleTree::new(root_path);
        let root = tree.root;
        tree.load_node(c, root)?;
        Ok(tree)
    }

    fn load_node(&mut self, c: &mut Container, id: NodeId) -> Result<(), ContainerError> {
        let base = self.nodes[id.0].group_path.clone();
        for name in c.child_names(&format!("{base}/{DATA_GROUP}")) {
            let arr = c.read_dataset(&format!("{base}/{DATA_GROUP}/{name}"))?;
            self.nodes[id.0].data.push(arr);
        }
        for name in c.child_names(&format!("{base}/{META_GROUP}")) {
            let arr = c.read_dataset(&format!("{base}/{META_GROUP}/{name}"))?;
            if name == SAMPLE_ID_NAME {
                if let ArrayData::Text(vals) = arr.data() {
                    if let Some(first) = vals.first() {
                        self.nodes[id.0].sample_id = Some(first.trim().to_string());
                    }
                }
            }
            self.nodes[id.0].meta.push(arr);
        }
        for name in c.child_names(&format!("{base}/{RAW_GROUP}")) {
            let arr = c.read_dataset(&format!("{base}/{RAW_GROUP}/{name}"))?;
            self.nodes[id.0].raw.push(arr);
        }
        for name in sorted_child_indices(c.child_names(&format!("{base}/{CHILDREN_GROUP}"))) {
            let child = NodeId(self.nodes.len());
            self.nodes.push(ModuleNode {
                group_path: format!("{base}/{CHILDREN_GROUP}/{name}"),
                ..Default::default()
            });
            self.nodes[id.0].children.push(child);
            self.load_node(c, child)?;
        }
        Ok(())
    }

    /// Look up a node's named metadata array.
    pub fn meta_array<'a>(&'a self, id: NodeId, name: &str) -> Option<&'a TypedArray> {
        self.nodes[id.0].meta.iter().find(|m| m.name() == name)
    }

    /// Look up a node's named data array.
    pub fn data_array<'a>(&'a self, id: NodeId, name: &str) -> Option<&'a TypedArray> {
        self.nodes[id.0].data.iter().find(|m| m.name() == name)
    }
}

/// Child group names sorted by numeric index where they all parse as
/// integers, falling back to the stored order.
fn sorted_child_indices(mut names: Vec<String>) -> Vec<String> {
    if names.iter().all(|n| n.parse::<u64>().is_ok()) {
        names.sort_by_key(|n| n.parse::<u64>().unwrap_or(u64::MAX));
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayData;
    use tempfile::tempdir;

    fn sample_tree() -> ModuleTree {
        let mut t = ModuleTree::new("Children/0");
        let root = t.root();
        t.set_sample_id(root, "ID_1");
        t.add_data(
            root,
            TypedArray::rank1("floatARR", ArrayData::Float32(vec![0.5; 50])).unwrap(),
        );
        let child = t.add_child(root);
        t.add_data(
            child,
            TypedArray::rank1("counts", ArrayData::Int32(vec![1, 2, 3])).unwrap(),
        );
        t
    }

    #[test]
    fn test_child_paths_continue_index() {
        let mut t = ModuleTree::new("Children/0");
        let root = t.root();
        let a = t.add_child(root);
        let b = t.add_child(root);
        assert_eq!(t.node(a).group_path, "Children/0/Children/0");
        assert_eq!(t.node(b).group_path, "Children/0/Children/1");
    }

    #[test]
    fn test_set_sample_id_injects_meta() {
        let t = sample_tree();
        let meta = t.meta_array(t.root(), SAMPLE_ID_NAME).unwrap();
        assert_eq!(meta.as_text().unwrap(), &["ID_1".to_string()]);
    }

    #[test]
    fn test_set_sample_id_replaces_previous() {
        let mut t = sample_tree();
        let root = t.root();
        t.set_sample_id(root, "ID_2");
        let ids: Vec<_> = t
            .node(root)
            .meta
            .iter()
            .filter(|m| m.name() == SAMPLE_ID_NAME)
            .collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].as_text().unwrap(), &["ID_2".to_string()]);
    }

    #[test]
    fn test_replace_path_rewrites_subtree() {
        let mut t = sample_tree();
        t.replace_path("Children/0", "Children/7");
        assert_eq!(t.node(t.root()).group_path, "Children/7");
        let child = t.children(t.root())[0];
        assert_eq!(t.node(child).group_path, "Children/7/Children/0");
    }

    #[test]
    fn test_write_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut c = Container::create(dir.path().join("t.sdc")).unwrap();
        sample_tree().write(&mut c).unwrap();

        let t = ModuleTree::load(&mut c, "Children/0").unwrap();
        let root = t.root();
        assert_eq!(t.node(root).sample_id.as_deref(), Some("ID_1"));
        let arr = t.data_array(root, "floatARR").unwrap();
        assert_eq!(arr.as_f32().unwrap().len(), 50);
        assert_eq!(t.children(root).len(), 1);
        let child = t.children(root)[0];
        let counts = t.data_array(child, "counts").unwrap();
        assert_eq!(counts.as_i32().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_numeric_child_order() {
        let names = vec!["10".to_string(), "2".to_string(), "1".to_string()];
        assert_eq!(
            sorted_child_indices(names),
            vec!["1".to_string(), "2".to_string(), "10".to_string()]
        );
    }
}
