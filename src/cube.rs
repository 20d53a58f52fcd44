//! # Cube Assembly and Correlation
//!
//! A cube is a directory pairing two stores that share sample identifiers:
//!
//! ```text
//! <cube>/Data.sdc        container: module trees under Children/<index>
//! <cube>/ExpDesign.xml   descriptor document, one Sample block per id
//! ```
//!
//! [`SdCube::write`] appends its samples after any already stored, renumbers
//! their child indexes to continue the existing count, merges their
//! descriptor sets into the document, and embeds a copy of the document
//! inside the container at `Meta/ExpDesign.xml`. [`SdCube::load`] walks the
//! stored modules and pairs each with its descriptor set by trimmed,
//! case-insensitive id; a module without a matching set (or without an id at
//! all) is logged and dropped rather than failing the load.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::array::TypedArray;
use crate::container::{Container, ContainerError};
use crate::design::{
    DescriptorSet, DesignError, DesignModel, Descriptor, KIND_MEASUREMENT, KIND_TIME_POINT,
    KIND_TREATMENT,
};
use crate::module::{ModuleTree, NodeId, CHILDREN_GROUP};

/// Container file inside a cube directory
pub const CONTAINER_FILE: &str = "Data.sdc";
/// Descriptor document inside a cube directory
pub const DESIGN_DOC_FILE: &str = "ExpDesign.xml";
/// Container path where the descriptor document is embedded
pub const DESIGN_EMBED_PATH: &str = "Meta/ExpDesign.xml";

/// Errors raised while assembling or loading a cube
#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Array(#[from] crate::array::ArrayError),

    #[error(transparent)]
    Design(#[from] DesignError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One correlated sample: a module tree of measurements and the descriptor
/// set annotating it. Both carry the same identifier.
#[derive(Debug, Clone)]
pub struct Sample {
    pub module: ModuleTree,
    pub design: DescriptorSet,
}

impl Sample {
    /// New empty sample; the id is stamped into both halves, including the
    /// reserved `Sample_ID` metadata array.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut module = ModuleTree::new("");
        let root = module.root();
        module.set_sample_id(root, id.clone());
        Sample {
            module,
            design: DescriptorSet::new(id),
        }
    }

    pub fn id(&self) -> &str {
        &self.design.sample_id
    }

    /// Attach a descriptor to this sample's design set.
    pub fn describe(&mut self, d: Descriptor) {
        self.design.add(d);
    }

    /// Add a measurement array to the root module.
    pub fn add_data(&mut self, arr: TypedArray) {
        let root = self.module.root();
        self.module.add_data(root, arr);
    }

    /// Add a metadata array to the root module.
    pub fn add_meta(&mut self, arr: TypedArray) {
        let root = self.module.root();
        self.module.add_meta(root, arr);
    }

    /// Add a raw payload to the root module.
    pub fn add_raw(&mut self, arr: TypedArray) {
        let root = self.module.root();
        self.module.add_raw(root, arr);
    }

    /// Add a nested module under the root.
    pub fn add_child(&mut self) -> NodeId {
        let root = self.module.root();
        self.module.add_child(root)
    }

    pub fn treatments(&self) -> Vec<&Descriptor> {
        self.design.of_kind(KIND_TREATMENT)
    }

    pub fn measurements(&self) -> Vec<&Descriptor> {
        self.design.of_kind(KIND_MEASUREMENT)
    }

    pub fn time_points(&self) -> Vec<&Descriptor> {
        self.design.of_kind(KIND_TIME_POINT)
    }
}

/// A cube directory and the samples staged in memory for it
#[derive(Debug)]
pub struct SdCube {
    dir: PathBuf,
    children_group: String,
    samples: Vec<Sample>,
}

impl SdCube {
    /// New in-memory cube rooted at `dir`. Nothing touches disk until
    /// [`write`](Self::write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SdCube {
            dir: dir.into(),
            children_group: CHILDREN_GROUP.to_string(),
            samples: Vec::new(),
        }
    }

    /// Use a different top-level group name for stored samples.
    pub fn with_children_group(mut self, name: impl Into<String>) -> Self {
        self.children_group = name.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn container_path(&self) -> PathBuf {
        self.dir.join(CONTAINER_FILE)
    }

    pub fn design_path(&self) -> PathBuf {
        self.dir.join(DESIGN_DOC_FILE)
    }

    pub fn add_sample(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn sample_ids(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.id()).collect()
    }

    pub fn sample(&self, id: &str) -> Option<&Sample> {
        self.samples
            .iter()
            .find(|s| s.id().trim().eq_ignore_ascii_case(id.trim()))
    }

    /// Samples matching at least one of the given descriptor names.
    pub fn samples_with_descriptor_names_or(&self, names: &[&str]) -> Vec<&Sample> {
        self.samples
            .iter()
            .filter(|s| s.design.has_any_name(names))
            .collect()
    }

    /// Samples matching every one of the given descriptor names.
    pub fn samples_with_descriptor_names_and(&self, names: &[&str]) -> Vec<&Sample> {
        self.samples
            .iter()
            .filter(|s| s.design.has_all_names(names))
            .collect()
    }

    /// Write the staged samples into the cube directory, appending after any
    /// samples already stored there.
    ///
    /// Renumbering is merge-safe: if the container already holds `n` members
    /// under the children group, staged samples land at indexes `n, n+1, ...`
    /// and their subtree paths are rewritten to match. The descriptor
    /// document gains the staged sets (same-id sets merge) and the updated
    /// document is embedded into the container.
    pub fn write(&mut self) -> Result<(), CubeError> {
        fs::create_dir_all(&self.dir)?;
        let mut container = Container::open_or_create(self.container_path())?;
        container.ensure_group(&self.children_group)?;
        let existing = container.child_count(&self.children_group);
        debug!(
            "writing {} sample(s) into {} after {existing} existing",
            self.samples.len(),
            self.dir.display()
        );

        let mut model = DesignModel::load(self.design_path())?;
        for (i, sample) in self.samples.iter_mut().enumerate() {
            let index = existing + i;
            let target = format!("{}/{index}", self.children_group);
            let root = sample.module.root();
            let current = sample.module.node(root).group_path.clone();
            sample.module.replace_path(&current, &target);
            sample.module.write(&mut container)?;
            model.add_sample(sample.design.clone());
        }
        model.write()?;
        container.embed_file(DESIGN_EMBED_PATH, self.design_path())?;
        container.close()?;
        Ok(())
    }

    /// Load every correlated sample stored in `dir`.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, CubeError> {
        Self::load_with(dir, CHILDREN_GROUP)
    }

    /// Load with a non-default children group name.
    pub fn load_with(
        dir: impl Into<PathBuf>,
        children_group: impl Into<String>,
    ) -> Result<Self, CubeError> {
        let dir = dir.into();
        let children_group = children_group.into();
        let mut container = Container::open(dir.join(CONTAINER_FILE))?;
        let model = DesignModel::load(dir.join(DESIGN_DOC_FILE))?;

        let mut names = container.child_names(&children_group);
        if names.iter().all(|n| n.parse::<u64>().is_ok()) {
            names.sort_by_key(|n| n.parse::<u64>().unwrap_or(u64::MAX));
        }
        let mut samples = Vec::new();
        for name in names {
            let path = format!("{children_group}/{name}");
            let module = ModuleTree::load(&mut container, &path)?;
            let root = module.root();
            let Some(id) = module.node(root).sample_id.clone() else {
                warn!("module at '{path}' carries no sample id, dropping it");
                continue;
            };
            let Some(set) = model.sample(&id) else {
                warn!("no descriptor set for sample '{id}' at '{path}', dropping it");
                continue;
            };
            samples.push(Sample {
                module,
                design: set.clone(),
            });
        }
        // The other direction of the pairing: descriptor sets whose id
        // matches no stored module are dropped too, with the same warning.
        for set in model.samples() {
            let orphaned = !samples
                .iter()
                .any(|s| s.id().trim().eq_ignore_ascii_case(set.sample_id.trim()));
            if orphaned {
                warn!(
                    "no stored module for descriptor set '{}', dropping it",
                    set.sample_id
                );
            }
        }
        debug!("loaded {} sample(s) from {}", samples.len(), dir.display());
        Ok(SdCube {
            dir,
            children_group,
            samples,
        })
    }

    /// Copy the embedded descriptor document out of the container.
    pub fn extract_design_doc(&self, dest: impl AsRef<Path>) -> Result<(), CubeError> {
        let mut container = Container::open(self.container_path())?;
        container.extract_file(DESIGN_EMBED_PATH, dest)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayData;
    use tempfile::tempdir;

    fn float_sample(id: &str, treatment: &str) -> Sample {
        let mut s = Sample::new(id);
        s.add_data(TypedArray::rank1("floatARR", ArrayData::Float32(vec![0.25; 50])).unwrap());
        s.describe(Descriptor::new(KIND_TREATMENT, treatment, "100").with_units("ng/ml"));
        s
    }

    #[test]
    fn test_write_load_round_trip() {
        let dir = tempdir().unwrap();
        let cube_dir = dir.path().join("cube");
        let mut cube = SdCube::new(&cube_dir);
        cube.add_sample(float_sample("ID_1", "EGF"));
        cube.write().unwrap();

        let loaded = SdCube::load(&cube_dir).unwrap();
        assert_eq!(loaded.sample_ids(), vec!["ID_1"]);
        let s = loaded.sample("id_1").unwrap();
        let arr = loaded
            .sample("ID_1")
            .and_then(|s| s.module.data_array(s.module.root(), "floatARR"))
            .unwrap();
        assert_eq!(arr.as_f32().unwrap().len(), 50);
        assert_eq!(s.treatments()[0].name, "EGF");
    }

    #[test]
    fn test_merge_renumbers_after_existing() {
        let dir = tempdir().unwrap();
        let cube_dir = dir.path().join("cube");
        let mut first = SdCube::new(&cube_dir);
        first.add_sample(float_sample("ID_1", "EGF"));
        first.add_sample(float_sample("ID_2", "Insulin"));
        first.write().unwrap();

        let mut second = SdCube::new(&cube_dir);
        second.add_sample(float_sample("ID_3", "TNF"));
        second.write().unwrap();

        let c = Container::open(cube_dir.join(CONTAINER_FILE)).unwrap();
        let names = c.child_names(CHILDREN_GROUP);
        assert_eq!(names, vec!["0", "1", "2"]);
        drop(c);

        let loaded = SdCube::load(&cube_dir).unwrap();
        assert_eq!(loaded.sample_ids(), vec!["ID_1", "ID_2", "ID_3"]);
    }

    #[test]
    fn test_module_without_id_is_dropped() {
        let dir = tempdir().unwrap();
        let cube_dir = dir.path().join("cube");
        let mut cube = SdCube::new(&cube_dir);
        cube.add_sample(float_sample("ID_1", "EGF"));
        cube.add_sample(float_sample("ID_2", "Insulin"));
        cube.write().unwrap();

        {
            let mut c = Container::open(cube_dir.join(CONTAINER_FILE)).unwrap();
            c.remove("Children/0/Meta/Sample_ID");
            c.close().unwrap();
        }
        let loaded = SdCube::load(&cube_dir).unwrap();
        assert_eq!(loaded.sample_ids(), vec!["ID_2"]);
    }

    #[test]
    fn test_module_without_descriptor_set_is_dropped() {
        let dir = tempdir().unwrap();
        let cube_dir = dir.path().join("cube");
        let mut cube = SdCube::new(&cube_dir);
        cube.add_sample(float_sample("ID_1", "EGF"));
        cube.write().unwrap();

        // Empty the document: the stored module loses its counterpart.
        crate::design::write_design_doc(cube_dir.join(DESIGN_DOC_FILE), &[]).unwrap();
        let loaded = SdCube::load(&cube_dir).unwrap();
        assert_eq!(loaded.sample_count(), 0);
    }

    #[test]
    fn test_descriptor_set_without_module_is_dropped() {
        let dir = tempdir().unwrap();
        let cube_dir = dir.path().join("cube");
        let mut cube = SdCube::new(&cube_dir);
        cube.add_sample(float_sample("ID_1", "EGF"));
        cube.write().unwrap();

        // Annotate a sample that was never stored in the container.
        let mut model = DesignModel::load(cube_dir.join(DESIGN_DOC_FILE)).unwrap();
        model.add_descriptor("GHOST", Descriptor::new(KIND_TREATMENT, "TNF", "10"));
        model.write().unwrap();

        let loaded = SdCube::load(&cube_dir).unwrap();
        assert_eq!(loaded.sample_ids(), vec!["ID_1"]);
        assert!(loaded.sample("GHOST").is_none());
    }

    #[test]
    fn test_or_and_filtering() {
        let dir = tempdir().unwrap();
        let mut cube = SdCube::new(dir.path().join("cube"));
        let mut a = float_sample("A", "EGF");
        a.describe(Descriptor::new(KIND_MEASUREMENT, "pERK", ""));
        cube.add_sample(a);
        cube.add_sample(float_sample("B", "Insulin"));

        let either = cube.samples_with_descriptor_names_or(&["egf", "insulin"]);
        assert_eq!(either.len(), 2);
        let both = cube.samples_with_descriptor_names_and(&["EGF", "pERK"]);
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id(), "A");
        assert!(cube
            .samples_with_descriptor_names_and(&["EGF", "Insulin"])
            .is_empty());
    }

    #[test]
    fn test_custom_children_group() {
        let dir = tempdir().unwrap();
        let cube_dir = dir.path().join("cube");
        let mut cube = SdCube::new(&cube_dir).with_children_group("Wells");
        cube.add_sample(float_sample("W1", "EGF"));
        cube.write().unwrap();

        let loaded = SdCube::load_with(&cube_dir, "Wells").unwrap();
        assert_eq!(loaded.sample_ids(), vec!["W1"]);
    }

    #[test]
    fn test_design_doc_embedded_and_extractable() {
        let dir = tempdir().unwrap();
        let cube_dir = dir.path().join("cube");
        let mut cube = SdCube::new(&cube_dir);
        cube.add_sample(float_sample("ID_1", "EGF"));
        cube.write().unwrap();

        let out = dir.path().join("extracted.xml");
        cube.extract_design_doc(&out).unwrap();
        let sets = crate::design::parse_design_doc(&out).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].sample_id, "ID_1");
    }
}
