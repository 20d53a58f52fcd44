//! # sdcube - A Hierarchical Container for Semantically-Typed Sample Data
//!
//! `sdcube` stores heterogeneous scientific samples as a pair of correlated
//! stores inside one cube directory: a single-file hierarchical container of
//! typed measurement arrays, and a human-readable XML document of semantic
//! descriptors keyed by sample identifier.
//!
//! ## Key Features
//!
//! - **Cube Bundle Architecture**: Directory-based format with a binary data
//!   container (`Data.sdc`) next to an editable descriptor document
//!   (`ExpDesign.xml`), plus an embedded copy of the document inside the
//!   container so the binary file stays self-describing.
//!
//! - **Recursive Data Modules**: Each sample is a tree of modules with
//!   `Data`, `Meta`, `Raw`, and `Children` sections, so plates, wells, and
//!   fields of view nest naturally.
//!
//! - **Growable Datasets**: Chunked datasets extend on demand, so rows can
//!   be appended one acquisition at a time without rewriting the file.
//!
//! - **Merge-Safe Writes**: Writing into an existing cube renumbers the
//!   incoming samples to continue the stored child indexes and merges their
//!   descriptors into the document.
//!
//! - **Semantic Queries**: Samples are retrievable by identifier or filtered
//!   by descriptor names with OR and AND semantics, case-insensitively.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sdcube::prelude::*;
//!
//! // Stage a sample: measurement data plus its semantic annotation.
//! let mut sample = Sample::new("ID_1");
//! sample.add_data(TypedArray::rank1(
//!     "floatARR",
//!     ArrayData::Float32(vec![0.5; 50]),
//! )?);
//! sample.describe(
//!     Descriptor::new(KIND_TREATMENT, "EGF", "100").with_units("ng/ml"),
//! );
//!
//! // Write the cube, then read it back and query by descriptor name.
//! let mut cube = SdCube::new("experiment.sdcube");
//! cube.add_sample(sample);
//! cube.write()?;
//!
//! let loaded = SdCube::load("experiment.sdcube")?;
//! let hits = loaded.samples_with_descriptor_names_or(&["EGF"]);
//! println!("{} sample(s) treated with EGF", hits.len());
//! # Ok::<(), sdcube::cube::CubeError>(())
//! ```
//!
//! ## Module Overview
//!
//! - [`array`] — named, immutable typed arrays and the element-kind catalogue
//! - [`container`] — the single-file hierarchical container engine
//! - [`module`] — recursive data-module trees
//! - [`design`] — descriptor records and the XML design document
//! - [`cube`] — cube assembly, correlation, and queries

pub mod array;
pub mod container;
pub mod cube;
pub mod design;
pub mod module;

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::array::{ArrayData, ElementKind, TypedArray};
    pub use crate::container::Container;
    pub use crate::cube::{CubeError, Sample, SdCube};
    pub use crate::design::{
        Descriptor, DescriptorSet, DesignModel, KIND_MEASUREMENT, KIND_TIME_POINT, KIND_TREATMENT,
    };
    pub use crate::module::{ModuleTree, NodeId};
}
