//! # Experiment Design Descriptors
//!
//! The human-readable half of a cube: an XML document of semantic
//! descriptors keyed by sample identifier. Each descriptor is a flat record
//! (`type`, `name`, `value`, `units`, time fields, `category`) and every
//! field is a plain string, empty when absent — never null.
//!
//! Document shape:
//!
//! ```xml
//! <sdcube>
//!   <Sample id="ID_1">
//!     <Descriptor>
//!       <type>treatment</type>
//!       <name>EGF</name>
//!       <value>100</value>
//!       <units>ng/ml</units>
//!     </Descriptor>
//!   </Sample>
//! </sdcube>
//! ```
//!
//! Absent fields are omitted on write; order of samples and descriptors is
//! preserved through a round trip. A malformed document fails the whole
//! parse rather than yielding partial records.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

/// Descriptor kind for experimental perturbations
pub const KIND_TREATMENT: &str = "treatment";
/// Descriptor kind for measured quantities
pub const KIND_MEASUREMENT: &str = "measurement";
/// Descriptor kind for sampled time points
pub const KIND_TIME_POINT: &str = "time_point";

/// Errors raised while reading or writing the descriptor document
#[derive(Debug, thiserror::Error)]
pub enum DesignError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed descriptor document: {0}")]
    Malformed(String),
}

/// One semantic annotation attached to a sample.
///
/// `kind` is the discriminating type (`treatment`, `measurement`, ...); it
/// maps to the `<type>` element in the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub value: String,
    pub units: String,
    pub time_value: String,
    pub time_units: String,
    pub category: String,
}

impl Descriptor {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Descriptor {
            kind: kind.into(),
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_time(mut self, value: impl Into<String>, units: impl Into<String>) -> Self {
        self.time_value = value.into();
        self.time_units = units.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Whole-record equality, case-insensitive on every field.
    pub fn is_same(&self, other: &Descriptor) -> bool {
        self.kind.eq_ignore_ascii_case(&other.kind)
            && self.name.eq_ignore_ascii_case(&other.name)
            && self.value.eq_ignore_ascii_case(&other.value)
            && self.units.eq_ignore_ascii_case(&other.units)
            && self.time_value.eq_ignore_ascii_case(&other.time_value)
            && self.time_units.eq_ignore_ascii_case(&other.time_units)
            && self.category.eq_ignore_ascii_case(&other.category)
    }
}

/// All descriptors of one sample, in document order; duplicates allowed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorSet {
    pub sample_id: String,
    pub descriptors: Vec<Descriptor>,
}

impl DescriptorSet {
    pub fn new(sample_id: impl Into<String>) -> Self {
        DescriptorSet {
            sample_id: sample_id.into(),
            descriptors: Vec::new(),
        }
    }

    pub fn add(&mut self, d: Descriptor) {
        self.descriptors.push(d);
    }

    /// Remove the first descriptor matching `d` ([`Descriptor::is_same`]).
    pub fn remove(&mut self, d: &Descriptor) -> bool {
        match self.descriptors.iter().position(|x| x.is_same(d)) {
            Some(i) => {
                self.descriptors.remove(i);
                true
            }
            None => false,
        }
    }

    /// Remove every descriptor of the given kind; returns how many went.
    pub fn remove_of_kind(&mut self, kind: &str) -> usize {
        let before = self.descriptors.len();
        self.descriptors
            .retain(|d| !d.kind.eq_ignore_ascii_case(kind));
        before - self.descriptors.len()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<&Descriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.kind.eq_ignore_ascii_case(kind))
            .collect()
    }

    /// True when at least one descriptor name matches any of `names`.
    pub fn has_any_name(&self, names: &[&str]) -> bool {
        self.descriptors.iter().any(|d| {
            names
                .iter()
                .any(|n| d.name.trim().eq_ignore_ascii_case(n.trim()))
        })
    }

    /// True when every name in `names` matches some descriptor.
    pub fn has_all_names(&self, names: &[&str]) -> bool {
        names.iter().all(|n| {
            self.descriptors
                .iter()
                .any(|d| d.name.trim().eq_ignore_ascii_case(n.trim()))
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// The experiment-design document of one cube: an ordered list of
/// descriptor sets backed by an XML file.
#[derive(Debug, Clone, Default)]
pub struct DesignModel {
    path: PathBuf,
    samples: Vec<DescriptorSet>,
}

impl DesignModel {
    /// Empty model that will persist at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DesignModel {
            path: path.into(),
            samples: Vec::new(),
        }
    }

    /// Load the document at `path`; a missing file yields an empty model.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, DesignError> {
        let path = path.into();
        let samples = if path.exists() {
            parse_design_doc(&path)?
        } else {
            Vec::new()
        };
        Ok(DesignModel { path, samples })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples(&self) -> &[DescriptorSet] {
        &self.samples
    }

    pub fn sample_ids(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.sample_id.as_str()).collect()
    }

    pub fn sample(&self, id: &str) -> Option<&DescriptorSet> {
        self.samples
            .iter()
            .find(|s| same_id(&s.sample_id, id))
    }

    /// Get-or-create the descriptor set for `id`.
    pub fn sample_mut(&mut self, id: &str) -> &mut DescriptorSet {
        if let Some(i) = self.samples.iter().position(|s| same_id(&s.sample_id, id)) {
            return &mut self.samples[i];
        }
        self.samples.push(DescriptorSet::new(id));
        let last = self.samples.len() - 1;
        &mut self.samples[last]
    }

    /// Add a whole set; same-id sets merge by appending descriptors.
    pub fn add_sample(&mut self, set: DescriptorSet) {
        if let Some(existing) = self
            .samples
            .iter_mut()
            .find(|s| same_id(&s.sample_id, &set.sample_id))
        {
            existing.descriptors.extend(set.descriptors);
        } else {
            self.samples.push(set);
        }
    }

    pub fn remove_sample(&mut self, id: &str) -> bool {
        let before = self.samples.len();
        self.samples.retain(|s| !same_id(&s.sample_id, id));
        self.samples.len() < before
    }

    pub fn add_descriptor(&mut self, id: &str, d: Descriptor) {
        self.sample_mut(id).add(d);
    }

    pub fn remove_descriptor(&mut self, id: &str, d: &Descriptor) -> bool {
        self.sample_mut(id).remove(d)
    }

    pub fn remove_descriptors_of_kind(&mut self, id: &str, kind: &str) -> usize {
        self.sample_mut(id).remove_of_kind(kind)
    }

    /// Replace every descriptor of `d`'s kind with `d`.
    pub fn replace_descriptor(&mut self, id: &str, d: Descriptor) {
        let set = self.sample_mut(id);
        set.remove_of_kind(&d.kind);
        set.add(d);
    }

    pub fn treatments(&self, id: &str) -> Vec<&Descriptor> {
        self.sample(id)
            .map(|s| s.of_kind(KIND_TREATMENT))
            .unwrap_or_default()
    }

    pub fn measurements(&self, id: &str) -> Vec<&Descriptor> {
        self.sample(id)
            .map(|s| s.of_kind(KIND_MEASUREMENT))
            .unwrap_or_default()
    }

    pub fn time_points(&self, id: &str) -> Vec<&Descriptor> {
        self.sample(id)
            .map(|s| s.of_kind(KIND_TIME_POINT))
            .unwrap_or_default()
    }

    /// Distinct descriptor names across all samples, first-seen casing,
    /// case-insensitive dedup.
    pub fn unique_descriptor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for set in &self.samples {
            for d in &set.descriptors {
                let n = d.name.trim();
                if !n.is_empty() && !names.iter().any(|x| x.eq_ignore_ascii_case(n)) {
                    names.push(n.to_string());
                }
            }
        }
        names
    }

    /// Distinct category names across all samples.
    pub fn unique_category_names(&self) -> Vec<String> {
        let mut cats: Vec<String> = Vec::new();
        for set in &self.samples {
            for d in &set.descriptors {
                let c = d.category.trim();
                if !c.is_empty() && !cats.iter().any(|x| x.eq_ignore_ascii_case(c)) {
                    cats.push(c.to_string());
                }
            }
        }
        cats
    }

    /// Distinct descriptor names within one category.
    pub fn unique_descriptor_names_of_category(&self, category: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for set in &self.samples {
            for d in &set.descriptors {
                if !d.category.trim().eq_ignore_ascii_case(category.trim()) {
                    continue;
                }
                let n = d.name.trim();
                if !n.is_empty() && !names.iter().any(|x| x.eq_ignore_ascii_case(n)) {
                    names.push(n.to_string());
                }
            }
        }
        names
    }

    /// Persist the model to its backing file.
    pub fn write(&self) -> Result<(), DesignError> {
        write_design_doc(&self.path, &self.samples)
    }
}

fn same_id(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Parse a descriptor document from a file.
pub fn parse_design_doc(path: impl AsRef<Path>) -> Result<Vec<DescriptorSet>, DesignError> {
    let file = File::open(path)?;
    parse_design_reader(BufReader::new(file))
}

/// Parse a descriptor document from an in-memory string.
pub fn parse_design_str(xml: &str) -> Result<Vec<DescriptorSet>, DesignError> {
    parse_design_reader(Cursor::new(xml.as_bytes()))
}

/// Parse a descriptor document from any buffered reader.
pub fn parse_design_reader<R: BufRead>(reader: R) -> Result<Vec<DescriptorSet>, DesignError> {
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);

    let mut samples: Vec<DescriptorSet> = Vec::new();
    let mut current_sample: Option<DescriptorSet> = None;
    let mut current_desc: Option<Descriptor> = None;
    let mut current_field: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Sample" => {
                    let id = get_attribute(e, "id")?.unwrap_or_default();
                    current_sample = Some(DescriptorSet::new(id));
                }
                b"Descriptor" => {
                    current_desc = Some(Descriptor::default());
                }
                tag if current_desc.is_some() => {
                    current_field = Some(String::from_utf8_lossy(tag).into_owned());
                }
                _ => {}
            },
            Ok(Event::Text(ref t)) => {
                if let (Some(desc), Some(field)) = (current_desc.as_mut(), current_field.as_ref()) {
                    let text = t.unescape()?.into_owned();
                    match field.as_str() {
                        "type" => desc.kind = text,
                        "name" => desc.name = text,
                        "value" => desc.value = text,
                        "units" => desc.units = text,
                        "time" => desc.time_value = text,
                        "time_units" => desc.time_units = text,
                        "category" => desc.category = text,
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"Sample" => {
                    if let Some(s) = current_sample.take() {
                        samples.push(s);
                    }
                }
                b"Descriptor" => {
                    let desc = current_desc.take();
                    match (current_sample.as_mut(), desc) {
                        (Some(s), Some(d)) => s.descriptors.push(d),
                        (None, Some(_)) => {
                            return Err(DesignError::Malformed(
                                "Descriptor outside of Sample".to_string(),
                            ))
                        }
                        _ => {}
                    }
                }
                _ => current_field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(DesignError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(samples)
}

/// Write a descriptor document. Samples with no descriptors are skipped;
/// empty descriptor fields are omitted.
pub fn write_design_doc(
    path: impl AsRef<Path>,
    samples: &[DescriptorSet],
) -> Result<(), DesignError> {
    let mut out: Vec<u8> = Vec::new();
    let mut writer = Writer::new_with_indent(&mut out, b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("sdcube")))?;
    for set in samples {
        if set.descriptors.is_empty() {
            continue;
        }
        let mut sample_el = BytesStart::new("Sample");
        sample_el.push_attribute(("id", set.sample_id.as_str()));
        writer.write_event(Event::Start(sample_el))?;
        for d in &set.descriptors {
            writer.write_event(Event::Start(BytesStart::new("Descriptor")))?;
            write_field(&mut writer, "type", &d.kind)?;
            write_field(&mut writer, "name", &d.name)?;
            write_field(&mut writer, "value", &d.value)?;
            write_field(&mut writer, "units", &d.units)?;
            write_field(&mut writer, "time", &d.time_value)?;
            write_field(&mut writer, "time_units", &d.time_units)?;
            write_field(&mut writer, "category", &d.category)?;
            writer.write_event(Event::End(BytesEnd::new("Descriptor")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("Sample")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("sdcube")))?;

    std::fs::write(path, out)?;
    Ok(())
}

fn write_field<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: &str,
) -> Result<(), DesignError> {
    if value.is_empty() {
        return Ok(());
    }
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Attribute lookup on a start tag, mapping attribute errors through the
/// XML error type.
fn get_attribute(e: &BytesStart, name: &str) -> Result<Option<String>, DesignError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| DesignError::Xml(quick_xml::Error::from(e)))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            return Ok(Some(value));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn egf_treatment() -> Descriptor {
        Descriptor::new(KIND_TREATMENT, "EGF", "100")
            .with_units("ng/ml")
            .with_time("10", "min")
            .with_category("growth factor")
    }

    #[test]
    fn test_is_same_ignores_case() {
        let a = egf_treatment();
        let mut b = egf_treatment();
        b.name = "egf".into();
        b.units = "NG/ML".into();
        assert!(a.is_same(&b));
        b.value = "200".into();
        assert!(!a.is_same(&b));
    }

    #[test]
    fn test_round_trip_preserves_order_and_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ExpDesign.xml");
        let mut s1 = DescriptorSet::new("ID_1");
        s1.add(egf_treatment());
        s1.add(Descriptor::new(KIND_MEASUREMENT, "pERK", ""));
        let mut s2 = DescriptorSet::new("ID_2");
        s2.add(Descriptor::new(KIND_TREATMENT, "Insulin", "50").with_units("ng/ml"));

        write_design_doc(&path, &[s1.clone(), s2.clone()]).unwrap();
        let back = parse_design_doc(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].sample_id, "ID_1");
        assert_eq!(back[0].descriptors[0], egf_treatment());
        assert_eq!(back[0].descriptors[1].name, "pERK");
        assert_eq!(back[1], s2);
    }

    #[test]
    fn test_empty_sample_skipped_on_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.xml");
        let s1 = DescriptorSet::new("empty");
        let mut s2 = DescriptorSet::new("full");
        s2.add(Descriptor::new(KIND_TREATMENT, "x", "1"));
        write_design_doc(&path, &[s1, s2]).unwrap();
        let back = parse_design_doc(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].sample_id, "full");
    }

    #[test]
    fn test_malformed_document_fails_whole_parse() {
        let xml = "<sdcube><Sample id=\"a\"><Descriptor><name>x</wrong></Descriptor></Sample></sdcube>";
        assert!(parse_design_str(xml).is_err());
    }

    #[test]
    fn test_descriptor_outside_sample_rejected() {
        let xml = "<sdcube><Descriptor><name>x</name></Descriptor></sdcube>";
        assert!(matches!(
            parse_design_str(xml),
            Err(DesignError::Malformed(_))
        ));
    }

    #[test]
    fn test_escaped_values_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.xml");
        let mut s = DescriptorSet::new("ID<&>");
        s.add(Descriptor::new(KIND_TREATMENT, "a & b", "<1>"));
        write_design_doc(&path, &[s]).unwrap();
        let back = parse_design_doc(&path).unwrap();
        assert_eq!(back[0].sample_id, "ID<&>");
        assert_eq!(back[0].descriptors[0].name, "a & b");
        assert_eq!(back[0].descriptors[0].value, "<1>");
    }

    #[test]
    fn test_model_get_or_create_and_filters() {
        let mut m = DesignModel::new("/tmp/unused.xml");
        m.add_descriptor("ID_1", egf_treatment());
        m.add_descriptor("id_1 ", Descriptor::new(KIND_MEASUREMENT, "pERK", ""));
        assert_eq!(m.samples().len(), 1);
        assert_eq!(m.treatments("ID_1").len(), 1);
        assert_eq!(m.measurements("ID_1").len(), 1);
        assert!(m.time_points("ID_1").is_empty());
    }

    #[test]
    fn test_replace_descriptor_by_kind() {
        let mut m = DesignModel::new("/tmp/unused.xml");
        m.add_descriptor("s", Descriptor::new(KIND_TREATMENT, "EGF", "100"));
        m.add_descriptor("s", Descriptor::new(KIND_TREATMENT, "Insulin", "50"));
        m.replace_descriptor("s", Descriptor::new(KIND_TREATMENT, "TNF", "10"));
        let t = m.treatments("s");
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].name, "TNF");
    }

    #[test]
    fn test_unique_names_and_categories() {
        let mut m = DesignModel::new("/tmp/unused.xml");
        m.add_descriptor("a", egf_treatment());
        m.add_descriptor("b", {
            let mut d = egf_treatment();
            d.name = "EGF ".into();
            d
        });
        m.add_descriptor("b", Descriptor::new(KIND_MEASUREMENT, "pERK", "").with_category("readout"));
        assert_eq!(m.unique_descriptor_names(), vec!["EGF", "pERK"]);
        assert_eq!(
            m.unique_category_names(),
            vec!["growth factor", "readout"]
        );
        assert_eq!(
            m.unique_descriptor_names_of_category("READOUT"),
            vec!["pERK"]
        );
    }

    #[test]
    fn test_set_json_round_trip() {
        let mut s = DescriptorSet::new("ID_1");
        s.add(egf_treatment());
        let json = s.to_json().unwrap();
        assert!(json.contains("\"type\""));
        let back = DescriptorSet::from_json(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_load_missing_file_yields_empty_model() {
        let dir = tempdir().unwrap();
        let m = DesignModel::load(dir.path().join("nope.xml")).unwrap();
        assert!(m.samples().is_empty());
    }
}
