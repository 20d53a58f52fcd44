//! # Container On-Disk Format
//!
//! Layout of the single-file hierarchical container:
//!
//! ```text
//! +--------------------------------------------+
//! | magic "SDCUBE1\0"              (8 bytes)   |
//! | directory offset               (u64 LE)    |
//! | directory length               (u64 LE)    |
//! +--------------------------------------------+
//! | data chunks, appended in write order       |
//! | ...                                        |
//! +--------------------------------------------+
//! | directory (live copy, header points here)  |
//! +--------------------------------------------+
//! ```
//!
//! The directory is rewritten at EOF on every flush and the header patched to
//! point at the new copy. Stale copies left mid-file by earlier flushes are
//! dead bytes. All integers are little-endian; strings are u32
//! length-prefixed UTF-8.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::array::ElementKind;

/// File identification magic, 8 bytes at offset 0
pub const MAGIC: &[u8; 8] = b"SDCUBE1\0";

/// Header length: magic + directory offset + directory length
pub const HEADER_LEN: u64 = 24;

/// Buffer size for streaming file blobs in and out of byte datasets
pub const BLOB_BUF_SIZE: usize = 1 << 20;

/// Current directory format version
pub const DIRECTORY_VERSION: u16 = 1;

/// One stored dataset: its declared type, current extents, and the map from
/// chunk grid coordinates to absolute file offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    /// Normalized absolute path inside the container, no leading slash
    pub path: String,
    pub kind: ElementKind,
    /// Bytes per element for `Text` datasets, 0 otherwise
    pub text_width: u32,
    /// Current logical extent per axis
    pub extents: Vec<u64>,
    /// Whether extents may grow beyond their creation-time values
    pub growable: bool,
    /// Chunk extent per axis; equals `extents` for fixed datasets
    pub chunk: Vec<u64>,
    /// Allocated chunks: grid coordinate -> file offset of the chunk payload
    pub chunks: Vec<(Vec<u64>, u64)>,
    /// Scalar text attributes, insertion order, names unique
    pub attrs: Vec<(String, String)>,
}

impl DatasetRecord {
    /// Bytes per element, honouring the recorded text width.
    pub fn elem_size(&self) -> u64 {
        self.kind.byte_width(self.text_width) as u64
    }

    /// Byte size of one chunk payload.
    pub fn chunk_byte_size(&self) -> u64 {
        self.chunk.iter().product::<u64>() * self.elem_size()
    }

    /// File offset of the chunk at `coord`, if allocated.
    pub fn chunk_offset(&self, coord: &[u64]) -> Option<u64> {
        self.chunks
            .iter()
            .find(|(c, _)| c.as_slice() == coord)
            .map(|(_, off)| *off)
    }
}

/// In-memory image of the container's namespace, serialized at flush time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directory {
    /// Group paths in creation order; enumeration order for child listings
    pub groups: Vec<String>,
    /// Dataset records in creation order
    pub datasets: Vec<DatasetRecord>,
}

impl Directory {
    pub fn find_dataset(&self, path: &str) -> Option<&DatasetRecord> {
        self.datasets.iter().find(|d| d.path == path)
    }

    pub fn find_dataset_mut(&mut self, path: &str) -> Option<&mut DatasetRecord> {
        self.datasets.iter_mut().find(|d| d.path == path)
    }

    pub fn has_group(&self, path: &str) -> bool {
        self.groups.iter().any(|g| g == path)
    }

    /// Serialize the directory into `w`.
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(DIRECTORY_VERSION)?;
        w.write_u32::<LittleEndian>(self.groups.len() as u32)?;
        for g in &self.groups {
            write_string(w, g)?;
        }
        w.write_u32::<LittleEndian>(self.datasets.len() as u32)?;
        for d in &self.datasets {
            write_string(w, &d.path)?;
            w.write_u8(d.kind.code())?;
            w.write_u32::<LittleEndian>(d.text_width)?;
            w.write_u8(if d.growable { 1 } else { 0 })?;
            write_u64_list(w, &d.extents)?;
            write_u64_list(w, &d.chunk)?;
            w.write_u32::<LittleEndian>(d.chunks.len() as u32)?;
            for (coord, off) in &d.chunks {
                write_u64_list(w, coord)?;
                w.write_u64::<LittleEndian>(*off)?;
            }
            w.write_u32::<LittleEndian>(d.attrs.len() as u32)?;
            for (name, value) in &d.attrs {
                write_string(w, name)?;
                write_string(w, value)?;
            }
        }
        Ok(())
    }

    /// Decode a directory previously written by [`Directory::encode`].
    pub fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let version = r.read_u16::<LittleEndian>()?;
        if version != DIRECTORY_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported directory version {version}"),
            ));
        }
        let n_groups = r.read_u32::<LittleEndian>()?;
        let mut groups = Vec::with_capacity(n_groups as usize);
        for _ in 0..n_groups {
            groups.push(read_string(r)?);
        }
        let n_datasets = r.read_u32::<LittleEndian>()?;
        let mut datasets = Vec::with_capacity(n_datasets as usize);
        for _ in 0..n_datasets {
            let path = read_string(r)?;
            let code = r.read_u8()?;
            let kind = ElementKind::from_code(code).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown element kind code {code} for dataset '{path}'"),
                )
            })?;
            let text_width = r.read_u32::<LittleEndian>()?;
            let growable = r.read_u8()? != 0;
            let extents = read_u64_list(r)?;
            let chunk = read_u64_list(r)?;
            let n_chunks = r.read_u32::<LittleEndian>()?;
            let mut chunks = Vec::with_capacity(n_chunks as usize);
            for _ in 0..n_chunks {
                let coord = read_u64_list(r)?;
                let off = r.read_u64::<LittleEndian>()?;
                chunks.push((coord, off));
            }
            let n_attrs = r.read_u32::<LittleEndian>()?;
            let mut attrs = Vec::with_capacity(n_attrs as usize);
            for _ in 0..n_attrs {
                let name = read_string(r)?;
                let value = read_string(r)?;
                attrs.push((name, value));
            }
            datasets.push(DatasetRecord {
                path,
                kind,
                text_width,
                extents,
                growable,
                chunk,
                chunks,
                attrs,
            });
        }
        Ok(Directory { groups, datasets })
    }
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad UTF-8 string: {e}")))
}

fn write_u64_list<W: Write>(w: &mut W, vals: &[u64]) -> io::Result<()> {
    w.write_u8(vals.len() as u8)?;
    for v in vals {
        w.write_u64::<LittleEndian>(*v)?;
    }
    Ok(())
}

fn read_u64_list<R: Read>(r: &mut R) -> io::Result<Vec<u64>> {
    let n = r.read_u8()? as usize;
    let mut vals = Vec::with_capacity(n);
    for _ in 0..n {
        vals.push(r.read_u64::<LittleEndian>()?);
    }
    Ok(vals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_directory() -> Directory {
        Directory {
            groups: vec!["Children".into(), "Children/0".into(), "Children/0/Meta".into()],
            datasets: vec![
                DatasetRecord {
                    path: "Children/0/Data/signal".into(),
                    kind: ElementKind::Float32,
                    text_width: 0,
                    extents: vec![3, 50],
                    growable: true,
                    chunk: vec![1, 50],
                    chunks: vec![(vec![0, 0], 24), (vec![2, 0], 224)],
                    attrs: vec![("dataType".into(), "float32".into())],
                },
                DatasetRecord {
                    path: "Children/0/Meta/Sample_ID".into(),
                    kind: ElementKind::Text,
                    text_width: 4,
                    extents: vec![1],
                    growable: false,
                    chunk: vec![1],
                    chunks: vec![(vec![0], 424)],
                    attrs: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_directory_round_trip() {
        let dir = sample_directory();
        let mut buf = Vec::new();
        dir.encode(&mut buf).unwrap();
        let back = Directory::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(back, dir);
    }

    #[test]
    fn test_empty_directory_round_trip() {
        let dir = Directory::default();
        let mut buf = Vec::new();
        dir.encode(&mut buf).unwrap();
        let back = Directory::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(back, dir);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&99u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        let err = Directory::decode(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_chunk_byte_size() {
        let dir = sample_directory();
        let d = dir.find_dataset("Children/0/Data/signal").unwrap();
        assert_eq!(d.chunk_byte_size(), 50 * 4);
        let t = dir.find_dataset("Children/0/Meta/Sample_ID").unwrap();
        assert_eq!(t.chunk_byte_size(), 4);
    }

    #[test]
    fn test_chunk_offset_lookup() {
        let dir = sample_directory();
        let d = dir.find_dataset("Children/0/Data/signal").unwrap();
        assert_eq!(d.chunk_offset(&[0, 0]), Some(24));
        assert_eq!(d.chunk_offset(&[1, 0]), None);
        assert_eq!(d.chunk_offset(&[2, 0]), Some(224));
    }
}
