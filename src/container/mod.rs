//! # Container I/O Engine
//!
//! Single-file hierarchical store for named groups and typed datasets. The
//! namespace is a slash-separated path tree; groups are pure namespace nodes
//! and datasets carry a declared element kind, extents, and scalar text
//! attributes.
//!
//! Datasets come in two flavours:
//!
//! * **fixed** — extents declared at creation and immutable; stored as a
//!   single chunk whose shape equals the dataset shape,
//! * **growable** — extents start at zero and grow on demand; storage is
//!   chunked, and a partial write first extends every axis to
//!   `max(current, offset + count)` and then writes the hyperslab.
//!
//! Chunks are appended to the file on first touch and rewritten in place
//! afterwards. Regions inside the extents that were never written read back
//! as zeros. The directory (see [`format`]) is serialized at EOF on flush and
//! the header patched; [`Container::close`] flushes and syncs, and dropping a
//! dirty container flushes best-effort with a logged warning on failure.

pub mod format;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};

use crate::array::{ArrayData, ArrayError, ElementKind, TypedArray};
use format::{DatasetRecord, Directory, BLOB_BUF_SIZE, HEADER_LEN, MAGIC};

/// Errors raised by container operations, carrying the path that was being
/// accessed when the backend failed
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Array(#[from] ArrayError),

    #[error("'{0}' is not a container file (bad magic)")]
    BadMagic(PathBuf),

    #[error("no dataset at '{0}'")]
    NoSuchDataset(String),

    #[error("dataset '{path}' stores {stored} elements, request uses {requested}")]
    KindMismatch {
        path: String,
        stored: ElementKind,
        requested: ElementKind,
    },

    #[error("dataset '{path}' has rank {stored}, request has rank {requested}")]
    RankMismatch {
        path: String,
        stored: usize,
        requested: usize,
    },

    #[error("region {offsets:?}+{counts:?} exceeds fixed extents {extents:?} of '{path}'")]
    OutOfBounds {
        path: String,
        offsets: Vec<u64>,
        counts: Vec<u64>,
        extents: Vec<u64>,
    },

    #[error("buffer holds {got} bytes, region needs {need} ('{path}')")]
    BufferSize { path: String, got: usize, need: usize },

    #[error("text element of {len} bytes exceeds the {width}-byte width of '{path}'")]
    TextTooWide { path: String, width: u32, len: usize },
}

/// Handle to an open container file.
///
/// The namespace lives in memory and is persisted on [`flush`](Self::flush);
/// chunk payloads go straight to the file. Ownership is the close contract:
/// buffers drop innermost-first on every path, and the handle itself flushes
/// when dropped.
#[derive(Debug)]
pub struct Container {
    file: File,
    path: PathBuf,
    dir: Directory,
    /// Next free byte offset for chunk allocation
    end: u64,
    dirty: bool,
}

impl Container {
    /// Create a new container file, truncating any existing one.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut c = Container {
            file,
            path,
            dir: Directory::default(),
            end: HEADER_LEN,
            dirty: true,
        };
        c.file.write_all(MAGIC)?;
        c.file.write_u64::<LittleEndian>(0)?;
        c.file.write_u64::<LittleEndian>(0)?;
        c.flush()?;
        Ok(c)
    }

    /// Open an existing container file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ContainerError::BadMagic(path));
        }
        let dir_offset = file.read_u64::<LittleEndian>()?;
        let dir_len = file.read_u64::<LittleEndian>()?;
        let dir = if dir_offset == 0 {
            Directory::default()
        } else {
            file.seek(SeekFrom::Start(dir_offset))?;
            let mut buf = vec![0u8; dir_len as usize];
            file.read_exact(&mut buf)?;
            Directory::decode(&mut buf.as_slice())?
        };
        let end = file.seek(SeekFrom::End(0))?;
        Ok(Container {
            file,
            path,
            dir,
            end: end.max(HEADER_LEN),
            dirty: false,
        })
    }

    /// Open `path` if it exists, otherwise create it.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize the directory at EOF and patch the header to point at it.
    pub fn flush(&mut self) -> Result<(), ContainerError> {
        let mut buf = Vec::new();
        self.dir.encode(&mut buf)?;
        let offset = self.end;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buf)?;
        self.file.seek(SeekFrom::Start(8))?;
        self.file.write_u64::<LittleEndian>(offset)?;
        self.file.write_u64::<LittleEndian>(buf.len() as u64)?;
        // Next chunk allocation lands after the live directory copy.
        self.end = offset + buf.len() as u64;
        self.dirty = false;
        debug!(
            "flushed directory of {} ({} groups, {} datasets)",
            self.path.display(),
            self.dir.groups.len(),
            self.dir.datasets.len()
        );
        Ok(())
    }

    /// Flush and sync the container to disk.
    pub fn close(mut self) -> Result<(), ContainerError> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    // ---- namespace -------------------------------------------------------

    /// Create a group and all missing ancestors. Idempotent.
    pub fn ensure_group(&mut self, path: &str) -> Result<(), ContainerError> {
        let path = normalize(path);
        if path.is_empty() {
            return Ok(());
        }
        let mut prefix = String::new();
        for part in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            if !self.dir.has_group(&prefix) {
                self.dir.groups.push(prefix.clone());
                self.dirty = true;
            }
        }
        Ok(())
    }

    pub fn exists_group(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || self.dir.has_group(&path)
    }

    pub fn exists_dataset(&self, path: &str) -> bool {
        self.dir.find_dataset(&normalize(path)).is_some()
    }

    /// Direct children of a group, in creation order.
    pub fn child_names(&self, path: &str) -> Vec<String> {
        let path = normalize(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut names: Vec<String> = Vec::new();
        let candidates = self
            .dir
            .groups
            .iter()
            .chain(self.dir.datasets.iter().map(|d| &d.path));
        for p in candidates {
            let Some(rest) = p.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let name = match rest.split_once('/') {
                Some((head, _)) => head,
                None => rest,
            };
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn child_count(&self, path: &str) -> usize {
        self.child_names(path).len()
    }

    /// Remove a dataset or a group subtree. Best-effort: removing a missing
    /// path is not an error. Freed chunk bytes stay in the file as dead space.
    pub fn remove(&mut self, path: &str) -> bool {
        let path = normalize(path);
        if path.is_empty() {
            return false;
        }
        let prefix = format!("{path}/");
        let before = self.dir.groups.len() + self.dir.datasets.len();
        self.dir
            .groups
            .retain(|g| g != &path && !g.starts_with(&prefix));
        self.dir
            .datasets
            .retain(|d| d.path != path && !d.path.starts_with(&prefix));
        let removed = self.dir.groups.len() + self.dir.datasets.len() < before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    // ---- dataset lifecycle -----------------------------------------------

    /// Create a fixed-extent dataset, overwriting any dataset already at
    /// `path`. Parent groups are created as needed.
    pub fn create_dataset(
        &mut self,
        path: &str,
        kind: ElementKind,
        text_width: u32,
        extents: &[u64],
    ) -> Result<(), ContainerError> {
        self.create_record(path, kind, text_width, extents.to_vec(), extents.to_vec(), false)
    }

    /// Create a growable dataset with zero initial extents and the given
    /// chunk shape.
    pub fn create_dataset_growable(
        &mut self,
        path: &str,
        kind: ElementKind,
        text_width: u32,
        chunk: &[u64],
    ) -> Result<(), ContainerError> {
        let extents = vec![0; chunk.len()];
        self.create_record(path, kind, text_width, extents, chunk.to_vec(), true)
    }

    fn create_record(
        &mut self,
        path: &str,
        kind: ElementKind,
        text_width: u32,
        extents: Vec<u64>,
        chunk: Vec<u64>,
        growable: bool,
    ) -> Result<(), ContainerError> {
        let path = normalize(path);
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.ensure_group(parent)?;
        }
        self.dir.datasets.retain(|d| d.path != path);
        self.dir.datasets.push(DatasetRecord {
            path,
            kind,
            text_width,
            extents,
            growable,
            chunk,
            chunks: Vec::new(),
            attrs: Vec::new(),
        });
        self.dirty = true;
        Ok(())
    }

    /// Current extents of a dataset.
    pub fn dims(&self, path: &str) -> Result<Vec<u64>, ContainerError> {
        let path = normalize(path);
        self.dir
            .find_dataset(&path)
            .map(|d| d.extents.clone())
            .ok_or(ContainerError::NoSuchDataset(path))
    }

    /// Declared element kind and text width of a dataset.
    pub fn dataset_kind(&self, path: &str) -> Result<(ElementKind, u32), ContainerError> {
        let path = normalize(path);
        self.dir
            .find_dataset(&path)
            .map(|d| (d.kind, d.text_width))
            .ok_or(ContainerError::NoSuchDataset(path))
    }

    // ---- attributes ------------------------------------------------------

    /// Set a scalar text attribute on a dataset, replacing a same-named one.
    pub fn write_attribute(
        &mut self,
        path: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ContainerError> {
        let path = normalize(path);
        let rec = self
            .dir
            .find_dataset_mut(&path)
            .ok_or(ContainerError::NoSuchDataset(path))?;
        match rec.attrs.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => rec.attrs.push((name.to_string(), value.to_string())),
        }
        self.dirty = true;
        Ok(())
    }

    /// All attributes of a dataset, in the order they were first written.
    pub fn read_attributes(&self, path: &str) -> Result<Vec<(String, String)>, ContainerError> {
        let path = normalize(path);
        self.dir
            .find_dataset(&path)
            .map(|d| d.attrs.clone())
            .ok_or(ContainerError::NoSuchDataset(path))
    }

    pub fn read_attribute(&self, path: &str, name: &str) -> Result<Option<String>, ContainerError> {
        Ok(self
            .read_attributes(path)?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v))
    }

    // ---- typed reads and writes ------------------------------------------

    /// Write a whole array as a new fixed dataset `parent/<array name>` and
    /// stamp its kind as the `dataType` attribute.
    pub fn write_dataset(&mut self, parent: &str, arr: &TypedArray) -> Result<(), ContainerError> {
        let parent = normalize(parent);
        let path = if parent.is_empty() {
            arr.name().to_string()
        } else {
            format!("{parent}/{}", arr.name())
        };
        let width = match arr.data() {
            ArrayData::Text(vals) => text_width_of(vals),
            _ => 0,
        };
        self.create_dataset(&path, arr.kind(), width, arr.shape())?;
        let offsets = vec![0; arr.rank()];
        self.write_hyperslab(&path, arr, &offsets)?;
        self.write_attribute(&path, "dataType", &arr.kind().to_string())
    }

    /// Write a fixed-width string dataset; the width is the longest
    /// element's UTF-8 length.
    pub fn write_text_dataset(&mut self, path: &str, values: &[String]) -> Result<(), ContainerError> {
        let width = text_width_of(values);
        self.create_dataset(path, ElementKind::Text, width, &[values.len() as u64])?;
        let bytes = encode_elems(&ArrayData::Text(values.to_vec()), width);
        self.write_region(path, &[0], &[values.len() as u64], &bytes)
    }

    /// Write `arr` into a dataset at the given per-axis offsets, extending a
    /// growable dataset first so that each axis reaches
    /// `max(current, offset + count)`. A rank-1 array targeting a rank-2
    /// dataset is written as one row.
    pub fn write_hyperslab(
        &mut self,
        path: &str,
        arr: &TypedArray,
        offsets: &[u64],
    ) -> Result<(), ContainerError> {
        let path = normalize(path);
        let (kind, text_width, rank) = {
            let rec = self
                .dir
                .find_dataset(&path)
                .ok_or_else(|| ContainerError::NoSuchDataset(path.clone()))?;
            (rec.kind, rec.text_width, rec.extents.len())
        };
        if kind != arr.kind() {
            return Err(ContainerError::KindMismatch {
                path,
                stored: kind,
                requested: arr.kind(),
            });
        }
        // Fixed-width storage cannot hold elements longer than the width
        // recorded at creation; clipping would lose data silently.
        if let ArrayData::Text(vals) = arr.data() {
            if let Some(over) = vals.iter().find(|s| s.len() as u32 > text_width) {
                return Err(ContainerError::TextTooWide {
                    path,
                    width: text_width,
                    len: over.len(),
                });
            }
        }
        let counts: Vec<u64> = if arr.rank() == rank {
            arr.shape().to_vec()
        } else if rank == 2 && arr.rank() == 1 {
            vec![1, arr.len() as u64]
        } else {
            return Err(ContainerError::RankMismatch {
                path,
                stored: rank,
                requested: arr.rank(),
            });
        };
        if offsets.len() != rank {
            return Err(ContainerError::RankMismatch {
                path,
                stored: rank,
                requested: offsets.len(),
            });
        }
        let bytes = encode_elems(arr.data(), text_width);
        self.write_region(&path, offsets, &counts, &bytes)
    }

    /// Read a hyperslab as a typed array named after the dataset leaf.
    pub fn read_hyperslab(
        &mut self,
        path: &str,
        offsets: &[u64],
        counts: &[u64],
    ) -> Result<TypedArray, ContainerError> {
        let path = normalize(path);
        let (kind, text_width) = self.dataset_kind(&path)?;
        let bytes = self.read_region(&path, offsets, counts)?;
        let n: u64 = counts.iter().product();
        let data = decode_elems(kind, text_width, n as usize, &bytes)?;
        let name = leaf(&path).to_string();
        let arr = if counts.len() == 2 && counts[0] > 1 && counts[1] > 1 {
            TypedArray::rank2(name, data, counts[0], counts[1])?
        } else {
            TypedArray::rank1(name, data)?
        };
        Ok(arr)
    }

    /// Read one row of a rank-2 dataset as a rank-1 array.
    pub fn read_row(&mut self, path: &str, row: u64) -> Result<TypedArray, ContainerError> {
        let dims = self.dims(path)?;
        if dims.len() != 2 {
            return Err(ContainerError::RankMismatch {
                path: normalize(path),
                stored: dims.len(),
                requested: 2,
            });
        }
        self.read_hyperslab(path, &[row, 0], &[1, dims[1]])
    }

    /// Read a whole dataset. Rank-2 extents with a trivial axis collapse to
    /// rank 1.
    pub fn read_dataset(&mut self, path: &str) -> Result<TypedArray, ContainerError> {
        let dims = self.dims(path)?;
        let offsets = vec![0; dims.len()];
        self.read_hyperslab(path, &offsets, &dims)
    }

    // ---- blob embedding --------------------------------------------------

    /// Stream an external file into a growable byte dataset at `path`,
    /// 2^20 bytes at a time.
    pub fn embed_file(
        &mut self,
        path: &str,
        source: impl AsRef<Path>,
    ) -> Result<(), ContainerError> {
        let path = normalize(path);
        self.create_dataset_growable(&path, ElementKind::Byte, 0, &[BLOB_BUF_SIZE as u64])?;
        let mut src = File::open(source)?;
        let mut buf = vec![0u8; BLOB_BUF_SIZE];
        let mut offset = 0u64;
        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.write_region(&path, &[offset], &[n as u64], &buf[..n])?;
            offset += n as u64;
        }
        debug!("embedded {offset} bytes at '{path}'");
        Ok(())
    }

    /// Stream a byte dataset back out to an external file, 2^20 bytes at a
    /// time.
    pub fn extract_file(
        &mut self,
        path: &str,
        dest: impl AsRef<Path>,
    ) -> Result<(), ContainerError> {
        let path = normalize(path);
        let dims = self.dims(&path)?;
        if dims.len() != 1 {
            return Err(ContainerError::RankMismatch {
                path,
                stored: dims.len(),
                requested: 1,
            });
        }
        let total = dims[0];
        let mut dst = File::create(dest)?;
        let mut offset = 0u64;
        while offset < total {
            let count = (total - offset).min(BLOB_BUF_SIZE as u64);
            let bytes = self.read_region(&path, &[offset], &[count])?;
            dst.write_all(&bytes)?;
            offset += count;
        }
        dst.sync_all()?;
        Ok(())
    }

    // ---- chunked region I/O ----------------------------------------------

    /// Write raw element bytes into a region, extending growable extents
    /// first.
    pub fn write_region(
        &mut self,
        path: &str,
        offsets: &[u64],
        counts: &[u64],
        bytes: &[u8],
    ) -> Result<(), ContainerError> {
        let path = normalize(path);
        let (elem_size, chunk_dims, chunk_size) = {
            let rec = self
                .dir
                .find_dataset_mut(&path)
                .ok_or_else(|| ContainerError::NoSuchDataset(path.clone()))?;
            let rank = rec.extents.len();
            if offsets.len() != rank || counts.len() != rank {
                return Err(ContainerError::RankMismatch {
                    path,
                    stored: rank,
                    requested: offsets.len(),
                });
            }
            let need = counts.iter().product::<u64>() * rec.elem_size();
            if bytes.len() as u64 != need {
                return Err(ContainerError::BufferSize {
                    path,
                    got: bytes.len(),
                    need: need as usize,
                });
            }
            for i in 0..rank {
                let reach = offsets[i] + counts[i];
                if reach > rec.extents[i] {
                    if rec.growable {
                        rec.extents[i] = reach;
                    } else {
                        return Err(ContainerError::OutOfBounds {
                            path,
                            offsets: offsets.to_vec(),
                            counts: counts.to_vec(),
                            extents: rec.extents.clone(),
                        });
                    }
                }
            }
            (rec.elem_size(), rec.chunk.clone(), rec.chunk_byte_size())
        };
        self.dirty = true;

        let mut chunk_buf = vec![0u8; chunk_size as usize];
        for coord in covering_chunks(offsets, counts, &chunk_dims) {
            let existing = self
                .dir
                .find_dataset(&path)
                .and_then(|rec| rec.chunk_offset(&coord));
            let file_off = match existing {
                Some(off) => {
                    self.file.seek(SeekFrom::Start(off))?;
                    self.file.read_exact(&mut chunk_buf)?;
                    off
                }
                None => {
                    chunk_buf.fill(0);
                    let off = self.end;
                    self.end += chunk_size;
                    if let Some(rec) = self.dir.find_dataset_mut(&path) {
                        rec.chunks.push((coord.clone(), off));
                    }
                    off
                }
            };
            for_each_run(offsets, counts, &coord, &chunk_dims, |region_elem, chunk_elem, len| {
                let src = (region_elem * elem_size) as usize;
                let dst = (chunk_elem * elem_size) as usize;
                let n = (len * elem_size) as usize;
                chunk_buf[dst..dst + n].copy_from_slice(&bytes[src..src + n]);
            });
            self.file.seek(SeekFrom::Start(file_off))?;
            self.file.write_all(&chunk_buf)?;
        }
        Ok(())
    }

    /// Read raw element bytes from a region. Allocated-but-unwritten space
    /// reads as zeros.
    pub fn read_region(
        &mut self,
        path: &str,
        offsets: &[u64],
        counts: &[u64],
    ) -> Result<Vec<u8>, ContainerError> {
        let path = normalize(path);
        let (elem_size, chunk_dims, chunk_size) = {
            let rec = self
                .dir
                .find_dataset(&path)
                .ok_or_else(|| ContainerError::NoSuchDataset(path.clone()))?;
            let rank = rec.extents.len();
            if offsets.len() != rank || counts.len() != rank {
                return Err(ContainerError::RankMismatch {
                    path,
                    stored: rank,
                    requested: offsets.len(),
                });
            }
            for i in 0..rank {
                if offsets[i] + counts[i] > rec.extents[i] {
                    return Err(ContainerError::OutOfBounds {
                        path,
                        offsets: offsets.to_vec(),
                        counts: counts.to_vec(),
                        extents: rec.extents.clone(),
                    });
                }
            }
            (rec.elem_size(), rec.chunk.clone(), rec.chunk_byte_size())
        };
        let total = (counts.iter().product::<u64>() * elem_size) as usize;
        let mut out = vec![0u8; total];
        let mut chunk_buf = vec![0u8; chunk_size as usize];
        for coord in covering_chunks(offsets, counts, &chunk_dims) {
            let existing = self
                .dir
                .find_dataset(&path)
                .and_then(|rec| rec.chunk_offset(&coord));
            match existing {
                Some(off) => {
                    self.file.seek(SeekFrom::Start(off))?;
                    self.file.read_exact(&mut chunk_buf)?;
                }
                None => chunk_buf.fill(0),
            }
            for_each_run(offsets, counts, &coord, &chunk_dims, |region_elem, chunk_elem, len| {
                let dst = (region_elem * elem_size) as usize;
                let src = (chunk_elem * elem_size) as usize;
                let n = (len * elem_size) as usize;
                out[dst..dst + n].copy_from_slice(&chunk_buf[src..src + n]);
            });
        }
        Ok(out)
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                warn!("failed to flush container {}: {e}", self.path.display());
            }
        }
    }
}

/// Strip `./`, leading and trailing slashes; container paths are relative to
/// the root.
pub(crate) fn normalize(path: &str) -> String {
    let mut p = path.trim();
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    let p = p.trim_matches('/');
    if p == "." {
        String::new()
    } else {
        p.to_string()
    }
}

fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Fixed-width string width: the longest element's UTF-8 length, at least 1.
fn text_width_of(values: &[String]) -> u32 {
    values.iter().map(|s| s.len()).max().unwrap_or(0).max(1) as u32
}

/// Serialize an element buffer little-endian; text elements are NUL-padded
/// to the dataset width.
fn encode_elems(data: &ArrayData, text_width: u32) -> Vec<u8> {
    match data {
        ArrayData::Int8(v) => v.iter().map(|x| *x as u8).collect(),
        ArrayData::Byte(v) => v.clone(),
        ArrayData::Int16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ArrayData::Int32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ArrayData::Int64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ArrayData::Float32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ArrayData::Float64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ArrayData::Text(v) => {
            let w = text_width as usize;
            let mut out = vec![0u8; v.len() * w];
            for (i, s) in v.iter().enumerate() {
                let b = s.as_bytes();
                let n = b.len().min(w);
                out[i * w..i * w + n].copy_from_slice(&b[..n]);
            }
            out
        }
    }
}

fn decode_elems(
    kind: ElementKind,
    text_width: u32,
    n: usize,
    bytes: &[u8],
) -> Result<ArrayData, ContainerError> {
    let data = match kind {
        ElementKind::Int8 => ArrayData::Int8(bytes.iter().map(|b| *b as i8).collect()),
        ElementKind::Byte => ArrayData::Byte(bytes.to_vec()),
        ElementKind::Int16 => ArrayData::Int16(
            bytes
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        ElementKind::Int32 => ArrayData::Int32(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        ElementKind::Int64 => ArrayData::Int64(
            bytes
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        ElementKind::Float32 => ArrayData::Float32(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        ElementKind::Float64 => ArrayData::Float64(
            bytes
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        ElementKind::Text => {
            let w = text_width as usize;
            let mut vals = Vec::with_capacity(n);
            for c in bytes.chunks_exact(w.max(1)) {
                let trimmed: &[u8] = match c.iter().position(|b| *b == 0) {
                    Some(i) => &c[..i],
                    None => c,
                };
                let s = std::str::from_utf8(trimmed).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("bad UTF-8 text: {e}"))
                })?;
                vals.push(s.to_string());
            }
            ArrayData::Text(vals)
        }
    };
    Ok(data)
}

/// Chunk grid coordinates intersecting the region `[offsets, offsets+counts)`.
fn covering_chunks(offsets: &[u64], counts: &[u64], chunk: &[u64]) -> Vec<Vec<u64>> {
    let rank = offsets.len();
    let mut lo = Vec::with_capacity(rank);
    let mut hi = Vec::with_capacity(rank);
    for i in 0..rank {
        if counts[i] == 0 {
            return Vec::new();
        }
        lo.push(offsets[i] / chunk[i]);
        hi.push((offsets[i] + counts[i] - 1) / chunk[i] + 1);
    }
    let mut coords = Vec::new();
    for_each_index(&lo, &hi, |c| coords.push(c.to_vec()));
    coords
}

/// Visit every multi-index in the half-open box `[start, end)`, row-major.
fn for_each_index(start: &[u64], end: &[u64], mut f: impl FnMut(&[u64])) {
    if start.is_empty() {
        f(&[]);
        return;
    }
    if start.iter().zip(end).any(|(s, e)| s >= e) {
        return;
    }
    let mut idx: Vec<u64> = start.to_vec();
    loop {
        f(&idx);
        let mut axis = idx.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            idx[axis] += 1;
            if idx[axis] < end[axis] {
                break;
            }
            idx[axis] = start[axis];
        }
    }
}

/// Visit each contiguous last-axis run shared by the region and one chunk.
/// `f(region_elem_offset, chunk_elem_offset, run_len)` receives element
/// offsets into the row-major region buffer and chunk buffer.
fn for_each_run(
    offsets: &[u64],
    counts: &[u64],
    coord: &[u64],
    chunk: &[u64],
    mut f: impl FnMut(u64, u64, u64),
) {
    let rank = offsets.len();
    let last = rank - 1;
    let origin: Vec<u64> = coord.iter().zip(chunk).map(|(c, d)| c * d).collect();
    let mut s = Vec::with_capacity(rank);
    let mut e = Vec::with_capacity(rank);
    for i in 0..rank {
        s.push(offsets[i].max(origin[i]));
        e.push((offsets[i] + counts[i]).min(origin[i] + chunk[i]));
        if s[i] >= e[i] {
            return;
        }
    }
    let mut region_stride = vec![1u64; rank];
    let mut chunk_stride = vec![1u64; rank];
    for i in (0..last).rev() {
        region_stride[i] = region_stride[i + 1] * counts[i + 1];
        chunk_stride[i] = chunk_stride[i + 1] * chunk[i + 1];
    }
    let run_len = e[last] - s[last];
    for_each_index(&s[..last], &e[..last], |idx| {
        let mut region_elem = s[last] - offsets[last];
        let mut chunk_elem = s[last] - origin[last];
        for i in 0..last {
            region_elem += (idx[i] - offsets[i]) * region_stride[i];
            chunk_elem += (idx[i] - origin[i]) * chunk_stride[i];
        }
        f(region_elem, chunk_elem, run_len);
    });
}
