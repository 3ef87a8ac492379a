//! NumPy `.npy` / `.npz` reader for precomputed speaker embeddings.
//!
//! Speaker x-vectors are usually shipped as a single `(512,)` or `(1, 512)`
//! float32 `.npy`, or as an `.npz` archive with one array per speaker.
//! Only what those files use is supported:
//!   - NPY format version 1.x, 2.x and 3.x
//!   - `float32` dtype, either byte order
//!   - C-contiguous layout

use anyhow::{bail, Context, Result};
use std::{collections::BTreeMap, io::Read, path::Path};
use zip::ZipArchive;

const MAGIC: &[u8] = b"\x93NUMPY";

/// A decoded array: shape plus flat row-major data.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NpyArray {
    /// Decode an in-memory `.npy` file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 10 || &bytes[..6] != MAGIC {
            bail!("Not a valid NPY file (bad magic)");
        }

        let major = bytes[6];
        let (header_len, header_start) = match major {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    bail!("NPY v{} file too short", major);
                }
                let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
                (len as usize, 12)
            }
            _ => bail!("Unsupported NPY version {}.{}", major, bytes[7]),
        };

        let header_end = header_start + header_len;
        let header = bytes
            .get(header_start..header_end)
            .context("NPY file truncated in header")?;
        let header = std::str::from_utf8(header).context("NPY header is not valid UTF-8")?;

        let descr = header_value(header, "descr").context("NPY header missing 'descr'")?;
        let big_endian = match descr {
            "<f4" | "=f4" | "|f4" => false,
            ">f4" => true,
            other => bail!("Unsupported dtype '{}', expected float32", other),
        };

        if header_value(header, "fortran_order").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            bail!("Fortran-order arrays are not supported");
        }

        let shape = parse_shape(header_value(header, "shape").context("NPY header missing 'shape'")?)?;
        let count: usize = shape.iter().product();

        let payload = &bytes[header_end..];
        if payload.len() < count * 4 {
            bail!(
                "NPY data section too short: expected {} bytes, got {}",
                count * 4,
                payload.len()
            );
        }

        let data = payload[..count * 4]
            .chunks_exact(4)
            .map(|b| {
                let raw = [b[0], b[1], b[2], b[3]];
                if big_endian {
                    f32::from_be_bytes(raw)
                } else {
                    f32::from_le_bytes(raw)
                }
            })
            .collect();

        Ok(Self { shape, data })
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Pull a value out of the Python dict literal that forms the NPY header,
/// e.g. `{'descr': '<f4', 'fortran_order': False, 'shape': (1, 512), }`.
///
/// Quoted values come back without quotes, tuples with their parentheses.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = [format!("'{}':", key), format!("\"{}\":", key)]
        .iter()
        .find_map(|k| header.find(k.as_str()).map(|p| p + k.len()))?;
    let rest = header[start..].trim_start();

    match rest.chars().next()? {
        '(' => rest.find(')').map(|end| &rest[..=end]),
        q @ ('\'' | '"') => {
            let inner = &rest[1..];
            inner.find(q).map(|end| &inner[..end])
        }
        _ => {
            let end = rest.find([',', '}']).unwrap_or(rest.len());
            Some(rest[..end].trim())
        }
    }
}

/// `(1, 512)`, `(512,)` and `()` → dimension list.
fn parse_shape(s: &str) -> Result<Vec<usize>> {
    s.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>().with_context(|| format!("Bad shape dim: '{}'", t)))
        .collect()
}

/// Read a single `.npy` file.
pub fn load_npy(path: &Path) -> Result<NpyArray> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Cannot read NPY file: {}", path.display()))?;
    NpyArray::parse(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Read every array of an `.npz` archive, keyed by member name without `.npy`.
///
/// A `BTreeMap` keeps the "first entry" of an archive stable across runs.
pub fn load_npz(path: &Path) -> Result<BTreeMap<String, NpyArray>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Cannot open NPZ file: {}", path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Cannot open ZIP archive: {}", path.display()))?;

    let mut arrays = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("Failed to read ZIP entry")?;
        let name = entry.name().trim_end_matches(".npy").to_string();

        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf).context("Failed to read NPY entry")?;

        let array = NpyArray::parse(&buf)
            .with_context(|| format!("Failed to parse NPY entry '{}'", name))?;
        arrays.insert(name, array);
    }
    Ok(arrays)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
