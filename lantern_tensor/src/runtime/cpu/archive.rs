use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use super::tensor::CpuTensor;
use crate::error::{BridgeError, Result};
use crate::kind::Kind;

const FORMAT_VERSION: u32 = 2;

/// Floats are stored as their IEEE-754 bit patterns so infinities, NaN
/// and every last bit survive the JSON text.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Values {
    FloatBits(Vec<u64>),
    Int(Vec<i64>),
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    name: String,
    kind: Kind,
    shape: Vec<usize>,
    values: Values,
}

#[derive(Debug, Serialize, Deserialize)]
struct Archive {
    version: u32,
    entries: Vec<Entry>,
    checksum: String,
}

fn digest(entries: &[Entry]) -> Result<String> {
    let payload = serde_json::to_vec(entries)?;
    let mut hasher = Sha256::new();
    hasher.update(payload);
    Ok(format!("{:x}", hasher.finalize()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let write_err = |err: std::io::Error| BridgeError::runtime(format!("failed to write {}: {}", path.display(), err));
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}

/// Writes named tensors in order.
pub(crate) fn save(named: &[(&str, &CpuTensor)], path: &Path) -> Result<()> {
    let mut entries = Vec::with_capacity(named.len());
    for (name, tensor) in named {
        let kind = tensor.kind()?;
        let values = if kind.is_floating_point() {
            Values::FloatBits(tensor.values_f64()?.into_iter().map(f64::to_bits).collect())
        } else {
            Values::Int(tensor.values_i64()?)
        };
        entries.push(Entry {
            name: (*name).to_string(),
            kind,
            shape: tensor.shape()?.to_vec(),
            values,
        });
    }
    let checksum = digest(&entries)?;
    let archive = Archive {
        version: FORMAT_VERSION,
        entries,
        checksum,
    };
    let text = serde_json::to_vec(&archive)?;
    write_atomic(path, &text)?;
    tracing::debug!(path = %path.display(), tensors = named.len(), "saved archive");
    Ok(())
}

/// Reads every entry in file order.
pub(crate) fn load(path: &Path) -> Result<Vec<(String, CpuTensor)>> {
    let bytes = fs::read(path)
        .map_err(|err| BridgeError::runtime(format!("failed to read {}: {}", path.display(), err)))?;
    let archive: Archive = serde_json::from_slice(&bytes)?;
    if archive.version != FORMAT_VERSION {
        return Err(BridgeError::runtime(format!(
            "unsupported archive version {} in {}",
            archive.version,
            path.display()
        )));
    }
    if digest(&archive.entries)? != archive.checksum {
        return Err(BridgeError::runtime(format!(
            "checksum mismatch in {}",
            path.display()
        )));
    }
    archive
        .entries
        .into_iter()
        .map(|entry| {
            let tensor = match entry.values {
                Values::FloatBits(bits) => {
                    CpuTensor::from_f64(entry.kind, &entry.shape, bits.into_iter().map(f64::from_bits).collect())?
                }
                Values::Int(v) => CpuTensor::from_i64(entry.kind, &entry.shape, v)?,
            };
            Ok((entry.name, tensor))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tampered_archives_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.lt");
        let t = CpuTensor::from_f64(Kind::Float, &[2], vec![1.0, 2.0]).unwrap();
        save(&[("w", &t)], &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let tampered = text.replace(&2.0f64.to_bits().to_string(), &3.0f64.to_bits().to_string());
        assert_ne!(text, tampered);
        fs::write(&path, tampered).unwrap();
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn ints_keep_their_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i.lt");
        let t = CpuTensor::from_i64(Kind::Int64, &[3], vec![1, -2, i64::MAX]).unwrap();
        save(&[("i", &t)], &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded[0].1.kind().unwrap(), Kind::Int64);
        assert_eq!(loaded[0].1.values_i64().unwrap(), vec![1, -2, i64::MAX]);
    }

    #[test]
    fn non_finite_floats_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.lt");
        let values = vec![1.0, f64::INFINITY, f64::NEG_INFINITY, f64::NAN, -0.0, 0.1 + 0.2];
        let t = CpuTensor::from_f64(Kind::Double, &[6], values.clone()).unwrap();
        save(&[("f", &t)], &path).unwrap();
        let back = load(&path).unwrap()[0].1.values_f64().unwrap();
        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&back), bits(&values));
    }

    #[test]
    fn sibling_archives_do_not_share_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = CpuTensor::from_f64(Kind::Double, &[1], vec![1.0]).unwrap();
        let b = CpuTensor::from_f64(Kind::Double, &[1], vec![2.0]).unwrap();
        save(&[("a", &a)], &dir.path().join("w.ot")).unwrap();
        save(&[("b", &b)], &dir.path().join("w.pt")).unwrap();
        save(&[("a", &a)], &dir.path().join("x.tmp")).unwrap();
        assert_eq!(load(&dir.path().join("w.ot")).unwrap()[0].0, "a");
        assert_eq!(load(&dir.path().join("w.pt")).unwrap()[0].0, "b");
        assert_eq!(load(&dir.path().join("x.tmp")).unwrap()[0].1.values_f64().unwrap(), vec![1.0]);
        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["w.ot", "w.pt", "x.tmp"]);
    }
}
