//! Stage 1 — Typify (spec.md §4.2 Stage 1). Grounded on
//! `original_source/fuzz/fmt_recovery/typify.py`: every parameter buffer
//! that lacks a `.types` sidecar gets an empty `SeedTemplate` sized to the
//! buffer's length.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TeezzError};
use crate::template::SeedTemplate;

/// Sidecar path for a parameter buffer's serialised template. The teacher
/// dumps Python pickles here; we use `serde_json` per the dependency-file
/// Open Question resolution (SPEC_FULL.md §9).
pub fn types_path(param_path: &Path) -> PathBuf {
    let mut s = param_path.as_os_str().to_owned();
    s.push(".types");
    PathBuf::from(s)
}

pub fn load_template(param_path: &Path) -> Result<SeedTemplate> {
    let tp = types_path(param_path);
    if tp.exists() {
        let bytes = fs::read(&tp).map_err(|e| TeezzError::io(tp.clone(), e))?;
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        let size = fs::metadata(param_path)
            .map_err(|e| TeezzError::io(param_path.to_path_buf(), e))?
            .len() as usize;
        Ok(SeedTemplate::new(size))
    }
}

pub fn store_template(param_path: &Path, tmpl: &SeedTemplate) -> Result<()> {
    let tp = types_path(param_path);
    let bytes = serde_json::to_vec(tmpl)?;
    fs::write(&tp, bytes).map_err(|e| TeezzError::io(tp, e))
}

/// Creates an empty, correctly-sized `.types` file for every param path
/// that doesn't already have one.
pub fn typify(param_paths: &[PathBuf]) -> Result<()> {
    for p in param_paths {
        if types_path(p).exists() {
            continue;
        }
        let tmpl = load_template(p)?;
        store_template(p, &tmpl)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typify_creates_a_types_sidecar_sized_to_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let param_path = dir.path().join("param_0");
        fs::write(&param_path, [0u8; 12]).unwrap();

        typify(&[param_path.clone()]).unwrap();

        assert!(types_path(&param_path).exists());
        let tmpl = load_template(&param_path).unwrap();
        assert_eq!(tmpl.size, 12);
        assert!(tmpl.elements().is_empty());
    }

    #[test]
    fn typify_leaves_an_existing_sidecar_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let param_path = dir.path().join("param_0");
        fs::write(&param_path, [0u8; 8]).unwrap();
        let mut tmpl = SeedTemplate::new(8);
        tmpl.add_elem(crate::template::SeedTemplateElement::new(0, 4, "size_t"))
            .unwrap();
        store_template(&param_path, &tmpl).unwrap();

        typify(&[param_path.clone()]).unwrap();

        let reloaded = load_template(&param_path).unwrap();
        assert_eq!(reloaded.elements().len(), 1);
    }
}
