//! Dual-record rearrangement (spec.md §4.2, "Dual-record rearrangement").
//! Grounded on `original_source/fuzz/fmt_recovery/rearrange_dualrecord.py`:
//! purely filesystem-level normalization that runs before Stage 1. When a
//! high-level call's callback fires in a separate recording directory
//! (distinguished by a `_cb_` infix), this folds the callback's `onenter`
//! into the caller's `onleave`, then re-roots everything under one
//! `onenter`/`onleave` pair directly beneath the interaction directory.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{Result, TeezzError};

/// True when any leaf directory three levels under `dir` carries a
/// `_cb_` infix — the signal that high-level recordings for this test
/// were split into separate caller/callback directories.
pub fn has_callbacks(dir: &Path) -> Result<bool> {
    for seq_dir in read_dir_sorted(dir)? {
        for interaction_dir in read_dir_sorted(&seq_dir)? {
            for hal_dir in read_dir_sorted(&interaction_dir)? {
                if hal_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains("_cb_"))
                {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| TeezzError::io(dir.to_path_buf(), e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

/// Merges one caller/callback pair of HAL recording directories: the
/// callback's `onenter` becomes the caller's `onleave`, and the callback
/// directory is then removed. `caller_dir` and `callback_dir` must each
/// contain an `onenter/` (and the caller an `onleave/` to be replaced).
pub fn merge_caller_and_callback(caller_dir: &Path, callback_dir: &Path) -> Result<()> {
    let caller_onleave = caller_dir.join("onleave");
    let callback_onenter = callback_dir.join("onenter");

    if caller_onleave.exists() {
        fs::remove_dir_all(&caller_onleave).map_err(|e| TeezzError::io(caller_onleave.clone(), e))?;
    }
    if !callback_onenter.exists() {
        warn!("callback dir {:?} has no onenter/, nothing to merge", callback_dir);
        return Ok(());
    }
    fs::rename(&callback_onenter, &caller_onleave)
        .map_err(|e| TeezzError::io(callback_onenter.clone(), e))?;
    fs::remove_dir_all(callback_dir).map_err(|e| TeezzError::io(callback_dir.to_path_buf(), e))?;
    Ok(())
}

/// Re-roots one interaction directory: moves the ioctl recording's
/// `onenter`/`onleave` directly under `interaction_dir`, folding in a
/// matching HAL-level `onenter`/`onleave` (named `hal_<name>`) if present,
/// then removes the now-empty HAL and ioctl subdirectories.
pub fn rearrange_interaction(interaction_dir: &Path) -> Result<()> {
    let children = read_dir_sorted(interaction_dir)?;
    let ioctl_dir = children
        .iter()
        .find(|d| d.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.contains("ioctl")))
        .cloned();

    let Some(ioctl_dir) = ioctl_dir else {
        // No ioctl recording reached the kernel for this interaction;
        // nothing worth keeping.
        fs::remove_dir_all(interaction_dir).map_err(|e| TeezzError::io(interaction_dir.to_path_buf(), e))?;
        return Ok(());
    };

    let ioctl_onenter = ioctl_dir.join("onenter");
    let ioctl_onleave = ioctl_dir.join("onleave");

    let hal_dirs: Vec<&PathBuf> = children.iter().filter(|d| *d != &ioctl_dir).collect();
    if let Some(hal_dir) = hal_dirs.into_iter().find(|d| {
        d.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.contains("_cb_"))
    }) {
        let hal_name = hal_dir.file_name().unwrap().to_string_lossy().into_owned();
        let hal_onenter = hal_dir.join("onenter");
        let hal_onleave = hal_dir.join("onleave");
        if hal_onenter.exists() {
            fs::rename(&hal_onenter, ioctl_onenter.join(format!("hal_{hal_name}")))
                .map_err(|e| TeezzError::io(hal_onenter, e))?;
        }
        if hal_onleave.exists() {
            fs::rename(&hal_onleave, ioctl_onleave.join(format!("hal_{hal_name}")))
                .map_err(|e| TeezzError::io(hal_onleave, e))?;
        }
        fs::remove_dir_all(hal_dir).map_err(|e| TeezzError::io(hal_dir.clone(), e))?;
    }

    fs::rename(&ioctl_onenter, interaction_dir.join("onenter")).map_err(|e| TeezzError::io(ioctl_onenter, e))?;
    fs::rename(&ioctl_onleave, interaction_dir.join("onleave")).map_err(|e| TeezzError::io(ioctl_onleave, e))?;
    fs::remove_dir_all(&ioctl_dir).map_err(|e| TeezzError::io(ioctl_dir, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_dir(p: &Path) {
        fs::create_dir_all(p).unwrap();
    }

    #[test]
    fn merge_folds_callback_onenter_into_caller_onleave() {
        let base = tempfile::tempdir().unwrap();
        let caller = base.path().join("hal_foo");
        let callback = base.path().join("hal_foo_cb_0");
        touch_dir(&caller.join("onenter"));
        touch_dir(&caller.join("onleave"));
        fs::write(caller.join("onleave").join("stale"), b"old").unwrap();
        touch_dir(&callback.join("onenter"));
        fs::write(callback.join("onenter").join("result"), b"new").unwrap();

        merge_caller_and_callback(&caller, &callback).unwrap();

        assert!(!callback.exists());
        assert!(caller.join("onleave").join("result").exists());
        assert!(!caller.join("onleave").join("stale").exists());
    }

    #[test]
    fn rearrange_without_an_ioctl_dir_deletes_the_interaction() {
        let base = tempfile::tempdir().unwrap();
        let interaction = base.path().join("3");
        touch_dir(&interaction.join("hal_foo").join("onenter"));

        rearrange_interaction(&interaction).unwrap();

        assert!(!interaction.exists());
    }

    #[test]
    fn rearrange_re_roots_ioctl_and_hal_directories_under_the_interaction() {
        let base = tempfile::tempdir().unwrap();
        let interaction = base.path().join("0");
        touch_dir(&interaction.join("ioctl").join("onenter"));
        touch_dir(&interaction.join("ioctl").join("onleave"));
        touch_dir(&interaction.join("hal_foo").join("onenter"));
        fs::write(interaction.join("hal_foo").join("onenter").join("arg"), b"x").unwrap();

        rearrange_interaction(&interaction).unwrap();

        assert!(interaction.join("onenter").join("hal_foo").join("arg").exists());
        assert!(!interaction.join("ioctl").exists());
        assert!(!interaction.join("hal_foo").exists());
    }
}
