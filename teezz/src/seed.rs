//! One full request/response round-trip at a recorded site (spec.md §3).
//! Grounded on `original_source/fuzz/seed/seed.py`'s `load_seed`/
//! `store_seed` pair, which read/write an `onenter`/`onleave` directory.

use std::path::Path;

use crate::call::Call;
use crate::error::Result;

pub struct Seed {
    pub id: u64,
    pub input: Box<dyn Call>,
    pub output: Box<dyn Call>,
}

impl Seed {
    pub fn new(id: u64, input: Box<dyn Call>, output: Box<dyn Call>) -> Self {
        Seed { id, input, output }
    }

    /// `dir/onenter` holds the request, `dir/onleave` the response. Both
    /// are decoded with the same per-variant raw loader; `.types` files,
    /// if present, are read by the format-recovery pipeline separately
    /// and layered onto the resulting `Call`'s parameter templates.
    pub fn load_seed(
        id: u64,
        dir: &Path,
        load_raw: impl Fn(&Path) -> Result<Box<dyn Call>>,
    ) -> Result<Seed> {
        let input = load_raw(&dir.join("onenter"))?;
        let output = load_raw(&dir.join("onleave"))?;
        Ok(Seed::new(id, input, output))
    }

    pub fn store_seed(
        &self,
        dir: &Path,
        store_raw: impl Fn(&dyn Call, &Path) -> Result<()>,
    ) -> Result<()> {
        store_raw(self.input.as_ref(), &dir.join("onenter"))?;
        store_raw(self.output.as_ref(), &dir.join("onleave"))?;
        Ok(())
    }
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Seed {
            id: self.id,
            input: self.input.clone_box(),
            output: self.output.clone_box(),
        }
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seed")
            .field("id", &self.id)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::triangle::TriangleCall;

    #[test]
    fn store_then_load_round_trips_a_seed() {
        let dir = tempfile::tempdir().unwrap();
        let seed = Seed::new(0, Box::new(TriangleCall::new(1)), Box::new(TriangleCall::new(1)));
        seed.store_seed(dir.path(), |call, path| call.serialize_to_path(path))
            .unwrap();

        let loaded = Seed::load_seed(0, dir.path(), |path| {
            TriangleCall::deserialize_raw_from_path(path)
        })
        .unwrap();
        assert_eq!(loaded.input.coverage().0, 1);
    }
}
