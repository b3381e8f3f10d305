//! Typed, non-overlapping byte regions of a single parameter buffer.
//!
//! Grounded on `original_source/fuzz/seed/seedtemplate.py`: `SeedTemplate`
//! there keys elements by start offset in a dict and rejects collisions in
//! `add_elem`. We keep the same shape but store elements in a `Vec` since
//! Rust has no ordered-dict-by-insertion primitive as convenient as
//! Python's, and `listify()` already demands a sorted view.

use serde::{Deserialize, Serialize};

/// A typed byte range within a buffer. `type_name` is intentionally a free
/// string: the mutator and format-recovery pipeline recognize a handful of
/// conventional names (`uint8_t*`, `size_t`, `off_t`, `bool`, the numeric
/// widths, and opaque TEE-specific enum/struct names) but nothing here
/// enforces that vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedTemplateElement {
    pub start: usize,
    pub end: usize,
    pub type_name: String,
}

impl SeedTemplateElement {
    pub fn new(start: usize, end: usize, type_name: impl Into<String>) -> Self {
        assert!(end > start, "SeedTemplateElement must have size > 0");
        Self {
            start,
            end,
            type_name: type_name.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// Half-open range overlap test, shared with `ValueDependencies`'s
    /// destination-range dedup (`dependency.rs`).
    pub fn is_collision(&self, other: &SeedTemplateElement) -> bool {
        ranges_overlap(self.start, self.end, other.start, other.end)
    }
}

pub fn ranges_overlap(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

/// A collision error returned by `add_elem`: the range is already claimed.
/// Callers treat this as "a better type already claims this range" and
/// drop the weaker candidate (recoverable, never fatal to the pipeline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionError {
    pub rejected: SeedTemplateElement,
    pub existing: SeedTemplateElement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTemplate {
    pub size: usize,
    elements: Vec<SeedTemplateElement>,
}

impl SeedTemplate {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            elements: Vec::new(),
        }
    }

    pub fn elements(&self) -> &[SeedTemplateElement] {
        &self.elements
    }

    /// Invariant T1: the element must lie within `[0, size)`.
    /// Invariant T2: collision scan is O(n) over existing elements.
    /// Ties on an identical range with a different type: first write wins,
    /// matching the original's dict-insert-then-skip-on-KeyError behavior.
    pub fn add_elem(&mut self, e: SeedTemplateElement) -> Result<(), CollisionError> {
        assert!(e.end <= self.size, "element out of template bounds (T1)");
        for existing in &self.elements {
            if existing.is_collision(&e) {
                return Err(CollisionError {
                    rejected: e,
                    existing: existing.clone(),
                });
            }
        }
        self.elements.push(e);
        Ok(())
    }

    pub fn add_elems(&mut self, elems: impl IntoIterator<Item = SeedTemplateElement>) {
        for e in elems {
            let _ = self.add_elem(e);
        }
    }

    /// Elements sorted by `start` ascending.
    pub fn listify(&self) -> Vec<SeedTemplateElement> {
        let mut v = self.elements.clone();
        v.sort_by_key(|e| e.start);
        v
    }

    /// Complement of the element ranges within `[0, size)`: the untyped
    /// byte spans a bit-flip mutator may touch freely (T3).
    pub fn gaps(&self) -> Vec<(usize, usize)> {
        let sorted = self.listify();
        let mut gaps = Vec::new();
        let mut cursor = 0usize;
        for e in &sorted {
            if e.start > cursor {
                gaps.push((cursor, e.start));
            }
            cursor = cursor.max(e.end);
        }
        if cursor < self.size {
            gaps.push((cursor, self.size));
        }
        gaps
    }

    /// Returns the element starting exactly at `start`, if any.
    pub fn elem_at(&self, start: usize) -> Option<&SeedTemplateElement> {
        self.elements.iter().find(|e| e.start == start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_a_template_collision() {
        // Given: a fresh 32-byte template
        let mut t = SeedTemplate::new(32);

        // When: a size_t claims [0,4)
        t.add_elem(SeedTemplateElement::new(0, 4, "size_t")).unwrap();

        // Then: a colliding uint32_t at [2,6) is rejected
        let err = t
            .add_elem(SeedTemplateElement::new(2, 6, "uint32_t"))
            .unwrap_err();
        assert_eq!(err.existing.type_name, "size_t");

        // And: listify reflects only the accepted element
        assert_eq!(
            t.listify(),
            vec![SeedTemplateElement::new(0, 4, "size_t")]
        );
    }

    #[test]
    fn r3_add_elem_either_succeeds_cleanly_or_leaves_template_unchanged() {
        let mut t = SeedTemplate::new(16);
        t.add_elem(SeedTemplateElement::new(0, 4, "uint32_t")).unwrap();
        let before = t.listify();

        let result = t.add_elem(SeedTemplateElement::new(2, 8, "uint8_t*"));
        assert!(result.is_err());
        assert_eq!(t.listify(), before);
    }

    #[test]
    fn gaps_are_the_complement_of_elements() {
        let mut t = SeedTemplate::new(16);
        t.add_elem(SeedTemplateElement::new(4, 8, "uint32_t")).unwrap();
        assert_eq!(t.gaps(), vec![(0, 4), (8, 16)]);
    }

    #[test]
    fn gaps_empty_when_fully_covered() {
        let mut t = SeedTemplate::new(4);
        t.add_elem(SeedTemplateElement::new(0, 4, "uint32_t")).unwrap();
        assert!(t.gaps().is_empty());
    }
}
