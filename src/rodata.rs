//! Read-only data pool: interned float literals and the sign-mask vector
//! used by float negation.

/// Interns floats by bit pattern and hands out stable `.LFD<n>` labels in
/// first-seen order. The 16-byte sign-bit mask needed by float unary minus
/// gets its label lazily, from the same counter.
pub struct RoData {
    entries: Vec<(String, f32)>,
    mask: Option<String>,
    next_label: u32,
}

impl Default for RoData {
    fn default() -> RoData {
        RoData::new()
    }
}

impl RoData {
    pub fn new() -> RoData {
        RoData {
            entries: Vec::new(),
            mask: None,
            next_label: 0,
        }
    }

    fn new_label(&mut self) -> String {
        let label = format!(".LFD{}", self.next_label);
        self.next_label += 1;
        label
    }

    /// Returns the label holding `value`, creating it on first sight.
    /// Deduplication is bitwise, so `0.0` and `-0.0` get distinct labels.
    pub fn intern(&mut self, value: f32) -> String {
        for (label, existing) in &self.entries {
            if existing.to_bits() == value.to_bits() {
                return label.clone();
            }
        }
        let label = self.new_label();
        self.entries.push((label.clone(), value));
        label
    }

    /// Label of the sign-mask vector, allocating it on first use.
    pub fn negation_mask(&mut self) -> String {
        if let Some(label) = &self.mask {
            return label.clone();
        }
        let label = self.new_label();
        self.mask = Some(label.clone());
        label
    }

    pub fn entries(&self) -> &[(String, f32)] {
        &self.entries
    }

    pub fn mask_label(&self) -> Option<&str> {
        self.mask.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.mask.is_none()
    }
}

#[cfg(test)]
mod test {
    use super::RoData;

    #[test]
    fn labels_are_sequential() {
        let mut pool = RoData::new();
        assert_eq!(pool.intern(1.0), ".LFD0");
        assert_eq!(pool.intern(2.5), ".LFD1");
    }

    #[test]
    fn interning_is_bitwise_stable() {
        let mut pool = RoData::new();
        let first = pool.intern(4.0);
        let second = pool.intern(4.0);
        assert_eq!(first, second);
        assert_eq!(pool.entries().len(), 1);

        // -0.0 compares equal to 0.0 but has a different bit pattern.
        assert_ne!(pool.intern(0.0), pool.intern(-0.0));
    }

    #[test]
    fn mask_is_lazy_and_stable() {
        let mut pool = RoData::new();
        assert!(pool.mask_label().is_none());
        assert!(pool.is_empty());

        let label = pool.negation_mask();
        assert_eq!(label, ".LFD0");
        assert_eq!(pool.negation_mask(), label);
        assert!(!pool.is_empty());
    }
}
