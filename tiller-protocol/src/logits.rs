//! Logits row crossing the model-engine boundary.

use std::collections::HashSet;

/// One vocab-sized row of raw logits.
///
/// The model engine supplies this at ForwardPass and consumes an adjusted
/// row of the same shape. Masking writes a large negative value over the
/// excluded ids; an empty allowed/disallowed set leaves the row untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Logits(Vec<f32>);

impl Logits {
    /// Vocabulary size of this row.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.0.len()
    }

    /// Raw values.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Index of the highest logit, breaking ties toward the lower id.
    #[must_use]
    pub fn argmax(&self) -> Option<u32> {
        let mut best: Option<(u32, f32)> = None;
        for (id, &value) in self.0.iter().enumerate() {
            match best {
                Some((_, b)) if value <= b => {}
                _ => best = Some((id as u32, value)),
            }
        }
        best.map(|(id, _)| id)
    }

    /// Return a copy with every id outside `allowed` set to `mask_value`.
    /// An empty set is a no-op; ids outside the vocab are ignored.
    #[must_use]
    pub fn mask_to_allowed(&self, allowed: &HashSet<u32>, mask_value: f32) -> Logits {
        if allowed.is_empty() {
            return self.clone();
        }
        let mut out = self.0.clone();
        for (id, value) in out.iter_mut().enumerate() {
            if !allowed.contains(&(id as u32)) {
                *value = mask_value;
            }
        }
        Logits(out)
    }

    /// Return a copy with every id inside `disallowed` set to `mask_value`.
    #[must_use]
    pub fn mask_out(&self, disallowed: &HashSet<u32>, mask_value: f32) -> Logits {
        if disallowed.is_empty() {
            return self.clone();
        }
        let mut out = self.0.clone();
        for &id in disallowed {
            if let Some(value) = out.get_mut(id as usize) {
                *value = mask_value;
            }
        }
        Logits(out)
    }
}

impl From<Vec<f32>> for Logits {
    fn from(values: Vec<f32>) -> Self {
        Logits(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_to_allowed_keeps_only_allowed() {
        let logits = Logits::from(vec![1.0, 2.0, 3.0, 4.0]);
        let allowed: HashSet<u32> = [1, 3].into_iter().collect();
        let masked = logits.mask_to_allowed(&allowed, -1e9);
        assert_eq!(masked.as_slice(), &[-1e9, 2.0, -1e9, 4.0]);
        assert_eq!(masked.argmax(), Some(3));
    }

    #[test]
    fn empty_sets_are_noops() {
        let logits = Logits::from(vec![1.0, 2.0]);
        assert_eq!(logits.mask_to_allowed(&HashSet::new(), -1e9), logits);
        assert_eq!(logits.mask_out(&HashSet::new(), -1e9), logits);
    }

    #[test]
    fn mask_out_ignores_out_of_range_ids() {
        let logits = Logits::from(vec![1.0, 2.0]);
        let disallowed: HashSet<u32> = [1, 99].into_iter().collect();
        let masked = logits.mask_out(&disallowed, -5.0);
        assert_eq!(masked.as_slice(), &[1.0, -5.0]);
    }
}
