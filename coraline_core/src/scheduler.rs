use serde::Deserialize;
use std::fmt;

/// The iteration indices a fuzzing run covers.
///
/// `end` is exclusive; `None` means the run continues until it is cancelled.
/// The range is `Copy`, so iterating it again restarts from `start`.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct IndexRange {
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub end: Option<u64>,
}

impl IndexRange {
    pub const fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub const fn unbounded(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn is_bounded(&self) -> bool {
        self.end.is_some()
    }

    /// Number of indices in a bounded range, `None` when unbounded.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start))
    }

    pub fn iter(&self) -> IndexIter {
        IndexIter {
            next: Some(self.start),
            end: self.end,
        }
    }
}

impl Default for IndexRange {
    fn default() -> Self {
        Self::unbounded(0)
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}..{}", self.start, end),
            None => write!(f, "{}..", self.start),
        }
    }
}

impl IntoIterator for IndexRange {
    type Item = u64;
    type IntoIter = IndexIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy producer of iteration indices.
///
/// An unbounded producer stops only when `u64::MAX` has been handed out.
#[derive(Debug, Clone)]
pub struct IndexIter {
    next: Option<u64>,
    end: Option<u64>,
}

impl Iterator for IndexIter {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.next?;
        if let Some(end) = self.end {
            if current >= end {
                self.next = None;
                return None;
            }
        }
        self.next = current.checked_add(1);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match (self.next, self.end) {
            (None, _) => (0, Some(0)),
            (Some(next), Some(end)) => {
                let remaining = usize::try_from(end.saturating_sub(next)).unwrap_or(usize::MAX);
                (remaining, Some(remaining))
            }
            (Some(next), None) => {
                let remaining = u128::from(u64::MAX - next) + 1;
                let exact = usize::try_from(remaining).ok();
                (exact.unwrap_or(usize::MAX), exact)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_range_excludes_end() {
        let indices: Vec<u64> = IndexRange::bounded(3, 6).into_iter().collect();
        assert_eq!(indices, vec![3, 4, 5]);
    }

    #[test]
    fn empty_and_inverted_ranges_yield_nothing() {
        assert_eq!(IndexRange::bounded(4, 4).into_iter().count(), 0);
        assert_eq!(IndexRange::bounded(9, 2).into_iter().count(), 0);
        assert_eq!(IndexRange::bounded(9, 2).len(), Some(0));
    }

    #[test]
    fn unbounded_range_keeps_producing() {
        let range = IndexRange::unbounded(10);
        let first: Vec<u64> = range.into_iter().take(1000).collect();
        assert_eq!(first.len(), 1000);
        assert_eq!(first[999], 1009);
        assert!(!range.is_bounded());
        assert_eq!(range.len(), None);
    }

    #[test]
    fn iterating_again_restarts_from_start() {
        let range = IndexRange::bounded(0, 2);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn unbounded_producer_stops_at_u64_max() {
        let tail: Vec<u64> = IndexRange::unbounded(u64::MAX - 1).into_iter().collect();
        assert_eq!(tail, vec![u64::MAX - 1, u64::MAX]);
    }

    #[test]
    fn unbounded_size_hint_counts_indices_left_before_u64_max() {
        let mut tail = IndexRange::unbounded(u64::MAX - 1).into_iter();
        assert_eq!(tail.size_hint(), (2, Some(2)));
        tail.next();
        assert_eq!(tail.size_hint(), (1, Some(1)));
        tail.next();
        assert_eq!(tail.size_hint(), (0, Some(0)));

        let (lower, upper) = IndexRange::unbounded(0).into_iter().size_hint();
        assert_eq!(lower, usize::MAX);
        assert_eq!(upper, None);
        assert_eq!(IndexRange::unbounded(0).into_iter().take(3).size_hint(), (3, Some(3)));
    }

    #[test]
    fn display_shows_open_end() {
        assert_eq!(IndexRange::bounded(1, 5).to_string(), "1..5");
        assert_eq!(IndexRange::unbounded(7).to_string(), "7..");
    }
}
