//! Byte-offset seek index: `(pts, byte_pos)` pairs sorted by PTS, used to
//! perform exact-byte seeks when PTS-based seeking is imprecise.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekIndexEntry {
    pub pts: i64,
    pub byte_pos: i64,
}

#[derive(Debug, Default, Clone)]
pub struct SeekIndex {
    entries: Vec<SeekIndexEntry>,
}

impl SeekIndex {
    /// Build from demuxer-order `(pts, byte_pos)` pairs, sorting by PTS.
    ///
    /// The underlying demuxer does not guarantee PTS order for B-frame
    /// streams; this index must be queryable by PTS, so it sorts on build.
    pub fn build(mut entries: Vec<SeekIndexEntry>) -> Self {
        entries.sort_by_key(|e| e.pts);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SeekIndexEntry] {
        &self.entries
    }

    pub fn find_exact(&self, pts: i64) -> Option<SeekIndexEntry> {
        self.entries
            .binary_search_by_key(&pts, |e| e.pts)
            .ok()
            .map(|i| self.entries[i])
    }

    /// Largest PTS <= target; if target precedes all entries, return the
    /// first entry.
    pub fn nearest_earlier(&self, pts: i64) -> Option<SeekIndexEntry> {
        if self.entries.is_empty() {
            return None;
        }
        match self.entries.binary_search_by_key(&pts, |e| e.pts) {
            Ok(i) => Some(self.entries[i]),
            Err(0) => Some(self.entries[0]),
            Err(i) => Some(self.entries[i - 1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pts: i64, pos: i64) -> SeekIndexEntry {
        SeekIndexEntry { pts, byte_pos: pos }
    }

    #[test]
    fn build_sorts_by_pts_even_from_b_frame_order() {
        let idx = SeekIndex::build(vec![entry(300, 30), entry(100, 10), entry(200, 20)]);
        let ptss: Vec<i64> = idx.entries().iter().map(|e| e.pts).collect();
        assert_eq!(ptss, vec![100, 200, 300]);
    }

    #[test]
    fn find_exact_matches() {
        let idx = SeekIndex::build(vec![entry(100, 10), entry(200, 20)]);
        assert_eq!(idx.find_exact(200), Some(entry(200, 20)));
        assert_eq!(idx.find_exact(150), None);
    }

    #[test]
    fn nearest_earlier_contract() {
        let idx = SeekIndex::build(vec![entry(100, 10), entry(200, 20), entry(300, 30)]);
        let got = idx.nearest_earlier(250).unwrap();
        assert!(got.pts <= 250);
        assert!(!idx.entries().iter().any(|e| e.pts > got.pts && e.pts <= 250));
    }

    #[test]
    fn nearest_earlier_before_all_returns_first() {
        let idx = SeekIndex::build(vec![entry(100, 10), entry(200, 20)]);
        assert_eq!(idx.nearest_earlier(0), Some(entry(100, 10)));
    }

    #[test]
    fn nearest_earlier_on_exact_match() {
        let idx = SeekIndex::build(vec![entry(100, 10), entry(200, 20)]);
        assert_eq!(idx.nearest_earlier(200), Some(entry(200, 20)));
    }
}
