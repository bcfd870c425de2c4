//! Decoded-frame cache with sliding-window eviction and lazy encoded
//! artifacts, generic over the decoded-picture type so it can be
//! exercised in tests without a real codec library.

/// One decoded frame plus its (at most 8) lazily-produced encoded variants.
#[derive(Debug, Clone)]
pub struct FrameRecord<F> {
    pub pts: i64,
    pub duration: i64,
    pub decoded: F,
    pub encoded: [Option<Vec<u8>>; 8],
}

impl<F> FrameRecord<F> {
    pub fn new(pts: i64, duration: i64, decoded: F) -> Self {
        Self {
            pts,
            duration,
            decoded,
            encoded: Default::default(),
        }
    }
}

/// Outcome of a cache lookup; distinguishes a hit from the two kinds of miss
/// the loader must handle differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    Hit(usize),
    MissNearForward,
    MissFar,
}

pub struct FrameCache<F> {
    frames: Vec<FrameRecord<F>>,
    pts_range: Option<(i64, i64)>,
    pts_last: Option<i64>,
    delta: i64,
    seek_threshold: i64,
    seek_amount: i64,
    capacity: usize,
}

impl<F> FrameCache<F> {
    pub fn new(capacity: usize, delta: i64, seek_threshold: i64, seek_amount: i64) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            pts_range: None,
            pts_last: None,
            delta,
            seek_threshold,
            seek_amount,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn seek_amount(&self) -> i64 {
        self.seek_amount
    }

    pub fn pts_range(&self) -> Option<(i64, i64)> {
        self.pts_range
    }

    pub fn pts_last(&self) -> Option<i64> {
        self.pts_last
    }

    pub fn reset_pts_last(&mut self) {
        self.pts_last = None;
    }

    pub fn get(&self, idx: usize) -> Option<&FrameRecord<F>> {
        self.frames.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut FrameRecord<F>> {
        self.frames.get_mut(idx)
    }

    /// Admit a decoded frame. If full, evicts the oldest `capacity / 4`
    /// frames first. `pts_last` always tracks the newest admission,
    /// independent of eviction.
    pub fn add(&mut self, frame: FrameRecord<F>) {
        if self.frames.len() >= self.capacity {
            let evict = (self.capacity / 4).max(1);
            self.frames.drain(0..evict.min(self.frames.len()));
        }
        self.pts_last = Some(frame.pts);
        self.frames.push(frame);
        self.recompute_range();
    }

    fn recompute_range(&mut self) {
        self.pts_range = match (self.frames.first(), self.frames.last()) {
            (Some(_), Some(_)) => {
                let min = self.frames.iter().map(|f| f.pts).min().unwrap();
                let max = self.frames.iter().map(|f| f.pts).max().unwrap();
                Some((min, max))
            }
            _ => None,
        };
    }

    /// Tri-state lookup per the loader's decision procedure: an exact
    /// resident hit, a miss that's cheap to resolve by decoding forward, or
    /// a miss that requires a seek.
    pub fn find(&self, pts: i64) -> FindResult {
        if let Some((start, end)) = self.pts_range {
            if pts >= start && pts <= end {
                // Exact match wins over nearest; earliest insertion wins ties.
                if let Some(idx) = self.frames.iter().position(|f| f.pts == pts) {
                    return FindResult::Hit(idx);
                }
            }
        }
        if let Some(last) = self.pts_last {
            if pts > last && pts - last < self.delta * self.seek_threshold {
                return FindResult::MissNearForward;
            }
        }
        FindResult::MissFar
    }

    /// Return the index of the resident frame whose `[pts, pts+duration)`
    /// interval contains `pts`, or `None` if no such frame is resident.
    pub fn find_nearest(&self, pts: i64) -> Option<usize> {
        let (start, end) = self.pts_range?;
        if pts < start || pts > end {
            return None;
        }
        self.frames
            .iter()
            .position(|f| pts >= f.pts && pts < f.pts + f.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(cache: &mut FrameCache<()>, pts: i64, duration: i64) {
        cache.add(FrameRecord::new(pts, duration, ()));
    }

    #[test]
    fn cache_bound_holds_after_many_admissions() {
        let mut cache = FrameCache::new(8, 3003, 30, 30);
        for i in 0..100 {
            push(&mut cache, i * 3003, 3003);
        }
        assert!(cache.len() <= cache.capacity());
    }

    #[test]
    fn eviction_preserves_newest() {
        let mut cache = FrameCache::new(8, 3003, 30, 30);
        for i in 0..20 {
            push(&mut cache, i * 3003, 3003);
        }
        let last_pts = 19 * 3003;
        assert!(matches!(cache.find(last_pts), FindResult::Hit(_)));
    }

    #[test]
    fn range_consistency() {
        let mut cache = FrameCache::new(8, 3003, 30, 30);
        for i in 0..20 {
            push(&mut cache, i * 3003, 3003);
            if let Some((start, end)) = cache.pts_range() {
                assert!(start <= end);
                assert!(cache.frames.iter().any(|f| f.pts == start));
                assert!(cache.frames.iter().any(|f| f.pts == end));
            }
        }
    }

    #[test]
    fn pts_last_survives_eviction() {
        let mut cache = FrameCache::new(4, 3003, 30, 30);
        for i in 0..10 {
            push(&mut cache, i * 3003, 3003);
        }
        assert_eq!(cache.pts_last(), Some(9 * 3003));
    }

    #[test]
    fn miss_near_forward_within_threshold() {
        let mut cache = FrameCache::new(120, 3003, 30, 30);
        push(&mut cache, 0, 3003);
        let target = 3003 * 10;
        assert_eq!(cache.find(target), FindResult::MissNearForward);
    }

    #[test]
    fn miss_far_beyond_threshold() {
        let mut cache = FrameCache::new(120, 3003, 30, 30);
        push(&mut cache, 0, 3003);
        let target = 3003 * 1000;
        assert_eq!(cache.find(target), FindResult::MissFar);
    }

    #[test]
    fn find_nearest_uses_frame_duration_window() {
        let mut cache = FrameCache::new(120, 3003, 30, 30);
        push(&mut cache, 0, 3003);
        push(&mut cache, 3003, 3003);
        push(&mut cache, 6006, 3003);
        // 7000 falls inside [6006, 6006+3003)
        assert_eq!(cache.find_nearest(7000), Some(2));
    }

    #[test]
    fn duplicate_pts_resolves_to_first_insertion() {
        let mut cache = FrameCache::new(120, 3003, 30, 30);
        push(&mut cache, 100, 10);
        push(&mut cache, 100, 10);
        assert_eq!(cache.find(100), FindResult::Hit(0));
    }
}
