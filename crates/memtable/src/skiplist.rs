//! Skip list stored in an arena of towers.
//!
//! Level 0 links every tower in key order; each higher level skips over
//! towers that did not win enough coin flips. Searches start at the highest
//! populated level and drop down.
//!
//! ```text
//! Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
//! Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
//! Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
//! ```

use rand::Rng;
use record::Record;

#[derive(Debug, Clone)]
struct Tower {
    record: Record,
    next: Vec<Option<usize>>,
}

#[derive(Debug, Clone)]
pub struct SkipList {
    towers: Vec<Tower>,
    head: Vec<Option<usize>>,
    /// Highest populated level count.
    height: usize,
    max_height: usize,
}

impl SkipList {
    /// Creates an empty list whose towers grow at most `max_height` levels.
    pub fn new(max_height: usize) -> Self {
        let max_height = max_height.max(1);
        Self {
            towers: Vec::new(),
            head: vec![None; max_height],
            height: 1,
            max_height,
        }
    }

    pub fn len(&self) -> usize {
        self.towers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.towers.is_empty()
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn next_of(&self, from: Option<usize>, level: usize) -> Option<usize> {
        match from {
            None => self.head[level],
            Some(i) => self.towers[i].next[level],
        }
    }

    fn set_next(&mut self, from: Option<usize>, level: usize, to: Option<usize>) {
        match from {
            None => self.head[level] = to,
            Some(i) => self.towers[i].next[level] = to,
        }
    }

    /// Last tower with a key below `key` on every level (`None` = head).
    fn predecessors(&self, key: &str) -> Vec<Option<usize>> {
        let mut preds = vec![None; self.max_height];
        let mut cur = None;
        for level in (0..self.height).rev() {
            while let Some(n) = self.next_of(cur, level) {
                if self.towers[n].record.key.as_str() < key {
                    cur = Some(n);
                } else {
                    break;
                }
            }
            preds[level] = cur;
        }
        preds
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        let preds = self.predecessors(key);
        self.next_of(preds[0], 0)
            .map(|i| &self.towers[i].record)
            .filter(|r| r.key == key)
    }

    /// Inserts `record`, replacing any record with the same key in place.
    /// Returns the replaced record.
    pub fn insert(&mut self, record: Record) -> Option<Record> {
        let preds = self.predecessors(&record.key);
        if let Some(i) = self.next_of(preds[0], 0) {
            if self.towers[i].record.key == record.key {
                return Some(std::mem::replace(&mut self.towers[i].record, record));
            }
        }

        let height = self.random_height();
        self.height = self.height.max(height);
        let idx = self.towers.len();
        let next = (0..height).map(|level| self.next_of(preds[level], level)).collect();
        self.towers.push(Tower { record, next });
        for (level, &pred) in preds.iter().enumerate().take(height) {
            self.set_next(pred, level, Some(idx));
        }
        None
    }

    /// Fair coin flips, capped at `max_height`.
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < self.max_height && rng.gen_bool(0.5) {
            height += 1;
        }
        height
    }

    /// Records in key order, following level 0.
    pub fn sorted(&self) -> Vec<&Record> {
        let mut out = Vec::with_capacity(self.towers.len());
        let mut cur = self.head[0];
        while let Some(i) = cur {
            out.push(&self.towers[i].record);
            cur = self.towers[i].next[0];
        }
        out
    }

    /// Checks that every level is sorted and a sublist of the level below.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut below: Option<Vec<usize>> = None;
        for level in 0..self.height {
            let mut chain = Vec::new();
            let mut cur = self.head[level];
            while let Some(i) = cur {
                chain.push(i);
                cur = self.towers[i].next[level];
            }
            assert!(chain
                .windows(2)
                .all(|w| self.towers[w[0]].record.key < self.towers[w[1]].record.key));
            if let Some(lower) = &below {
                assert!(chain.iter().all(|i| lower.contains(i)));
            } else {
                assert_eq!(chain.len(), self.towers.len());
            }
            below = Some(chain);
        }
        assert!(self.height <= self.max_height);
    }
}
