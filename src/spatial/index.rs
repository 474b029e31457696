//! Grid-sharded concurrent bounding-box index.
//!
//! The map is split into `grid × grid` shards, each with its own
//! `parking_lot::RwLock`. An item lives in exactly one shard, chosen by the
//! centroid of its envelope and clamped to the grid. Whenever more than one
//! shard lock is held at once, the locks are taken in ascending shard index.

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::trace;

use crate::config::SpatialConfig;
use crate::domain::{Envelope, Point};

/// Fallback extent when the configured map size is unusable
const FALLBACK_EXTENT: f64 = 1_000_000.0;

#[derive(Debug, Clone)]
struct Entry<T> {
    envelope: Envelope,
    item: T,
}

type Shard<T> = RwLock<Vec<Entry<T>>>;

/// Concurrent index of items keyed by bounding box
pub struct ShardedIndex<T> {
    shards: Vec<Shard<T>>,
    grid: usize,
    origin: Point,
    cell_width: f64,
    cell_height: f64,
}

impl<T: Clone + PartialEq> ShardedIndex<T> {
    /// `grid` is clamped to at least 1; a non-positive extent falls back to a
    /// very large map so nothing is rejected.
    pub fn new(origin: Point, width: f64, height: f64, grid: usize) -> Self {
        let grid = grid.max(1);
        let width = if width > 0.0 { width } else { FALLBACK_EXTENT };
        let height = if height > 0.0 { height } else { FALLBACK_EXTENT };
        let shards = (0..grid * grid).map(|_| RwLock::new(Vec::new())).collect();

        Self {
            shards,
            grid,
            origin,
            cell_width: width / grid as f64,
            cell_height: height / grid as f64,
        }
    }

    pub fn from_config(config: &SpatialConfig) -> Self {
        Self::new(
            Point::new(config.min_x, config.min_y),
            config.width,
            config.height,
            config.grid_size,
        )
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn col(&self, x: f64) -> usize {
        // NaN and negatives saturate to 0
        let raw = ((x - self.origin.x) / self.cell_width).floor() as isize;
        raw.clamp(0, self.grid as isize - 1) as usize
    }

    fn row(&self, y: f64) -> usize {
        let raw = ((y - self.origin.y) / self.cell_height).floor() as isize;
        raw.clamp(0, self.grid as isize - 1) as usize
    }

    /// Shard owning an item with this envelope
    pub fn shard_index(&self, envelope: &Envelope) -> usize {
        let c = envelope.centre();
        self.row(c.y) * self.grid + self.col(c.x)
    }

    /// Shards overlapped by `envelope`, ascending
    fn shards_covering(&self, envelope: &Envelope) -> Vec<usize> {
        let (c0, c1) = (self.col(envelope.min_x), self.col(envelope.max_x));
        let (r0, r1) = (self.row(envelope.min_y), self.row(envelope.max_y));
        (r0..=r1)
            .flat_map(|r| (c0..=c1).map(move |c| r * self.grid + c))
            .collect()
    }

    pub fn insert(&self, envelope: Envelope, item: T) {
        let idx = self.shard_index(&envelope);
        self.shards[idx].write().push(Entry { envelope, item });
    }

    /// Returns false when the item was not present.
    pub fn remove(&self, envelope: &Envelope, item: &T) -> bool {
        let idx = self.shard_index(envelope);
        let mut shard = self.shards[idx].write();
        take(&mut shard, item)
    }

    /// Items whose envelope intersects `envelope`.
    pub fn query(&self, envelope: &Envelope) -> Vec<T> {
        let involved = self.shards_covering(envelope);
        if let [only] = involved.as_slice() {
            return collect_hits(&self.shards[*only].read(), envelope);
        }

        // Every read lock is held before the first shard is scanned
        let guards: Vec<RwLockReadGuard<'_, Vec<Entry<T>>>> =
            involved.iter().map(|i| self.shards[*i].read()).collect();
        guards
            .iter()
            .flat_map(|g| collect_hits(g, envelope))
            .collect()
    }

    /// Relocate an item; readers see it either at the old or at the new place.
    ///
    /// Returns whether the old entry was found. The new entry is inserted either way.
    pub fn move_item(
        &self,
        old_envelope: &Envelope,
        old_item: &T,
        envelope: Envelope,
        item: T,
    ) -> bool {
        let from = self.shard_index(old_envelope);
        let to = self.shard_index(&envelope);

        if from == to {
            let mut shard = self.shards[from].write();
            let found = take(&mut shard, old_item);
            shard.push(Entry { envelope, item });
            return found;
        }

        let (low, high) = (from.min(to), from.max(to));
        let mut low_guard = self.shards[low].write();
        let mut high_guard = self.shards[high].write();
        let (source, dest) = if from < to {
            (&mut *low_guard, &mut *high_guard)
        } else {
            (&mut *high_guard, &mut *low_guard)
        };

        let found = take(source, old_item);
        dest.push(Entry { envelope, item });
        trace!(from, to, found, "cross-shard move");
        found
    }

    pub fn size(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Per-shard item counts, ascending shard index
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.read().len()).collect()
    }

    /// Every item. Locks the whole structure; diagnostics only.
    pub fn query_all(&self) -> Vec<T> {
        let guards: Vec<_> = self.shards.iter().map(|s| s.read()).collect();
        guards
            .iter()
            .flat_map(|g| g.iter().map(|e| e.item.clone()))
            .collect()
    }
}

fn take<T: PartialEq>(entries: &mut Vec<Entry<T>>, item: &T) -> bool {
    match entries.iter().position(|e| &e.item == item) {
        Some(pos) => {
            entries.swap_remove(pos);
            true
        }
        None => false,
    }
}

fn collect_hits<T: Clone>(entries: &[Entry<T>], envelope: &Envelope) -> Vec<T> {
    entries
        .iter()
        .filter(|e| e.envelope.intersects(envelope))
        .map(|e| e.item.clone())
        .collect()
}
