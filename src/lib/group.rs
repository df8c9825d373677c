//! # Per-Tile Reduction Barrier
//!
//! Every output tile of the product is the sum of `blocks_per_group` partial
//! block products, computed by sibling jobs that may land on different
//! worker pools. A `TileGroup` collects those partials and elects the job
//! with `local_id == 0` (the leader) to perform the reduction exactly once:
//! the leader blocks until every sibling has reported, sums the scratch
//! slots in contributor order, writes the tile into the output matrix, and
//! releases the group's scratch.
//!
//! Group state is shared only among the jobs of one group, guarded by the
//! group's own lock. After the leader releases the group, any further access
//! is a defect; the `released` flag turns such access into an immediate
//! panic instead of a silent read of recycled memory.

use std::fmt;
use std::sync::{Condvar, Mutex};

/// A raw window onto one tile of the output matrix.
///
/// The scheduler hands each group a window whose tile region is disjoint
/// from every other group's, so the leader writes its tile without any lock
/// on the output buffer itself.
pub struct OutputTile {
    ptr: *mut i32,
    row_stride: usize,
}

// SAFETY: tiles given to distinct groups never overlap, exactly one job per
// group (the leader) writes through the window, and the scheduler keeps the
// output buffer alive until both pools have drained.
unsafe impl Send for OutputTile {}
unsafe impl Sync for OutputTile {}

impl OutputTile {
    /// Builds a window whose first element is `ptr` and whose rows are
    /// `row_stride` elements apart.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for writes of `block_size` rows of `block_size`
    /// elements (stride `row_stride`) until the owning group is released,
    /// and no other window may cover the same region.
    pub unsafe fn new(ptr: *mut i32, row_stride: usize) -> Self {
        Self { ptr, row_stride }
    }

    fn write_tile(&self, block_size: usize, tile: &[i32]) {
        debug_assert_eq!(tile.len(), block_size * block_size);
        for y in 0..block_size {
            // SAFETY: in-bounds per the construction contract of `new`.
            unsafe {
                let row = self.ptr.add(y * self.row_stride);
                std::ptr::copy_nonoverlapping(tile.as_ptr().add(y * block_size), row, block_size);
            }
        }
    }
}

struct GroupState {
    partials: Vec<Option<Vec<i32>>>,
    completed: usize,
    released: bool,
}

/// Shared completion state for the jobs contributing to one output tile.
pub struct TileGroup {
    id: usize,
    blocks_per_group: usize,
    block_size: usize,
    state: Mutex<GroupState>,
    all_done: Condvar,
    output: OutputTile,
}

impl fmt::Debug for TileGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileGroup")
            .field("id", &self.id)
            .field("blocks_per_group", &self.blocks_per_group)
            .field("block_size", &self.block_size)
            .finish()
    }
}

impl TileGroup {
    /// Creates the group for one output tile with empty scratch slots for
    /// `blocks_per_group` contributors.
    pub fn new(id: usize, blocks_per_group: usize, block_size: usize, output: OutputTile) -> Self {
        Self {
            id,
            blocks_per_group,
            block_size,
            state: Mutex::new(GroupState {
                partials: (0..blocks_per_group).map(|_| None).collect(),
                completed: 0,
                released: false,
            }),
            all_done: Condvar::new(),
            output,
        }
    }

    /// Group identifier assigned by the scheduler.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of contributions this group expects.
    pub fn blocks_per_group(&self) -> usize {
        self.blocks_per_group
    }

    /// Whether the leader has already reduced and released this group.
    pub fn is_released(&self) -> bool {
        self.state.lock().expect("group lock poisoned").released
    }

    /// Records one contributor's partial product.
    ///
    /// Increments the group's progress and, when the final contribution
    /// arrives, broadcast-wakes any waiter (the leader). Each `local_id`
    /// may report exactly once.
    ///
    /// # Panics
    ///
    /// Panics if the group has already been released or if the slot was
    /// already filled; both indicate a scheduling defect.
    pub fn record(&self, local_id: usize, partial: Vec<i32>) {
        debug_assert_eq!(partial.len(), self.block_size * self.block_size);

        let mut state = self.state.lock().expect("group lock poisoned");
        assert!(
            !state.released,
            "group {} contribution after release",
            self.id
        );
        assert!(
            state.partials[local_id].is_none(),
            "group {} slot {} filled twice",
            self.id,
            local_id
        );

        state.partials[local_id] = Some(partial);
        state.completed += 1;
        if state.completed == self.blocks_per_group {
            self.all_done.notify_all();
        }
    }

    /// Leader-only: waits for every contribution, sums the scratch slots in
    /// increasing contributor order, writes the tile to the output window
    /// and releases the group's scratch.
    ///
    /// Must be called by exactly one job per group (the one with
    /// `local_id == 0`), after that job has recorded its own contribution.
    pub fn reduce_and_release(&self) {
        let mut state = self.state.lock().expect("group lock poisoned");
        while state.completed != self.blocks_per_group {
            state = self
                .all_done
                .wait(state)
                .expect("group condvar wait poisoned");
        }
        assert!(!state.released, "group {} reduced twice", self.id);

        let elems = self.block_size * self.block_size;
        let mut tile = vec![0i32; elems];
        for slot in state.partials.iter_mut() {
            let partial = slot.take().expect("missing partial despite progress");
            for (acc, v) in tile.iter_mut().zip(&partial) {
                *acc += v;
            }
        }
        state.released = true;

        self.output.write_tile(self.block_size, &tile);
        tracing::trace!("group {} reduced ({} blocks)", self.id, self.blocks_per_group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn tile_into(buf: &mut [i32], dim: usize) -> OutputTile {
        // Window over the top-left tile of a dim x dim buffer.
        unsafe { OutputTile::new(buf.as_mut_ptr(), dim) }
    }

    #[test]
    fn test_single_contributor_group() {
        let mut out = vec![0i32; 4];
        let group = TileGroup::new(0, 1, 2, tile_into(&mut out, 2));

        group.record(0, vec![1, 2, 3, 4]);
        group.reduce_and_release();

        assert!(group.is_released());
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_reduction_sums_in_contributor_order() {
        let mut out = vec![0i32; 4];
        let group = TileGroup::new(7, 3, 2, tile_into(&mut out, 2));

        // Contributions recorded out of order; the sum is slot-ordered.
        group.record(2, vec![100, 200, 300, 400]);
        group.record(0, vec![1, 2, 3, 4]);
        group.record(1, vec![10, 20, 30, 40]);
        group.reduce_and_release();

        assert_eq!(out, vec![111, 222, 333, 444]);
    }

    #[test]
    fn test_leader_blocks_until_all_contributions() {
        let mut out = vec![0i32; 1];
        let group = Arc::new(TileGroup::new(1, 2, 1, tile_into(&mut out, 1)));

        group.record(0, vec![5]);

        let leader = {
            let group = Arc::clone(&group);
            thread::spawn(move || group.reduce_and_release())
        };

        // Give the leader time to reach the wait; the group must still be
        // unreduced with one contribution outstanding.
        thread::sleep(Duration::from_millis(50));
        assert!(!group.is_released());

        group.record(1, vec![3]);
        leader.join().unwrap();

        assert!(group.is_released());
        drop(group);
        assert_eq!(out, vec![8]);
    }

    #[test]
    fn test_permuted_completion_orders_agree() {
        let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 1, 0], [1, 2, 0]];
        let mut results = Vec::new();

        for order in orders {
            let mut out = vec![0i32; 4];
            let group = Arc::new(TileGroup::new(0, 3, 2, tile_into(&mut out, 2)));

            let handles: Vec<_> = order
                .iter()
                .map(|&local_id| {
                    let group = Arc::clone(&group);
                    thread::spawn(move || {
                        let v = (local_id as i32 + 1) * 10;
                        group.record(local_id, vec![v, v + 1, v + 2, v + 3]);
                        if local_id == 0 {
                            group.reduce_and_release();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            drop(group);
            results.push(out);
        }

        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
        assert_eq!(results[0], vec![60, 63, 66, 69]);
    }

    #[test]
    #[should_panic(expected = "after release")]
    fn test_contribution_after_release_panics() {
        let mut out = vec![0i32; 1];
        let group = TileGroup::new(3, 1, 1, tile_into(&mut out, 1));

        group.record(0, vec![1]);
        group.reduce_and_release();
        group.record(0, vec![2]);
    }
}
