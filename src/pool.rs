// SPDX-License-Identifier: Apache-2.0

//! A process-wide recycling allocator for [`Segment`]s.
//!
//! Free blocks are kept in a small set of stripes, each a LIFO guarded by its
//! own lock, so that buffers on different threads rarely contend. A relaxed
//! global byte counter enforces an advisory cap: recycling past the cap drops
//! the block instead. Claiming never blocks on allocation.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use crate::segment::{Block, Segment, SIZE};

/// The advisory maximum of free bytes retained across all stripes.
pub const MAX_BYTES: usize = 64 * 1024;

const STRIPE_COUNT: usize = 8;

struct Stripe {
	free: Mutex<Vec<Arc<Block>>>,
}

struct Pool {
	stripes: [Stripe; STRIPE_COUNT],
	bytes: AtomicUsize,
}

static POOL: Lazy<Pool> = Lazy::new(|| Pool {
	stripes: std::array::from_fn(|_| Stripe { free: Mutex::new(Vec::new()) }),
	bytes: AtomicUsize::new(0),
});

static NEXT_STRIPE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
	static STRIPE: Cell<usize> = Cell::new(usize::MAX);
}

fn stripe() -> &'static Stripe {
	let index = STRIPE.with(|cell| {
		let mut index = cell.get();
		if index == usize::MAX {
			index = NEXT_STRIPE.fetch_add(1, Ordering::Relaxed) % STRIPE_COUNT;
			cell.set(index);
		}
		index
	});
	&POOL.stripes[index]
}

/// Claims a segment: recycled if the calling thread's stripe has one, freshly
/// allocated otherwise. The result is empty, writable, and unlinked.
pub fn take() -> Segment {
	let recycled = stripe().free.lock().pop();
	match recycled {
		Some(block) => {
			POOL.bytes.fetch_sub(SIZE, Ordering::Relaxed);
			Segment::from_block(block)
		}
		None => Segment::new(),
	}
}

/// Returns a segment to the pool. Shared or non-owner segments are dropped,
/// as is anything past the advisory byte cap.
pub fn recycle(segment: Segment) {
	let Some(block) = segment.into_block() else { return };

	if POOL.bytes.load(Ordering::Relaxed) >= MAX_BYTES {
		return;
	}
	POOL.bytes.fetch_add(SIZE, Ordering::Relaxed);
	stripe().free.lock().push(block);
}

/// The number of free bytes currently pooled. Racy by nature; intended for
/// tests and diagnostics.
pub fn pooled_bytes() -> usize {
	POOL.bytes.load(Ordering::Relaxed)
}
