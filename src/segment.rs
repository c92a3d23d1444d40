// SPDX-License-Identifier: Apache-2.0

use std::cmp::min;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// The fixed capacity of every segment, in bytes.
pub const SIZE: usize = 8192;

/// Segments smaller than this are copied on split rather than shared, trading
/// a memcpy for fewer tiny shared windows in the pipeline.
pub(crate) const SHARE_MINIMUM: usize = 1024;

pub(crate) type Block = [u8; SIZE];

/// A fixed-capacity chunk of buffer memory. Readable bytes live in
/// `[pos, limit)` of the block; writable bytes in `[limit, SIZE)`.
///
/// The block itself sits behind an atomic refcount so that segments can alias
/// it: a *shared* segment is a read-only window into a block that another
/// segment or a [`ByteString`](crate::ByteString) snapshot also references.
/// Only a segment that is the *owner* of its block and is not shared may be
/// written or recycled into the pool.
pub struct Segment {
	block: Arc<Block>,
	pos: usize,
	limit: usize,
	shared: bool,
	owner: bool,
}

impl Segment {
	/// Returns a fresh, empty, writable segment backed by newly allocated
	/// memory. Callers should prefer [`pool::take`](crate::pool::take).
	pub(crate) fn new() -> Self {
		Self::from_block(Arc::new([0; SIZE]))
	}

	/// Rebuilds an empty segment around a recycled block.
	pub(crate) fn from_block(block: Arc<Block>) -> Self {
		Self {
			block,
			pos: 0,
			limit: 0,
			shared: false,
			owner: true,
		}
	}

	/// The index of the next readable byte.
	pub fn pos(&self) -> usize { self.pos }
	/// The index of the next writable byte.
	pub fn limit(&self) -> usize { self.limit }
	/// The number of readable bytes.
	pub fn len(&self) -> usize { self.limit - self.pos }
	pub fn is_empty(&self) -> bool { self.pos == self.limit }

	/// `true` if the block is aliased by another segment or snapshot.
	pub fn is_shared(&self) -> bool { self.shared }
	/// `true` if this segment may write to and recycle its block.
	pub fn is_owner(&self) -> bool { self.owner }

	/// `true` if this segment may be mutated in place.
	pub fn is_writable(&self) -> bool { self.owner && !self.shared }

	/// The number of bytes that can be appended, zero for unwritable segments.
	pub fn writable_len(&self) -> usize {
		if self.is_writable() { SIZE - self.limit } else { 0 }
	}

	/// The readable bytes, `[pos, limit)`.
	pub fn data(&self) -> &[u8] {
		&self.block[self.pos..self.limit]
	}

	pub(crate) fn block(&self) -> &Arc<Block> { &self.block }

	/// Marks the block as aliased without copying. Done by snapshots before
	/// they clone the block reference.
	pub(crate) fn mark_shared(&mut self) {
		self.shared = true;
	}

	/// Advances `pos` after `n` bytes were read.
	pub(crate) fn consume(&mut self, n: usize) {
		debug_assert!(n <= self.len());
		self.pos += n;
	}

	/// Advances `limit` after `n` bytes were written through
	/// [`writable`](Self::writable).
	pub(crate) fn add(&mut self, n: usize) {
		debug_assert!(self.is_writable() && self.limit + n <= SIZE);
		self.limit += n;
	}

	/// Drops all but the first `n` readable bytes.
	pub(crate) fn truncate(&mut self, n: usize) {
		debug_assert!(n <= self.len());
		self.limit = self.pos + n;
	}

	/// The writable tail of the block, `[limit, SIZE)`. The segment must be
	/// writable; call [`fork`](Self::fork) first when it may not be.
	pub(crate) fn writable(&mut self) -> &mut [u8] {
		debug_assert!(self.is_writable());
		let limit = self.limit;
		&mut Arc::make_mut(&mut self.block)[limit..]
	}

	/// Mutable access to the readable bytes. Writable segments only; used by
	/// the read-write cursor after it forks.
	pub(crate) fn data_mut(&mut self) -> &mut [u8] {
		debug_assert!(self.is_writable());
		let (pos, limit) = (self.pos, self.limit);
		&mut Arc::make_mut(&mut self.block)[pos..limit]
	}

	/// Appends bytes from `src`, returning the count written.
	pub(crate) fn push_slice(&mut self, src: &[u8]) -> usize {
		let n = min(self.writable_len(), src.len());
		if n > 0 {
			self.writable()[..n].copy_from_slice(&src[..n]);
			self.limit += n;
		}
		n
	}

	/// Splits off the first `byte_count` readable bytes into a new segment
	/// aliasing the same block. Both segments become shared; the new one is
	/// not an owner. The caller inserts the returned segment *before* this
	/// one.
	pub(crate) fn split(&mut self, byte_count: usize) -> Self {
		debug_assert!(byte_count > 0 && byte_count <= self.len());
		self.shared = true;
		let prefix = Self {
			block: Arc::clone(&self.block),
			pos: self.pos,
			limit: self.pos + byte_count,
			shared: true,
			owner: false,
		};
		self.pos += byte_count;
		prefix
	}

	/// A read-only alias of `len` readable bytes starting `start` past `pos`,
	/// leaving this segment's window untouched. Marks this segment shared.
	pub(crate) fn share_range(&mut self, start: usize, len: usize) -> Self {
		debug_assert!(start + len <= self.len());
		self.shared = true;
		Self {
			block: Arc::clone(&self.block),
			pos: self.pos + start,
			limit: self.pos + start + len,
			shared: true,
			owner: false,
		}
	}

	/// A read-only alias of the first `byte_count` readable bytes.
	pub(crate) fn share_prefix(&mut self, byte_count: usize) -> Self {
		self.share_range(0, byte_count)
	}

	/// Moves the readable bytes to the front of the block so the full tail is
	/// writable again. Writable segments only.
	pub(crate) fn shift(&mut self) {
		debug_assert!(self.is_writable());
		if self.pos == 0 { return }
		let (pos, limit) = (self.pos, self.limit);
		Arc::make_mut(&mut self.block).copy_within(pos..limit, 0);
		self.limit -= pos;
		self.pos = 0;
	}

	/// Moves `byte_count` readable bytes from this segment to the end of
	/// `sink`, shifting `sink` first if its tail space alone is too small.
	/// `sink` must be writable and have room counting reclaimable front space.
	pub(crate) fn write_to(&mut self, sink: &mut Segment, byte_count: usize) {
		debug_assert!(sink.is_writable());
		debug_assert!(byte_count <= self.len());
		debug_assert!(byte_count <= SIZE - sink.limit + sink.pos);

		if sink.limit + byte_count > SIZE {
			sink.shift();
		}
		let n = sink.push_slice(&self.block[self.pos..self.pos + byte_count]);
		debug_assert_eq!(n, byte_count);
		self.pos += byte_count;
	}

	/// Replaces an aliased block with a private copy, making the segment
	/// writable. No-op for segments that already own their block exclusively.
	pub(crate) fn fork(&mut self) {
		if self.shared || !self.owner {
			Arc::make_mut(&mut self.block);
			self.shared = false;
			self.owner = true;
		}
	}

	/// Consumes the segment, recovering its block for reuse. Returns `None`
	/// when the block is still aliased and must not be recycled.
	pub(crate) fn into_block(self) -> Option<Arc<Block>> {
		if self.is_writable() && Arc::strong_count(&self.block) == 1 {
			Some(self.block)
		} else {
			None
		}
	}
}

impl Debug for Segment {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Segment")
			.field("pos", &self.pos)
			.field("limit", &self.limit)
			.field("shared", &self.shared)
			.field("owner", &self.owner)
			.finish()
	}
}

#[cfg(test)]
mod test {
	use super::{Segment, SIZE};

	#[test]
	fn push_and_consume() {
		let mut seg = Segment::new();
		assert_eq!(seg.writable_len(), SIZE);
		assert_eq!(seg.push_slice(b"Hello World!"), 12);
		assert_eq!(seg.data(), b"Hello World!");
		seg.consume(6);
		assert_eq!(seg.data(), b"World!");
		assert_eq!(seg.len(), 6);
	}

	#[test]
	fn split_aliases_block() {
		let mut seg = Segment::new();
		seg.push_slice(b"frontback");
		let front = seg.split(5);
		assert_eq!(front.data(), b"front");
		assert_eq!(seg.data(), b"back");
		assert!(front.is_shared());
		assert!(!front.is_owner());
		assert!(seg.is_shared());
		assert!(seg.is_owner());
	}

	#[test]
	fn fork_unshares() {
		let mut seg = Segment::new();
		seg.push_slice(b"data");
		let alias = seg.share_prefix(4);
		assert!(!seg.is_writable());

		seg.fork();
		assert!(seg.is_writable());
		assert_eq!(seg.data(), b"data");
		// The alias keeps reading the original block.
		assert_eq!(alias.data(), b"data");
	}

	#[test]
	fn write_to_shifts_when_tail_is_tight() {
		let mut src = Segment::new();
		src.push_slice(&[0xAA; 64]);

		let mut dst = Segment::new();
		dst.push_slice(&[0xBB; SIZE]);
		// Free the front, leaving room only via a shift.
		dst.consume(SIZE - 32);

		src.write_to(&mut dst, 64);
		assert_eq!(dst.pos(), 0);
		assert_eq!(dst.len(), 96);
		assert_eq!(&dst.data()[32..], &[0xAA; 64]);
		assert_eq!(src.len(), 0);
	}

	#[test]
	fn shared_blocks_are_not_recycled() {
		let mut seg = Segment::new();
		seg.push_slice(b"x");
		let alias = seg.share_prefix(1);
		assert!(seg.into_block().is_none());
		drop(alias);
	}
}
