// SPDX-License-Identifier: Apache-2.0

mod cursor;
mod read;
mod write;

pub use cursor::BufferCursor;

use std::cmp::min;
use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use crate::{pool, Error, Result};
use crate::byte_str::ByteString;
use crate::segment::{Segment, SHARE_MINIMUM, SIZE};

/// A mutable sequence of bytes held in a deque of pooled [`Segment`]s.
///
/// The buffer is the only place bytes actually live: sources fill it, sinks
/// drain it, and the typed read/write surface operates on it directly. Moving
/// data between two buffers transfers whole segments by pointer wherever that
/// keeps the pipeline small, so splicing large streams together costs O(1)
/// per segment rather than a copy.
///
/// A buffer is single-owner: it is not safe to share one between threads
/// without external synchronization. Share bytes through immutable
/// [`ByteString`] snapshots instead.
pub struct Buffer {
	segments: VecDeque<Segment>,
	size: usize,
}

impl Default for Buffer {
	fn default() -> Self { Self::new() }
}

impl Buffer {
	pub fn new() -> Self {
		Self {
			segments: VecDeque::new(),
			size: 0,
		}
	}

	/// The number of readable bytes.
	pub fn size(&self) -> usize { self.size }

	pub fn is_empty(&self) -> bool { self.size == 0 }

	/// `true` when at least `byte_count` bytes are buffered. A buffer is not
	/// connected to a source, so this never blocks and never grows the
	/// buffer.
	pub fn request(&self, byte_count: usize) -> bool {
		self.size >= byte_count
	}

	/// Fails with [`PrematureEof`](crate::ErrorKind::PrematureEof) unless
	/// `byte_count` bytes are buffered.
	pub fn require(&self, byte_count: usize) -> Result {
		if self.request(byte_count) {
			Ok(())
		} else {
			Err(Error::premature_eof())
		}
	}

	/// Discards all buffered bytes, recycling their segments.
	pub fn clear(&mut self) {
		for segment in self.segments.drain(..) {
			pool::recycle(segment);
		}
		self.size = 0;
	}

	/// Discards the first `byte_count` buffered bytes.
	pub fn skip(&mut self, byte_count: usize) -> Result {
		self.require(byte_count)?;
		let mut remaining = byte_count;
		while remaining > 0 {
			let Some(head) = self.segments.front_mut() else { break };
			let n = min(remaining, head.len());
			head.consume(n);
			remaining -= n;
			self.size -= n;
			self.trim_head();
		}
		debug_assert_eq!(remaining, 0, "size accounting guarantees enough segments");
		Ok(())
	}

	/// The byte at `index`, without consuming anything.
	pub fn get(&self, mut index: usize) -> Option<u8> {
		if index >= self.size {
			return None;
		}
		for seg in &self.segments {
			if index < seg.len() {
				return Some(seg.data()[index]);
			}
			index -= seg.len();
		}
		None
	}

	/// The first index in `[from_index, to_index)` holding `byte`, scanning
	/// across segment boundaries.
	pub fn index_of(&self, byte: u8, from_index: usize, to_index: usize) -> Option<usize> {
		let to = min(to_index, self.size);
		if from_index >= to {
			return None;
		}

		let mut offset = 0;
		for seg in &self.segments {
			let len = seg.len();
			if offset + len > from_index {
				let begin = from_index.saturating_sub(offset);
				let end = min(len, to - offset);
				if let Some(i) = seg.data()[begin..end].iter().position(|&b| b == byte) {
					return Some(offset + begin + i);
				}
			}
			offset += len;
			if offset >= to { break }
		}
		None
	}

	/// The first index at or after `from_index` where the full `needle`
	/// occurs. A linear scan; patterns are expected to be small.
	pub fn index_of_bytes(&self, needle: &ByteString, from_index: usize) -> Option<usize> {
		if needle.is_empty() {
			return (from_index <= self.size).then_some(from_index);
		}
		let first = needle.byte(0)?;
		let mut candidate = from_index;
		while let Some(at) = self.index_of(first, candidate, self.size) {
			if self.size - at < needle.len() {
				return None;
			}
			if self.range_equals(at, needle) {
				return Some(at);
			}
			candidate = at + 1;
		}
		None
	}

	/// `true` if the bytes at `offset` equal `bytes` in full.
	pub fn range_equals(&self, offset: usize, bytes: &ByteString) -> bool {
		if offset + bytes.len() > self.size {
			return false;
		}
		let mut index = 0;
		let mut matched = true;
		bytes.for_each_chunk(|chunk| {
			if !matched { return }
			for &b in chunk {
				match self.get(offset + index) {
					Some(found) if found == b => index += 1,
					_ => {
						matched = false;
						return;
					}
				}
			}
		});
		matched
	}

	/// Shares the first `byte_count` buffered bytes as an immutable
	/// [`ByteString`] in O(segments). The affected segments become read-only
	/// for in-place writes; the snapshot stays valid however the buffer is
	/// mutated afterwards.
	pub fn snapshot_prefix(&mut self, byte_count: usize) -> Result<ByteString> {
		self.require(byte_count)?;
		if byte_count == 0 {
			return Ok(ByteString::empty());
		}

		let mut chunks = Vec::new();
		let mut remaining = byte_count;
		for seg in self.segments.iter_mut() {
			if remaining == 0 { break }
			let take = min(seg.len(), remaining);
			seg.mark_shared();
			chunks.push((Arc::clone(seg.block()), seg.pos()..seg.pos() + take));
			remaining -= take;
		}
		Ok(ByteString::from_segments(chunks))
	}

	/// Shares all buffered bytes as an immutable [`ByteString`].
	pub fn snapshot(&mut self) -> ByteString {
		match self.snapshot_prefix(self.size) {
			Ok(snapshot) => snapshot,
			Err(_) => ByteString::empty(),
		}
	}

	/// Copies `byte_count` bytes starting at `offset` into `out` without
	/// consuming them. Costs O(segments): full segment windows are shared,
	/// not copied.
	pub fn copy_to(&mut self, out: &mut Buffer, offset: usize, byte_count: usize) -> Result {
		let end = offset.checked_add(byte_count)
			.filter(|&end| end <= self.size)
			.ok_or_else(|| Error::invalid_argument(format!(
				"copy range {offset}..{} exceeds buffer size {}",
				offset.saturating_add(byte_count), self.size,
			)))?;
		if byte_count == 0 {
			return Ok(());
		}

		let mut skip = offset;
		let mut remaining = end - offset;
		for seg in self.segments.iter_mut() {
			let len = seg.len();
			if skip >= len {
				skip -= len;
				continue;
			}
			let take = min(len - skip, remaining);
			out.segments.push_back(seg.share_range(skip, take));
			out.size += take;
			remaining -= take;
			skip = 0;
			if remaining == 0 { break }
		}
		Ok(())
	}

	/// A detached copy of this buffer. The bytes are shared, not duplicated,
	/// so this is O(segments); either buffer may keep reading and writing
	/// independently.
	pub fn copy(&mut self) -> Buffer {
		let mut out = Buffer::new();
		let size = self.size;
		let copied = self.copy_to(&mut out, 0, size);
		debug_assert!(copied.is_ok());
		out
	}

	/// The readable bytes of the head segment.
	pub(crate) fn head_data(&self) -> Option<&[u8]> {
		self.segments.front().map(Segment::data)
	}

	/// The number of bytes that sit in completely filled segments, i.e. the
	/// size minus a still-fillable tail. This is what a buffered sink emits
	/// eagerly.
	pub(crate) fn complete_segment_byte_count(&self) -> usize {
		let mut count = self.size;
		if let Some(tail) = self.segments.back() {
			if tail.is_writable() && tail.limit() < SIZE {
				count -= tail.len();
			}
		}
		count
	}

	/// A tail segment with at least `min_bytes` of writable space, appending
	/// a pooled segment when the current tail is full, shared, or absent.
	pub(crate) fn writable_segment(&mut self, min_bytes: usize) -> &mut Segment {
		debug_assert!(min_bytes >= 1 && min_bytes <= SIZE);
		let needs_fresh = match self.segments.back() {
			Some(tail) => tail.writable_len() < min_bytes,
			None => true,
		};
		if needs_fresh {
			self.segments.push_back(pool::take());
		}
		self.segments.back_mut()
			.expect("a writable tail was just ensured")
	}

	/// Records `n` bytes written through
	/// [`writable_segment`](Self::writable_segment)'s slice.
	pub(crate) fn grow(&mut self, n: usize) {
		self.size += n;
	}

	/// Appends a segment, merging it into the tail when both fit in one
	/// block. The merge keeps long pipelines from accumulating short
	/// segments.
	pub(crate) fn push_segment(&mut self, segment: Segment) {
		if segment.is_empty() {
			pool::recycle(segment);
			return;
		}
		if let Some(tail) = self.segments.back_mut() {
			if tail.is_writable() && segment.len() <= SIZE - tail.limit() + tail.pos() {
				let mut segment = segment;
				let n = segment.len();
				segment.write_to(tail, n);
				pool::recycle(segment);
				return;
			}
		}
		self.segments.push_back(segment);
	}

	/// Moves exactly `byte_count` bytes from the head of this buffer to the
	/// tail of `sink`, preferring pointer moves of whole segments. Splits a
	/// head segment only when it holds more than is being moved, and copies
	/// only when that shrinks the combined segment count.
	pub(crate) fn transfer_to(&mut self, sink: &mut Buffer, byte_count: usize) -> Result {
		self.require(byte_count)?;

		let mut remaining = byte_count;
		while remaining > 0 {
			let head_len = match self.segments.front() {
				Some(head) => head.len(),
				None => break,
			};

			if remaining < head_len {
				// Copy into the sink's tail if everything fits there;
				// otherwise split the head and move the prefix whole.
				let tail_fits = sink.segments.back().map_or(false, |tail| {
					tail.is_writable() && remaining + tail.limit() - tail.pos() <= SIZE
				});

				if tail_fits {
					let head = self.segments.front_mut()
						.expect("head existence checked above");
					let tail = sink.segments.back_mut()
						.expect("tail existence checked above");
					head.write_to(tail, remaining);
					self.size -= remaining;
					sink.size += remaining;
					self.trim_head();
					return Ok(());
				}

				let head = self.segments.front_mut()
					.expect("head existence checked above");
				let prefix = if remaining >= SHARE_MINIMUM {
					head.split(remaining)
				} else {
					let mut copy = pool::take();
					copy.push_slice(&head.data()[..remaining]);
					head.consume(remaining);
					copy
				};
				self.segments.push_front(prefix);
				continue;
			}

			let head = self.segments.pop_front()
				.expect("head existence checked above");
			let moved = head.len();
			self.size -= moved;
			sink.push_segment(head);
			sink.size += moved;
			remaining -= moved;
		}
		Ok(())
	}

	/// Recycles the head segment once it is fully consumed.
	pub(crate) fn trim_head(&mut self) {
		if self.segments.front().is_some_and(Segment::is_empty) {
			if let Some(seg) = self.segments.pop_front() {
				pool::recycle(seg);
			}
		}
	}

	pub(crate) fn segments(&self) -> impl Iterator<Item = &Segment> {
		self.segments.iter()
	}

	/// Calls `f` for each contiguous run of bytes in `[from, to)`, without
	/// consuming anything.
	pub(crate) fn for_each_chunk_in(&self, from: usize, to: usize, mut f: impl FnMut(&[u8])) {
		let to = min(to, self.size);
		let mut offset = 0;
		for seg in &self.segments {
			let len = seg.len();
			if offset + len > from && offset < to {
				let begin = from.saturating_sub(offset);
				let end = min(len, to - offset);
				f(&seg.data()[begin..end]);
			}
			offset += len;
			if offset >= to { break }
		}
	}

	pub(crate) fn segment_count(&self) -> usize {
		self.segments.len()
	}
}

impl Drop for Buffer {
	fn drop(&mut self) {
		self.clear();
	}
}

impl PartialEq for Buffer {
	fn eq(&self, other: &Self) -> bool {
		if self.size != other.size {
			return false;
		}
		let lhs = self.segments.iter().flat_map(|seg| seg.data());
		let rhs = other.segments.iter().flat_map(|seg| seg.data());
		lhs.eq(rhs)
	}
}

impl Eq for Buffer {}

impl Debug for Buffer {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		const PREVIEW: usize = 64;
		write!(f, "Buffer[size={}", self.size)?;
		if self.size > 0 {
			write!(f, " hex=")?;
			let mut shown = 0;
			'outer: for seg in &self.segments {
				for byte in seg.data() {
					if shown == PREVIEW {
						write!(f, "\u{2026}")?;
						break 'outer;
					}
					write!(f, "{byte:02x}")?;
					shown += 1;
				}
			}
		}
		write!(f, "]")
	}
}

impl From<&[u8]> for Buffer {
	fn from(value: &[u8]) -> Self {
		let mut buffer = Buffer::new();
		buffer.write_slice(value);
		buffer
	}
}

impl From<&str> for Buffer {
	fn from(value: &str) -> Self {
		value.as_bytes().into()
	}
}

#[cfg(test)]
mod test {
	use pretty_assertions::assert_eq;
	use quickcheck_macros::quickcheck;
	use crate::segment::SIZE;
	use super::Buffer;

	#[test]
	fn skip_consumes_and_fails_past_end() {
		let mut buf = Buffer::from("Hello, World!");
		buf.skip(7).unwrap();
		assert_eq!(buf.read_utf8_all().unwrap(), "World!");
		assert!(buf.skip(1).unwrap_err().is_eof());
	}

	#[test]
	fn get_and_index_of() {
		let mut buf = Buffer::new();
		buf.write_slice(&[1; SIZE]);
		buf.write_slice(b"needle");
		assert_eq!(buf.get(SIZE), Some(b'n'));
		assert_eq!(buf.index_of(b'd', 0, buf.size()), Some(SIZE + 3));
		assert_eq!(buf.index_of(b'd', SIZE + 4, buf.size()), None);
		assert_eq!(buf.index_of(7, 0, buf.size()), None);
	}

	#[quickcheck]
	fn index_of_is_least_match(data: Vec<u8>, byte: u8, lo: usize, hi: usize) -> bool {
		let buf = Buffer::from(&data[..]);
		let (lo, hi) = (lo.min(data.len()), hi.min(data.len()));
		let expect = data.get(lo..hi)
			.and_then(|window| window.iter().position(|&b| b == byte).map(|i| i + lo));
		buf.index_of(byte, lo, hi) == expect
	}

	#[test]
	fn index_of_bytes_spans_segments() {
		use crate::ByteString;

		let mut buf = Buffer::new();
		buf.write_slice(&[b'x'; SIZE - 3]);
		buf.write_slice(b"needle in a haystack");

		let needle = ByteString::encode_utf8("needle");
		assert_eq!(buf.index_of_bytes(&needle, 0), Some(SIZE - 3));
		assert_eq!(buf.index_of_bytes(&needle, SIZE), None);
		assert_eq!(buf.index_of_bytes(&ByteString::encode_utf8("nee dle"), 0), None);
		assert!(buf.range_equals(SIZE - 3, &needle));
	}

	#[quickcheck]
	fn typed_writes_read_back(a: u8, b: u16, c: u32, d: i64, tail: Vec<u8>) -> bool {
		let mut buf = Buffer::new();
		buf.write_u8(a);
		buf.write_u16(b);
		buf.write_u32_le(c);
		buf.write_i64(d);
		buf.write_slice(&tail);

		buf.read_u8().unwrap() == a
			&& buf.read_u16().unwrap() == b
			&& buf.read_u32_le().unwrap() == c
			&& buf.read_i64().unwrap() == d
			&& buf.read_slice_to_end() == tail
			&& buf.is_empty()
	}

	#[test]
	fn whole_segment_moves_by_pointer() {
		let mut src = Buffer::new();
		src.write_slice(&[b'a'; SIZE * 3]);
		assert_eq!(src.segment_count(), 3);

		let mut dst = Buffer::new();
		src.transfer_to(&mut dst, SIZE).unwrap();

		assert_eq!(dst.size(), SIZE);
		assert_eq!(src.size(), SIZE * 2);
		assert_eq!(dst.segment_count(), 1);
		assert_eq!(src.segment_count(), 2);
	}

	#[test]
	fn transfer_compacts_small_pieces() {
		let mut src = Buffer::from("hello ");
		let mut dst = Buffer::from("world");
		src.transfer_to(&mut dst, 6).unwrap();
		assert_eq!(dst.segment_count(), 1);
		assert_eq!(dst.read_utf8_all().unwrap(), "worldhello ");
	}

	#[quickcheck]
	fn transfer_preserves_order_and_sizes(data: Vec<u8>, n: usize) -> bool {
		let mut src = Buffer::from(&data[..]);
		let n = n.min(data.len());
		let mut dst = Buffer::new();
		src.transfer_to(&mut dst, n).unwrap();

		let mut moved = vec![0; n];
		dst.read_slice_exact(&mut moved).unwrap();
		let mut rest = vec![0; data.len() - n];
		src.read_slice_exact(&mut rest).unwrap();
		moved == data[..n] && rest == data[n..]
	}

	#[test]
	fn copy_to_leaves_source_intact() {
		let mut src = Buffer::from("Hello, World!");
		let mut out = Buffer::new();
		src.copy_to(&mut out, 7, 5).unwrap();
		assert_eq!(out.read_utf8_all().unwrap(), "World");
		assert_eq!(src.size(), 13);
		assert_eq!(src.read_utf8_all().unwrap(), "Hello, World!");
	}

	#[test]
	fn copy_is_independent() {
		let mut original = Buffer::from("shared bytes");
		let mut copy = original.copy();
		copy.write_slice(b" plus more");
		assert_eq!(original.read_utf8_all().unwrap(), "shared bytes");
		assert_eq!(copy.read_utf8_all().unwrap(), "shared bytes plus more");
	}

	#[test]
	fn snapshot_survives_mutation() {
		let mut buf = Buffer::from("before");
		let snapshot = buf.snapshot();
		buf.skip(6).unwrap();
		buf.write_slice(b"after");
		assert_eq!(snapshot.to_vec(), b"before");
	}

	#[test]
	fn equality_ignores_segmentation() {
		let mut split = Buffer::new();
		split.write_slice(&[9; SIZE]);
		split.write_slice(b"tail");
		split.skip(SIZE - 2).unwrap();

		let mut flat = Buffer::new();
		flat.write_slice(&[9, 9]);
		flat.write_slice(b"tail");
		assert_eq!(split, flat);
	}
}
