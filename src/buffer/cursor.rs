// SPDX-License-Identifier: Apache-2.0

use std::cmp::min;
use crate::{Error, Result};
use crate::segment::SIZE;
use super::Buffer;

/// A random-access window into a buffer's raw segment memory.
///
/// The cursor borrows the buffer mutably for its whole lifetime, so no other
/// handle can mutate the buffer while a cursor is live; dropping the cursor
/// releases the borrow. [`seek`](Self::seek) positions the cursor and exposes
/// the readable bytes of the containing segment through
/// [`data`](Self::data); [`next`](Self::next) hops to the following segment.
///
/// Cursors come in two modes. A read-only cursor never copies. A read-write
/// cursor obtained through [`Buffer::read_write_cursor`] forks any shared
/// segment it lands on, so [`data_mut`](Self::data_mut) always refers to
/// private memory, and additionally allows growing and shrinking the buffer
/// in place through [`expand`](Self::expand) and [`resize`](Self::resize).
pub struct BufferCursor<'b> {
	buffer: &'b mut Buffer,
	readwrite: bool,
	/// Index of the segment containing the window, with the logical offset
	/// of its first readable byte.
	segment: Option<(usize, usize)>,
	offset: usize,
	start: usize,
	end: usize,
}

impl Buffer {
	/// A read-only cursor over the buffered bytes. Always safe, even when
	/// segments are shared with snapshots.
	pub fn read_cursor(&mut self) -> BufferCursor<'_> {
		BufferCursor::new(self, false)
	}

	/// A read-write cursor. Shared segments are copied as the cursor touches
	/// them, so mutation never leaks into snapshots.
	pub fn read_write_cursor(&mut self) -> BufferCursor<'_> {
		BufferCursor::new(self, true)
	}
}

impl<'b> BufferCursor<'b> {
	fn new(buffer: &'b mut Buffer, readwrite: bool) -> Self {
		Self {
			buffer,
			readwrite,
			segment: None,
			offset: 0,
			start: 0,
			end: 0,
		}
	}

	/// The logical position of the window start.
	pub fn offset(&self) -> usize { self.offset }
	/// The logical offset of the first byte visible through
	/// [`data`](Self::data).
	pub fn start(&self) -> usize { self.start }
	/// The logical offset one past the last visible byte.
	pub fn end(&self) -> usize { self.end }

	/// The readable bytes of the current segment, empty before the first
	/// seek and at end of buffer.
	pub fn data(&self) -> &[u8] {
		match self.segment {
			Some((index, _)) => self.buffer.segments[index].data(),
			None => &[],
		}
	}

	/// Mutable access to the current segment's bytes. Read-write cursors
	/// only.
	pub fn data_mut(&mut self) -> Result<&mut [u8]> {
		if !self.readwrite {
			return Err(Error::illegal_state("cursor is read-only"));
		}
		match self.segment {
			Some((index, _)) => Ok(self.buffer.segments[index].data_mut()),
			None => Err(Error::illegal_state("cursor is not positioned on a segment")),
		}
	}

	/// Positions the cursor at `offset`, resolving the containing segment.
	/// Returns the number of readable bytes from `offset` to the segment
	/// end, which is zero exactly when `offset` equals the buffer size.
	pub fn seek(&mut self, offset: usize) -> Result<usize> {
		if offset > self.buffer.size {
			return Err(Error::invalid_argument(format!(
				"offset {offset} > size {}", self.buffer.size,
			)));
		}
		if offset == self.buffer.size {
			self.segment = None;
			self.offset = offset;
			self.start = offset;
			self.end = offset;
			return Ok(0);
		}

		// Resume the walk from the current segment when seeking forward,
		// otherwise restart from the head.
		let (mut index, mut seg_start) = match self.segment {
			Some((index, seg_start)) if offset >= seg_start => (index, seg_start),
			_ => (0, 0),
		};
		loop {
			let len = self.buffer.segments[index].len();
			if offset < seg_start + len {
				break;
			}
			seg_start += len;
			index += 1;
		}

		if self.readwrite {
			self.buffer.segments[index].fork();
		}
		let len = self.buffer.segments[index].len();
		self.segment = Some((index, seg_start));
		self.offset = offset;
		self.start = seg_start;
		self.end = seg_start + len;
		Ok(self.end - offset)
	}

	/// Advances to the next segment, returning its readable byte count, or
	/// `None` once the end of the buffer is reached.
	pub fn next(&mut self) -> Result<Option<usize>> {
		let target = self.end;
		if target >= self.buffer.size {
			self.seek(self.buffer.size)?;
			return Ok(None);
		}
		self.seek(target).map(Some)
	}

	/// Appends writable capacity of at least `min_byte_count` bytes and
	/// positions the cursor at the start of the appended region. The added
	/// bytes become part of the buffer immediately; their initial contents
	/// are unspecified. Returns the number of bytes added.
	pub fn expand(&mut self, min_byte_count: usize) -> Result<usize> {
		if !self.readwrite {
			return Err(Error::illegal_state("cursor is read-only"));
		}
		if min_byte_count == 0 || min_byte_count > SIZE {
			return Err(Error::invalid_argument(format!(
				"min_byte_count {min_byte_count} out of (0, {SIZE}]",
			)));
		}

		let old_size = self.buffer.size;
		let tail = self.buffer.writable_segment(min_byte_count);
		let added = tail.writable_len();
		tail.add(added);
		self.buffer.size += added;

		self.segment = None;
		self.seek(old_size)?;
		Ok(added)
	}

	/// Grows or truncates the buffer to exactly `new_size` bytes, then
	/// positions the cursor at the end. Grown bytes have unspecified
	/// contents; truncation recycles whole trailing segments.
	pub fn resize(&mut self, new_size: usize) -> Result {
		if !self.readwrite {
			return Err(Error::illegal_state("cursor is read-only"));
		}

		if new_size < self.buffer.size {
			let mut excess = self.buffer.size - new_size;
			while excess > 0 {
				let Some(tail) = self.buffer.segments.back_mut() else { break };
				let len = tail.len();
				if len <= excess {
					let seg = self.buffer.segments.pop_back()
						.expect("tail existence checked above");
					crate::pool::recycle(seg);
					excess -= len;
				} else {
					// Shrinking only narrows the window; no copy needed even
					// for shared segments.
					tail.truncate(len - excess);
					excess = 0;
				}
			}
			self.buffer.size = new_size;
		} else {
			while self.buffer.size < new_size {
				let missing = new_size - self.buffer.size;
				let tail = self.buffer.writable_segment(1);
				let added = min(tail.writable_len(), missing);
				tail.add(added);
				self.buffer.size += added;
			}
		}

		self.segment = None;
		self.seek(new_size)?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use pretty_assertions::assert_eq;
	use crate::Buffer;
	use crate::segment::SIZE;

	#[test]
	fn seek_walks_segments() {
		let mut buf = Buffer::new();
		buf.write_slice(&[b'a'; SIZE]);
		buf.write_slice(&[b'b'; SIZE]);

		let mut cursor = buf.read_cursor();
		let available = cursor.seek(10).unwrap();
		assert_eq!(available, SIZE - 10);
		assert_eq!(cursor.data()[10], b'a');

		let available = cursor.seek(SIZE + 1).unwrap();
		assert_eq!(available, SIZE - 1);
		assert_eq!(cursor.start(), SIZE);
		assert_eq!(cursor.data()[0], b'b');

		assert_eq!(cursor.seek(2 * SIZE).unwrap(), 0);
		assert_eq!(cursor.data(), &[] as &[u8]);
	}

	#[test]
	fn next_visits_every_segment() {
		let mut buf = Buffer::new();
		buf.write_slice(&[1; SIZE]);
		buf.write_slice(&[2; 100]);

		let mut cursor = buf.read_cursor();
		cursor.seek(0).unwrap();
		assert_eq!(cursor.data().len(), SIZE);
		assert_eq!(cursor.next().unwrap(), Some(100));
		assert_eq!(cursor.data().len(), 100);
		assert_eq!(cursor.next().unwrap(), None);
	}

	#[test]
	fn read_only_cursor_rejects_mutation() {
		let mut buf = Buffer::from("fixed");
		let mut cursor = buf.read_cursor();
		cursor.seek(0).unwrap();
		assert!(cursor.data_mut().is_err());
		assert!(cursor.expand(1).is_err());
	}

	#[test]
	fn write_cursor_forks_shared_segments() {
		let mut buf = Buffer::from("mutate me");
		let snapshot = buf.snapshot();

		{
			let mut cursor = buf.read_write_cursor();
			cursor.seek(0).unwrap();
			cursor.data_mut().unwrap()[0] = b'M';
		}
		assert_eq!(buf.read_utf8_all().unwrap(), "Mutate me");
		// The snapshot still sees the original bytes.
		assert_eq!(snapshot.to_vec(), b"mutate me");
	}

	#[test]
	fn expand_appends_capacity() {
		let mut buf = Buffer::from("abc");
		{
			let mut cursor = buf.read_write_cursor();
			let added = cursor.expand(16).unwrap();
			assert!(added >= 16);
			assert_eq!(cursor.offset(), 3);
			let at = cursor.offset() - cursor.start();
			cursor.data_mut().unwrap()[at] = b'!';
		}
		assert!(buf.size() >= 19);
		assert_eq!(buf.get(3), Some(b'!'));
	}

	#[test]
	fn resize_truncates_and_grows() {
		let mut buf = Buffer::new();
		buf.write_slice(&[7; SIZE + 100]);
		{
			let mut cursor = buf.read_write_cursor();
			cursor.resize(10).unwrap();
		}
		assert_eq!(buf.size(), 10);
		assert_eq!(buf.read_slice_to_end(), [7; 10]);

		{
			let mut cursor = buf.read_write_cursor();
			cursor.resize(SIZE * 2).unwrap();
		}
		assert_eq!(buf.size(), SIZE * 2);
	}
}
