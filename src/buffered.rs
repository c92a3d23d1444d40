// SPDX-License-Identifier: Apache-2.0

//! Buffer-backed wrappers giving any [`Source`] or [`Sink`] the typed
//! read/write surface of [`Buffer`] itself.

use std::cmp::min;
use crate::{combine, Buffer, Error, Result};
use crate::byte_str::ByteString;
use crate::options::Options;
use crate::segment::SIZE;
use crate::streams::{Sink, Source};
use crate::timeout::Timeout;

macro_rules! forward_int_reads {
	($($name:ident -> $ty:ident,)+) => {$(
		#[doc = concat!(
			" Reads one [`", stringify!($ty), "`], pulling from the",
			" underlying source as needed.",
		)]
		pub fn $name(&mut self) -> Result<$ty> {
			self.require(std::mem::size_of::<$ty>())?;
			self.buffer.$name()
		}
	)+};
}

macro_rules! forward_int_writes {
	($($name:ident -> $ty:ident,)+) => {$(
		#[doc = concat!(" Writes one [`", stringify!($ty), "`].")]
		pub fn $name(&mut self, value: $ty) -> Result {
			self.check_open()?;
			self.buffer.$name(value);
			self.emit_complete_segments()
		}
	)+};
}

/// A [`Source`] wrapper that accumulates pulled bytes in a read buffer and
/// serves typed reads from it.
pub struct BufferedSource<S: Source> {
	buffer: Buffer,
	source: S,
	closed: bool,
}

impl<S: Source> BufferedSource<S> {
	pub fn new(source: S) -> Self {
		Self {
			buffer: Buffer::new(),
			source,
			closed: false,
		}
	}

	/// The read buffer. Bytes taken from here are gone; bytes inspected
	/// without consuming remain for the next read.
	pub fn buffer(&mut self) -> &mut Buffer {
		&mut self.buffer
	}

	fn check_open(&self) -> Result {
		if self.closed {
			Err(Error::closed())
		} else {
			Ok(())
		}
	}

	/// Pulls from the delegate until `byte_count` bytes are buffered,
	/// returning whether that many are now available. Reads whole segments
	/// at a time, so the buffer may end up holding more.
	pub fn request(&mut self, byte_count: usize) -> Result<bool> {
		self.check_open()?;
		while self.buffer.size() < byte_count {
			// Round the shortfall up to a whole segment.
			let shortfall = byte_count - self.buffer.size();
			let pull = shortfall.div_ceil(SIZE) * SIZE;
			if self.source.read(&mut self.buffer, pull)? == 0 {
				return Ok(false);
			}
		}
		Ok(true)
	}

	/// Like [`request`](Self::request), but fails with
	/// [`PrematureEof`](crate::ErrorKind::PrematureEof) on a shortfall.
	pub fn require(&mut self, byte_count: usize) -> Result {
		if self.request(byte_count)? {
			Ok(())
		} else {
			Err(Error::premature_eof())
		}
	}

	/// `true` once the buffer is empty and the delegate has no more bytes.
	pub fn exhausted(&mut self) -> Result<bool> {
		Ok(!self.request(1)?)
	}

	/// Reads one byte.
	pub fn read_u8(&mut self) -> Result<u8> {
		self.require(1)?;
		self.buffer.read_u8()
	}

	/// Reads one byte.
	pub fn read_i8(&mut self) -> Result<i8> {
		self.require(1)?;
		self.buffer.read_i8()
	}

	forward_int_reads! {
		read_u16 -> u16,
		read_u16_le -> u16,
		read_i16 -> i16,
		read_i16_le -> i16,
		read_u32 -> u32,
		read_u32_le -> u32,
		read_i32 -> i32,
		read_i32_le -> i32,
		read_u64 -> u64,
		read_u64_le -> u64,
		read_i64 -> i64,
		read_i64_le -> i64,
	}

	/// Discards `byte_count` bytes, pulling as needed.
	pub fn skip(&mut self, byte_count: usize) -> Result {
		let mut remaining = byte_count;
		while remaining > 0 {
			if self.buffer.is_empty() && !self.request(1)? {
				return Err(Error::premature_eof());
			}
			let n = min(remaining, self.buffer.size());
			self.buffer.skip(n)?;
			remaining -= n;
		}
		Ok(())
	}

	/// Reads up to `dst.len()` bytes, returning the count read; zero only at
	/// end-of-stream.
	pub fn read_slice(&mut self, dst: &mut [u8]) -> Result<usize> {
		if dst.is_empty() || !self.request(1)? {
			return Ok(0);
		}
		Ok(self.buffer.read_slice(dst))
	}

	/// Fills `dst` exactly or fails with
	/// [`PrematureEof`](crate::ErrorKind::PrematureEof).
	pub fn read_slice_exact(&mut self, dst: &mut [u8]) -> Result {
		self.require(dst.len())?;
		self.buffer.read_slice_exact(dst)
	}

	/// Reads `byte_count` bytes into an immutable [`ByteString`].
	pub fn read_byte_string(&mut self, byte_count: usize) -> Result<ByteString> {
		self.require(byte_count)?;
		self.buffer.read_byte_string(byte_count)
	}

	/// Decodes exactly `byte_count` bytes as UTF-8 with replacement.
	pub fn read_utf8(&mut self, byte_count: usize) -> Result<String> {
		self.require(byte_count)?;
		self.buffer.read_utf8(byte_count)
	}

	/// Reads until end-of-stream, decoding everything as UTF-8 with
	/// replacement.
	pub fn read_utf8_all(&mut self) -> Result<String> {
		self.check_open()?;
		while self.source.read(&mut self.buffer, SIZE)? > 0 {}
		self.buffer.read_utf8_all()
	}

	/// Decodes one code point, pulling however many bytes its lead byte
	/// announces.
	pub fn read_utf8_code_point(&mut self) -> Result<char> {
		self.require(1)?;
		let b0 = self.buffer.get(0)
			.ok_or_else(Error::premature_eof)?;
		let byte_count = match b0 {
			_ if b0 & 0x80 == 0x00 => 1,
			_ if b0 & 0xE0 == 0xC0 => 2,
			_ if b0 & 0xF0 == 0xE0 => 3,
			_ if b0 & 0xF8 == 0xF0 => 4,
			_ => 1,
		};
		self.request(byte_count)?;
		self.buffer.read_utf8_code_point()
	}

	/// Reads through the next line terminator, returning the line without
	/// it; the remaining bytes at end-of-stream; or `None` when exhausted.
	pub fn read_utf8_line(&mut self) -> Result<Option<String>> {
		match self.find_line_terminator(usize::MAX)? {
			Some(newline) => self.buffer.read_utf8_line_at(newline).map(Some),
			None if !self.buffer.is_empty() => self.buffer.read_utf8_all().map(Some),
			None => Ok(None),
		}
	}

	/// Like [`read_utf8_line`](Self::read_utf8_line), but fails with
	/// [`Eof`](crate::ErrorKind::Eof) when the stream ends without a
	/// terminator and with [`PrematureEof`](crate::ErrorKind::PrematureEof)
	/// when none appears within `limit` bytes.
	pub fn read_utf8_line_strict(&mut self, limit: usize) -> Result<String> {
		match self.find_line_terminator(limit.saturating_add(1))? {
			Some(newline) => self.buffer.read_utf8_line_at(newline),
			None if self.buffer.size() > limit => Err(Error::premature_eof()),
			None => Err(Error::eof()),
		}
	}

	fn find_line_terminator(&mut self, scan_limit: usize) -> Result<Option<usize>> {
		self.index_of_within(b'\n', 0, scan_limit)
	}

	/// The index of the first `byte` in `[from_index, to_index)`, pulling
	/// from the delegate until the byte appears, the bound is reached, or
	/// the stream ends.
	pub fn index_of_within(
		&mut self,
		byte: u8,
		from_index: usize,
		to_index: usize,
	) -> Result<Option<usize>> {
		self.check_open()?;
		let mut searched_to = from_index;
		loop {
			let window_end = min(to_index, self.buffer.size());
			if let Some(found) = self.buffer.index_of(byte, searched_to, window_end) {
				return Ok(Some(found));
			}
			searched_to = window_end;
			if self.buffer.size() >= to_index
				|| !self.request(self.buffer.size() + 1)? {
				return Ok(None);
			}
		}
	}

	/// The index of the first `byte` at or past `from_index`, pulling until
	/// the stream ends.
	pub fn index_of(&mut self, byte: u8, from_index: usize) -> Result<Option<usize>> {
		self.index_of_within(byte, from_index, usize::MAX)
	}

	/// Matches the stream's prefix against `options`, consuming the matched
	/// alternative and returning its index. Consumes nothing on `None`.
	pub fn select(&mut self, options: &Options) -> Result<Option<usize>> {
		self.check_open()?;
		options.select_from(self)
	}

	/// Streams everything left into `sink`, returning the byte count.
	pub fn read_all(&mut self, sink: &mut impl Sink) -> Result<usize> {
		self.check_open()?;
		let mut total = 0;
		loop {
			if self.buffer.is_empty() && self.source.read(&mut self.buffer, SIZE)? == 0 {
				return Ok(total);
			}
			let count = self.buffer.size();
			sink.write(&mut self.buffer, count)?;
			total += count;
		}
	}

	/// Iterates over the remaining lines, ending cleanly at end-of-stream.
	pub fn lines(&mut self) -> Lines<'_, S> {
		Lines { source: self }
	}

	/// A source that reads ahead without consuming this source's bytes.
	///
	/// The peek borrows this source mutably: it pulls through it into the
	/// shared read buffer but never advances its head, so when the peek is
	/// dropped, everything it saw is still unread here.
	pub fn peek(&mut self) -> BufferedSource<Peek<'_, S>> {
		BufferedSource::new(Peek { parent: self, offset: 0 })
	}

}

impl<S: Source> Source for BufferedSource<S> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		self.check_open()?;
		if byte_count == 0 {
			return Ok(0);
		}
		if self.buffer.is_empty() && self.source.read(&mut self.buffer, SIZE)? == 0 {
			return Ok(0);
		}
		let n = min(byte_count, self.buffer.size());
		self.buffer.transfer_to(sink, n)?;
		Ok(n)
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.source.timeout_mut()
	}

	fn close_source(&mut self) -> Result {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.buffer.clear();
		self.source.close_source()
	}
}

impl<S: Source> Drop for BufferedSource<S> {
	fn drop(&mut self) {
		let _ = self.close_source();
	}
}

/// An iterator over a source's lines, created by
/// [`BufferedSource::lines`].
pub struct Lines<'a, S: Source> {
	source: &'a mut BufferedSource<S>,
}

impl<S: Source> Iterator for Lines<'_, S> {
	type Item = Result<String>;

	fn next(&mut self) -> Option<Self::Item> {
		self.source.read_utf8_line().transpose()
	}
}

/// A read-ahead view created by [`BufferedSource::peek`]. Reading from it
/// pulls through the parent without consuming the parent's bytes.
pub struct Peek<'a, S: Source> {
	parent: &'a mut BufferedSource<S>,
	offset: usize,
}

impl<S: Source> Source for Peek<'_, S> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		if byte_count == 0 {
			return Ok(0);
		}
		if !self.parent.request(self.offset + 1)? {
			return Ok(0);
		}
		let available = self.parent.buffer.size() - self.offset;
		let n = min(byte_count, available);
		self.parent.buffer.copy_to(sink, self.offset, n)?;
		self.offset += n;
		Ok(n)
	}
}

/// A [`Sink`] wrapper that gathers typed writes in a buffer and emits
/// completed segments to the delegate eagerly.
pub struct BufferedSink<S: Sink> {
	buffer: Buffer,
	sink: S,
	closed: bool,
}

impl<S: Sink> BufferedSink<S> {
	pub fn new(sink: S) -> Self {
		Self {
			buffer: Buffer::new(),
			sink,
			closed: false,
		}
	}

	/// The write buffer holding bytes not yet emitted to the delegate.
	pub fn buffer(&mut self) -> &mut Buffer {
		&mut self.buffer
	}

	fn check_open(&self) -> Result {
		if self.closed {
			Err(Error::closed())
		} else {
			Ok(())
		}
	}

	/// Writes every filled segment to the delegate, keeping only a partial
	/// tail buffered. Called after every typed write, this bounds the memory
	/// a long streaming write holds.
	pub fn emit_complete_segments(&mut self) -> Result {
		let count = self.buffer.complete_segment_byte_count();
		if count > 0 {
			self.sink.write(&mut self.buffer, count)?;
		}
		Ok(())
	}

	/// Writes everything buffered to the delegate, without flushing it.
	pub fn emit(&mut self) -> Result {
		let count = self.buffer.size();
		if count > 0 {
			self.sink.write(&mut self.buffer, count)?;
		}
		Ok(())
	}

	/// Writes one byte.
	pub fn write_u8(&mut self, value: u8) -> Result {
		self.check_open()?;
		self.buffer.write_u8(value);
		self.emit_complete_segments()
	}

	/// Writes one byte.
	pub fn write_i8(&mut self, value: i8) -> Result {
		self.write_u8(value as u8)
	}

	forward_int_writes! {
		write_u16 -> u16,
		write_u16_le -> u16,
		write_i16 -> i16,
		write_i16_le -> i16,
		write_u32 -> u32,
		write_u32_le -> u32,
		write_i32 -> i32,
		write_i32_le -> i32,
		write_u64 -> u64,
		write_u64_le -> u64,
		write_i64 -> i64,
		write_i64_le -> i64,
	}

	/// Writes all of `src`.
	pub fn write_slice(&mut self, src: &[u8]) -> Result {
		self.check_open()?;
		self.buffer.write_slice(src);
		self.emit_complete_segments()
	}

	/// Writes `string` as UTF-8.
	pub fn write_utf8(&mut self, string: &str) -> Result {
		self.write_slice(string.as_bytes())
	}

	/// Encodes one code point as UTF-8.
	pub fn write_utf8_code_point(&mut self, code_point: u32) -> Result {
		self.check_open()?;
		self.buffer.write_utf8_code_point(code_point);
		self.emit_complete_segments()
	}

	/// Writes all bytes of `bytes`.
	pub fn write_byte_string(&mut self, bytes: &ByteString) -> Result {
		self.check_open()?;
		self.buffer.write_byte_string(bytes);
		self.emit_complete_segments()
	}

	/// Writes the signed decimal form of `value`.
	pub fn write_decimal_i64(&mut self, value: i64) -> Result {
		self.check_open()?;
		self.buffer.write_decimal_i64(value);
		self.emit_complete_segments()
	}

	/// Writes the lowercase hex form of `value`.
	pub fn write_hex_u64(&mut self, value: u64) -> Result {
		self.check_open()?;
		self.buffer.write_hex_u64(value);
		self.emit_complete_segments()
	}

	/// Reads `source` to exhaustion into this sink, returning the byte
	/// count.
	pub fn write_all(&mut self, source: &mut impl Source) -> Result<usize> {
		self.check_open()?;
		let mut total = 0;
		loop {
			match source.read(&mut self.buffer, SIZE)? {
				0 => break,
				n => {
					total += n;
					self.emit_complete_segments()?;
				}
			}
		}
		Ok(total)
	}
}

impl<S: Sink> Sink for BufferedSink<S> {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		self.check_open()?;
		source.transfer_to(&mut self.buffer, byte_count)?;
		self.emit_complete_segments()
	}

	/// Emits everything buffered, then flushes the delegate.
	fn flush(&mut self) -> Result {
		self.check_open()?;
		self.emit()?;
		self.sink.flush()
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.sink.timeout_mut()
	}

	/// Emits buffered bytes, then closes the delegate. When both steps fail
	/// the emit failure is primary and the close failure is suppressed.
	fn close_sink(&mut self) -> Result {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		let emitted = {
			let count = self.buffer.size();
			if count > 0 {
				self.sink.write(&mut self.buffer, count)
			} else {
				Ok(())
			}
		};
		let closed = self.sink.close_sink();
		self.buffer.clear();
		combine(emitted, closed)
	}
}

impl<S: Sink> Drop for BufferedSink<S> {
	fn drop(&mut self) {
		let _ = self.close_sink();
	}
}

#[cfg(test)]
mod test {
	use pretty_assertions::assert_eq;
	use crate::{Buffer, Error, ErrorKind, Result};
	use crate::segment::SIZE;
	use crate::streams::{Sink, Source, SourceExt, SinkExt};

	/// A source that yields its data in deliberately tiny reads.
	struct Trickle(Vec<u8>, usize);

	impl Source for Trickle {
		fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
			let Self(data, chunk) = self;
			if data.is_empty() {
				return Ok(0);
			}
			let n = byte_count.min(*chunk).min(data.len());
			sink.write_slice(&data[..n]);
			data.drain(..n);
			Ok(n)
		}
	}

	#[test]
	fn request_pulls_across_tiny_reads() {
		let mut source = Trickle(b"0123456789".to_vec(), 3).buffered();
		assert!(source.request(7).unwrap());
		assert!(source.request(10).unwrap());
		assert!(!source.request(11).unwrap());
		assert_eq!(source.read_utf8(10).unwrap(), "0123456789");
		assert!(source.exhausted().unwrap());
	}

	#[test]
	fn typed_reads_pull_on_demand() {
		let mut source = Trickle(vec![1, 2, 3, 4, 5, 6, 7, 8], 1).buffered();
		assert_eq!(source.read_u64_le().unwrap(), 0x0807_0605_0403_0201);
		assert!(source.read_u8().unwrap_err().is_eof());
	}

	#[test]
	fn lines_from_a_stream() {
		let mut source = Trickle(b"foo\nbar\r\nbaz".to_vec(), 2).buffered();
		assert_eq!(source.read_utf8_line().unwrap().as_deref(), Some("foo"));
		assert_eq!(source.read_utf8_line().unwrap().as_deref(), Some("bar"));
		assert_eq!(source.read_utf8_line().unwrap().as_deref(), Some("baz"));
		assert_eq!(source.read_utf8_line().unwrap(), None);
	}

	#[test]
	fn lines_iterator_ends_cleanly() {
		let mut source = Trickle(b"one\ntwo\nthree".to_vec(), 5).buffered();
		let lines: Vec<String> = source.lines().map(Result::unwrap).collect();
		assert_eq!(lines, ["one", "two", "three"]);
	}

	#[test]
	fn strict_line_respects_limit() {
		let mut source = Trickle(b"abcdefgh\n".to_vec(), 2).buffered();
		let err = source.read_utf8_line_strict(3).unwrap_err();
		assert!(matches!(err.kind(), ErrorKind::PrematureEof));
	}

	#[test]
	fn index_of_pulls_until_found() {
		let mut data = vec![b'x'; SIZE * 2];
		data.push(b'!');
		let mut source = Trickle(data, 700).buffered();
		assert_eq!(source.index_of(b'!', 0).unwrap(), Some(SIZE * 2));
		assert_eq!(source.index_of(b'?', 0).unwrap(), None);
	}

	#[test]
	fn peek_does_not_consume() {
		let mut source = Trickle(b"peek at me".to_vec(), 4).buffered();
		{
			let mut peek = source.peek();
			assert_eq!(peek.read_utf8(4).unwrap(), "peek");
			assert_eq!(peek.read_utf8_all().unwrap(), " at me");
		}
		assert_eq!(source.read_utf8_all().unwrap(), "peek at me");
	}

	#[test]
	fn closed_source_rejects_reads() {
		let mut source = Trickle(b"data".to_vec(), 4).buffered();
		source.close_source().unwrap();
		source.close_source().unwrap();
		assert!(source.read_u8().unwrap_err().is_closed());
		let mut sink = Buffer::new();
		assert!(source.read(&mut sink, 1).unwrap_err().is_closed());
	}

	/// A sink that records write sizes and can be told to fail.
	#[derive(Default)]
	struct Recording {
		written: Vec<u8>,
		writes: Vec<usize>,
		flushes: usize,
		fail_close: bool,
		closes: usize,
	}

	impl Sink for &mut Recording {
		fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
			source.require(byte_count)?;
			let mut taken = vec![0; byte_count];
			source.read_slice_exact(&mut taken)?;
			self.written.extend_from_slice(&taken);
			self.writes.push(byte_count);
			Ok(())
		}

		fn flush(&mut self) -> Result {
			self.flushes += 1;
			Ok(())
		}

		fn close_sink(&mut self) -> Result {
			self.closes += 1;
			if self.fail_close {
				Err(Error::io("close failed"))
			} else {
				Ok(())
			}
		}
	}

	#[test]
	fn complete_segments_emit_eagerly() {
		let mut recording = Recording::default();
		{
			let mut sink = (&mut recording).buffered();
			sink.write_slice(&[1; SIZE]).unwrap();
			sink.write_slice(&[2; 10]).unwrap();
			sink.flush().unwrap();
		}
		assert_eq!(recording.writes[0], SIZE);
		assert_eq!(recording.written.len(), SIZE + 10);
		assert_eq!(recording.flushes, 1);
	}

	#[test]
	fn partial_tail_stays_buffered_until_emit() {
		let mut recording = Recording::default();
		{
			let mut sink = (&mut recording).buffered();
			sink.write_utf8("small").unwrap();
			// Less than a segment: still buffered, not yet written through.
			assert_eq!(sink.buffer().size(), 5);
			sink.emit().unwrap();
			assert_eq!(sink.buffer().size(), 0);
		}
		assert_eq!(recording.written, b"small");
		assert_eq!(recording.flushes, 0);
	}

	#[test]
	fn close_combines_failures() {
		let mut recording = Recording { fail_close: true, ..Default::default() };
		{
			let mut sink = (&mut recording).buffered();
			sink.write_utf8("tail").unwrap();
			let err = sink.close_sink().unwrap_err();
			assert!(matches!(err.kind(), ErrorKind::Io(_)));
			// Emit succeeded, so the close failure is primary.
			assert!(err.suppressed().is_empty());
			// A second close is a no-op.
			sink.close_sink().unwrap();
		}
		assert_eq!(recording.written, b"tail");
		assert_eq!(recording.closes, 1);
	}
}
