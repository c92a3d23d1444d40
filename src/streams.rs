// SPDX-License-Identifier: Apache-2.0

//! Pull and push stream abstractions over the [`Buffer`].
//!
//! A [`Source`] produces bytes into a caller's buffer; a [`Sink`] consumes
//! bytes out of one. Concrete backends may block, honoring their attached
//! [`Timeout`]; buffers themselves never do. Streams close idempotently and
//! fail with [`Closed`](crate::ErrorKind::Closed) when used afterwards.

use std::cmp::min;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use crate::{Buffer, Error, Result};
use crate::buffered::{BufferedSink, BufferedSource};
use crate::segment::SIZE;
use crate::timeout::Timeout;

/// A producer of bytes.
pub trait Source {
	/// Moves at most `byte_count` bytes into `sink`, returning the number
	/// moved. `Ok(0)` signals end-of-stream; a positive request never
	/// otherwise returns zero. May block until at least one byte arrives.
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize>;

	/// The timeout governing this source's blocking reads, when it has one.
	fn timeout_mut(&mut self) -> Option<&mut Timeout> { None }

	/// Releases held resources. Idempotent; reads after closing fail with
	/// [`Closed`](crate::ErrorKind::Closed).
	fn close_source(&mut self) -> Result { Ok(()) }
}

/// A consumer of bytes.
pub trait Sink {
	/// Removes exactly `byte_count` bytes from `source` and writes them.
	/// Fails with [`PrematureEof`](crate::ErrorKind::PrematureEof) when
	/// `source` holds fewer. May block.
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result;

	/// Pushes buffered bytes toward their final destination.
	fn flush(&mut self) -> Result { Ok(()) }

	/// The timeout governing this sink's blocking writes, when it has one.
	fn timeout_mut(&mut self) -> Option<&mut Timeout> { None }

	/// Flushes, then releases held resources. Idempotent; writes after
	/// closing fail with [`Closed`](crate::ErrorKind::Closed).
	fn close_sink(&mut self) -> Result { self.flush() }
}

impl<S: Source + ?Sized> Source for Box<S> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		(**self).read(sink, byte_count)
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		(**self).timeout_mut()
	}

	fn close_source(&mut self) -> Result {
		(**self).close_source()
	}
}

impl<S: Sink + ?Sized> Sink for Box<S> {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		(**self).write(source, byte_count)
	}

	fn flush(&mut self) -> Result {
		(**self).flush()
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		(**self).timeout_mut()
	}

	fn close_sink(&mut self) -> Result {
		(**self).close_sink()
	}
}

/// Convenience operations available on every source.
pub trait SourceExt: Source + Sized {
	/// Wraps the source in a [`BufferedSource`], gaining the typed read
	/// surface.
	fn buffered(self) -> BufferedSource<Self> {
		BufferedSource::new(self)
	}

	/// Reads until end-of-stream into `sink`, returning the total byte
	/// count.
	fn read_to_end(&mut self, sink: &mut Buffer) -> Result<usize> {
		let mut total = 0;
		loop {
			match self.read(sink, SIZE)? {
				0 => return Ok(total),
				n => total += n,
			}
		}
	}

	/// Adapts the source to [`std::io::Read`].
	fn into_reader(self) -> SourceReader<Self> {
		SourceReader { source: self, buffer: Buffer::new() }
	}
}

impl<S: Source> SourceExt for S {}

/// Convenience operations available on every sink.
pub trait SinkExt: Sink + Sized {
	/// Wraps the sink in a [`BufferedSink`], gaining the typed write
	/// surface.
	fn buffered(self) -> BufferedSink<Self> {
		BufferedSink::new(self)
	}

	/// Drains `source` completely into this sink, returning the byte count.
	fn write_all_buffered(&mut self, source: &mut Buffer) -> Result<usize> {
		let count = source.size();
		self.write(source, count)?;
		Ok(count)
	}

	/// Reads `source` to exhaustion, writing everything read. Returns the
	/// total byte count.
	fn write_all_from(&mut self, source: &mut impl Source) -> Result<usize> {
		let mut scratch = Buffer::new();
		let mut total = 0;
		loop {
			match source.read(&mut scratch, SIZE)? {
				0 => break,
				n => {
					self.write(&mut scratch, n)?;
					total += n;
				}
			}
		}
		Ok(total)
	}

	/// Adapts the sink to [`std::io::Write`].
	fn into_writer(self) -> SinkWriter<Self> {
		SinkWriter { sink: self, buffer: Buffer::new() }
	}
}

impl<S: Sink> SinkExt for S {}

/// Reading a buffer moves bytes off its head without copying; the buffer is
/// its own source and never blocks.
impl Source for Buffer {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		let n = min(byte_count, self.size());
		self.transfer_to(sink, n)?;
		Ok(n)
	}
}

/// Writing to a buffer moves bytes onto its tail without copying.
impl Sink for Buffer {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		source.transfer_to(self, byte_count)
	}
}

/// A mutable borrow of a buffer reads like the buffer itself, so buffers can
/// be handed to adapters that take ownership of their delegate.
impl Source for &mut Buffer {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		let n = min(byte_count, self.size());
		self.transfer_to(sink, n)?;
		Ok(n)
	}
}

impl Sink for &mut Buffer {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		source.transfer_to(self, byte_count)
	}
}

impl Source for &[u8] {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		let n = min(byte_count, self.len());
		sink.write_slice(&self[..n]);
		*self = &self[n..];
		Ok(n)
	}
}

/// A sink that discards everything written to it.
#[derive(Copy, Clone, Debug, Default)]
pub struct BlackholeSink;

/// Returns a [`Sink`] that discards everything written to it.
pub fn blackhole() -> BlackholeSink { BlackholeSink }

impl Sink for BlackholeSink {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		source.skip(byte_count)
	}
}

/// A source that is always exhausted.
#[derive(Copy, Clone, Debug, Default)]
pub struct EmptySource;

/// Returns a [`Source`] that produces no bytes.
pub fn empty_source() -> EmptySource { EmptySource }

impl Source for EmptySource {
	fn read(&mut self, _sink: &mut Buffer, _byte_count: usize) -> Result<usize> {
		Ok(0)
	}
}

/// A transparent source wrapper. Embed one, or wrap and delegate, to
/// intercept single operations without restating the whole trait.
pub struct ForwardingSource<S: Source>(pub S);

impl<S: Source> Source for ForwardingSource<S> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		self.0.read(sink, byte_count)
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.0.timeout_mut()
	}

	fn close_source(&mut self) -> Result {
		self.0.close_source()
	}
}

/// A transparent sink wrapper, the push-side counterpart of
/// [`ForwardingSource`].
pub struct ForwardingSink<S: Sink>(pub S);

impl<S: Sink> Sink for ForwardingSink<S> {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		self.0.write(source, byte_count)
	}

	fn flush(&mut self) -> Result {
		self.0.flush()
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.0.timeout_mut()
	}

	fn close_sink(&mut self) -> Result {
		self.0.close_sink()
	}
}

/// A source over any [`std::io::Read`], with a [`Timeout`] consulted before
/// each underlying read call.
pub struct ReadSource<R: Read> {
	inner: R,
	timeout: Timeout,
}

impl<R: Read> ReadSource<R> {
	pub fn new(inner: R) -> Self {
		Self { inner, timeout: Timeout::new() }
	}

	pub fn into_inner(self) -> R { self.inner }
}

impl<R: Read> Source for ReadSource<R> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		if byte_count == 0 {
			return Ok(0);
		}
		self.timeout.throw_if_reached()?;

		let tail = sink.writable_segment(1);
		let n = min(byte_count, tail.writable_len());
		let read = self.inner.read(&mut tail.writable()[..n])?;
		tail.add(read);
		sink.grow(read);
		Ok(read)
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		Some(&mut self.timeout)
	}
}

/// A sink over any [`std::io::Write`], with a [`Timeout`] consulted before
/// each underlying write call.
pub struct WriteSink<W: Write> {
	inner: W,
	timeout: Timeout,
}

impl<W: Write> WriteSink<W> {
	pub fn new(inner: W) -> Self {
		Self { inner, timeout: Timeout::new() }
	}

	pub fn into_inner(self) -> W { self.inner }
}

impl<W: Write> Sink for WriteSink<W> {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		source.require(byte_count)?;
		let mut remaining = byte_count;
		while remaining > 0 {
			self.timeout.throw_if_reached()?;
			let written = match source.head_data() {
				Some(head) => self.inner.write(&head[..min(head.len(), remaining)])?,
				None => 0,
			};
			if written == 0 {
				return Err(Error::io("writer accepted no bytes"));
			}
			source.skip(written)?;
			remaining -= written;
		}
		Ok(())
	}

	fn flush(&mut self) -> Result {
		Ok(self.inner.flush()?)
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		Some(&mut self.timeout)
	}

	fn close_sink(&mut self) -> Result {
		self.flush()
	}
}

/// Adapts a [`Source`] to [`std::io::Read`].
pub struct SourceReader<S: Source> {
	source: S,
	buffer: Buffer,
}

impl<S: Source> Read for SourceReader<S> {
	fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
		if self.buffer.is_empty() {
			self.source.read(&mut self.buffer, buf.len().max(1))
				.map_err(std::io::Error::from)?;
		}
		Ok(self.buffer.read_slice(buf))
	}
}

/// Adapts a [`Sink`] to [`std::io::Write`].
pub struct SinkWriter<S: Sink> {
	sink: S,
	buffer: Buffer,
}

impl<S: Sink> Write for SinkWriter<S> {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.buffer.write_slice(buf);
		let count = self.buffer.size();
		self.sink.write(&mut self.buffer, count)
			.map_err(std::io::Error::from)?;
		Ok(buf.len())
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.sink.flush().map_err(std::io::Error::from)
	}
}

/// Enforces a byte-per-second ceiling across any number of streams.
///
/// Cloning shares the underlying rate state, so one throttler can pace
/// several sources and sinks together. A rate of zero means unlimited.
#[derive(Clone)]
pub struct Throttler {
	state: Arc<Mutex<ThrottlerState>>,
}

struct ThrottlerState {
	bytes_per_second: u64,
	available: f64,
	replenished_at: Instant,
}

impl ThrottlerState {
	fn refill(&mut self, now: Instant) {
		let elapsed = now.saturating_duration_since(self.replenished_at);
		self.available += elapsed.as_secs_f64() * self.bytes_per_second as f64;
		// Cap the burst at one segment.
		self.available = self.available.min(SIZE as f64);
		self.replenished_at = now;
	}
}

impl Throttler {
	pub fn new(bytes_per_second: u64) -> Self {
		Self {
			state: Arc::new(Mutex::new(ThrottlerState {
				bytes_per_second,
				available: 0.0,
				replenished_at: Instant::now(),
			})),
		}
	}

	pub fn set_rate(&self, bytes_per_second: u64) {
		let mut state = self.state.lock();
		state.refill(Instant::now());
		state.bytes_per_second = bytes_per_second;
	}

	/// Claims up to `byte_count` bytes of budget, sleeping while none is
	/// available.
	fn take(&self, byte_count: usize) -> usize {
		if byte_count == 0 {
			return 0;
		}
		loop {
			let wait = {
				let mut state = self.state.lock();
				if state.bytes_per_second == 0 {
					return byte_count;
				}
				state.refill(Instant::now());
				if state.available >= 1.0 {
					let granted = min(byte_count, state.available as usize);
					state.available -= granted as f64;
					return granted;
				}
				Duration::from_secs_f64(
					(1.0 - state.available) / state.bytes_per_second as f64,
				)
			};
			std::thread::sleep(wait);
		}
	}

	/// Wraps `source` so its reads draw from this throttler's budget.
	pub fn source<S: Source>(&self, source: S) -> ThrottledSource<S> {
		ThrottledSource { throttler: self.clone(), inner: source }
	}

	/// Wraps `sink` so its writes draw from this throttler's budget.
	pub fn sink<S: Sink>(&self, sink: S) -> ThrottledSink<S> {
		ThrottledSink { throttler: self.clone(), inner: sink }
	}
}

pub struct ThrottledSource<S: Source> {
	throttler: Throttler,
	inner: S,
}

impl<S: Source> Source for ThrottledSource<S> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		let granted = self.throttler.take(min(byte_count, SIZE));
		self.inner.read(sink, granted)
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.inner.timeout_mut()
	}

	fn close_source(&mut self) -> Result {
		self.inner.close_source()
	}
}

pub struct ThrottledSink<S: Sink> {
	throttler: Throttler,
	inner: S,
}

impl<S: Sink> Sink for ThrottledSink<S> {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		let mut remaining = byte_count;
		while remaining > 0 {
			let granted = self.throttler.take(min(remaining, SIZE));
			self.inner.write(source, granted)?;
			remaining -= granted;
		}
		Ok(())
	}

	fn flush(&mut self) -> Result {
		self.inner.flush()
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.inner.timeout_mut()
	}

	fn close_sink(&mut self) -> Result {
		self.inner.close_sink()
	}
}
