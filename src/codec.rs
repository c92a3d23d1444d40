// SPDX-License-Identifier: Apache-2.0

//! Stream adapters between raw and deflate/gzip-compressed byte streams.
//!
//! The gzip framing is exactly RFC 1952: emitted headers are the fixed ten
//! bytes `1f 8b 08 00 00000000 00 00` (no flags, zero MTIME, zero XFL,
//! unknown OS) so output is byte-stable; read headers may carry the optional
//! FEXTRA/FNAME/FCOMMENT/FHCRC fields, which are validated and skipped.

use std::cmp::min;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use crate::{combine, Buffer, Error, Result};
use crate::buffered::BufferedSource;
use crate::streams::{Sink, Source};
use crate::timeout::Timeout;

const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;

/// Compresses everything written through it as a raw deflate stream.
pub struct DeflateSink<S: Sink> {
	sink: S,
	deflater: Compress,
	staging: Buffer,
	closed: bool,
}

impl<S: Sink> DeflateSink<S> {
	pub fn new(sink: S) -> Self {
		Self {
			sink,
			deflater: Compress::new(Compression::default(), false),
			staging: Buffer::new(),
			closed: false,
		}
	}

	/// Runs `input` through the deflater into the staging buffer, returning
	/// the bytes of input consumed.
	fn deflate(&mut self, mut input: &[u8], flush: FlushCompress) -> Result {
		loop {
			let (consumed, produced, status) = {
				let tail = self.staging.writable_segment(1);
				let before_in = self.deflater.total_in();
				let before_out = self.deflater.total_out();
				let status = self.deflater
					.compress(input, tail.writable(), flush)
					.map_err(|err| Error::protocol(format!("deflate failed: {err}")))?;
				let consumed = (self.deflater.total_in() - before_in) as usize;
				let produced = (self.deflater.total_out() - before_out) as usize;
				tail.add(produced);
				(consumed, produced, status)
			};
			self.staging.grow(produced);
			input = &input[consumed..];

			let finished = match flush {
				FlushCompress::Finish => status == Status::StreamEnd,
				_ => input.is_empty() && produced == 0,
			};
			if finished {
				return Ok(());
			}
		}
	}

	fn emit(&mut self) -> Result {
		let count = self.staging.size();
		if count > 0 {
			self.sink.write(&mut self.staging, count)?;
		}
		Ok(())
	}

	/// Finishes the deflate stream without closing the delegate.
	pub fn finish(&mut self) -> Result {
		self.deflate(&[], FlushCompress::Finish)?;
		self.emit()
	}
}

impl<S: Sink> Sink for DeflateSink<S> {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		if self.closed {
			return Err(Error::closed());
		}
		source.require(byte_count)?;

		let mut remaining = byte_count;
		while remaining > 0 {
			let chunk_len = {
				let head = source.head_data()
					.ok_or_else(Error::premature_eof)?;
				let n = min(head.len(), remaining);
				// The deflater consumes the chunk fully before returning.
				let chunk = head[..n].to_vec();
				self.deflate(&chunk, FlushCompress::None)?;
				n
			};
			source.skip(chunk_len)?;
			remaining -= chunk_len;
		}
		self.emit()
	}

	fn flush(&mut self) -> Result {
		if self.closed {
			return Err(Error::closed());
		}
		// A sync flush makes everything written so far decodable downstream.
		self.deflate(&[], FlushCompress::Sync)?;
		self.emit()?;
		self.sink.flush()
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.sink.timeout_mut()
	}

	fn close_sink(&mut self) -> Result {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		let finished = self.finish();
		let closed = self.sink.close_sink();
		combine(finished, closed)
	}
}

impl<S: Sink> Drop for DeflateSink<S> {
	fn drop(&mut self) {
		let _ = self.close_sink();
	}
}

/// The shared raw-inflate engine: pulls compressed bytes from a buffered
/// source, produces decompressed bytes into a caller's buffer.
struct Inflater {
	decompress: Decompress,
	done: bool,
}

impl Inflater {
	fn new() -> Self {
		Self {
			decompress: Decompress::new(false),
			done: false,
		}
	}

	/// Produces at most `byte_count` decompressed bytes into `sink`,
	/// returning the count, or zero once the deflate stream has ended.
	fn inflate<S: Source>(
		&mut self,
		source: &mut BufferedSource<S>,
		sink: &mut Buffer,
		byte_count: usize,
	) -> Result<usize> {
		if self.done || byte_count == 0 {
			return Ok(0);
		}

		loop {
			let has_input = source.request(1)?;

			let (consumed, produced, status) = {
				let input = source.buffer().head_data().unwrap_or(&[]);
				let tail = sink.writable_segment(1);
				let out_len = min(byte_count, tail.writable_len());
				let before_in = self.decompress.total_in();
				let before_out = self.decompress.total_out();
				let status = self.decompress
					.decompress(input, &mut tail.writable()[..out_len], FlushDecompress::None)
					.map_err(|err| Error::protocol(format!("invalid deflate stream: {err}")))?;
				let consumed = (self.decompress.total_in() - before_in) as usize;
				let produced = (self.decompress.total_out() - before_out) as usize;
				tail.add(produced);
				(consumed, produced, status)
			};
			sink.grow(produced);
			source.buffer().skip(consumed)?;

			if produced > 0 {
				if status == Status::StreamEnd {
					self.done = true;
				}
				return Ok(produced);
			}
			if status == Status::StreamEnd {
				self.done = true;
				return Ok(0);
			}
			if !has_input {
				return Err(Error::protocol("truncated deflate stream"));
			}
		}
	}
}

/// Decompresses a raw deflate stream pulled from the wrapped source.
pub struct InflateSource<S: Source> {
	source: BufferedSource<S>,
	inflater: Inflater,
	closed: bool,
}

impl<S: Source> InflateSource<S> {
	pub fn new(source: S) -> Self {
		Self {
			source: BufferedSource::new(source),
			inflater: Inflater::new(),
			closed: false,
		}
	}
}

impl<S: Source> Source for InflateSource<S> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		if self.closed {
			return Err(Error::closed());
		}
		self.inflater.inflate(&mut self.source, sink, byte_count)
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.source.timeout_mut()
	}

	fn close_source(&mut self) -> Result {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.source.close_source()
	}
}

/// Compresses everything written through it as an RFC 1952 gzip member:
/// fixed header, deflate body, CRC-32 + ISIZE trailer on close.
pub struct GzipSink<S: Sink> {
	sink: S,
	deflater: Compress,
	staging: Buffer,
	crc: crc32fast::Hasher,
	bytes_in: u64,
	closed: bool,
}

impl<S: Sink> GzipSink<S> {
	pub fn new(sink: S) -> Self {
		let mut staging = Buffer::new();
		// 1f 8b, deflate, no flags, MTIME 0, XFL 0, OS 0.
		staging.write_slice(&[0x1F, 0x8B, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0x00]);
		Self {
			sink,
			deflater: Compress::new(Compression::default(), false),
			staging,
			crc: crc32fast::Hasher::new(),
			bytes_in: 0,
			closed: false,
		}
	}

	fn deflate(&mut self, mut input: &[u8], flush: FlushCompress) -> Result {
		loop {
			let (consumed, produced, status) = {
				let tail = self.staging.writable_segment(1);
				let before_in = self.deflater.total_in();
				let before_out = self.deflater.total_out();
				let status = self.deflater
					.compress(input, tail.writable(), flush)
					.map_err(|err| Error::protocol(format!("deflate failed: {err}")))?;
				let consumed = (self.deflater.total_in() - before_in) as usize;
				let produced = (self.deflater.total_out() - before_out) as usize;
				tail.add(produced);
				(consumed, produced, status)
			};
			self.staging.grow(produced);
			input = &input[consumed..];

			let finished = match flush {
				FlushCompress::Finish => status == Status::StreamEnd,
				_ => input.is_empty() && produced == 0,
			};
			if finished {
				return Ok(());
			}
		}
	}

	fn emit(&mut self) -> Result {
		let count = self.staging.size();
		if count > 0 {
			self.sink.write(&mut self.staging, count)?;
		}
		Ok(())
	}
}

impl<S: Sink> Sink for GzipSink<S> {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		if self.closed {
			return Err(Error::closed());
		}
		source.require(byte_count)?;

		let mut remaining = byte_count;
		while remaining > 0 {
			let chunk = {
				let head = source.head_data()
					.ok_or_else(Error::premature_eof)?;
				head[..min(head.len(), remaining)].to_vec()
			};
			self.crc.update(&chunk);
			self.bytes_in += chunk.len() as u64;
			self.deflate(&chunk, FlushCompress::None)?;
			source.skip(chunk.len())?;
			remaining -= chunk.len();
		}
		self.emit()
	}

	fn flush(&mut self) -> Result {
		if self.closed {
			return Err(Error::closed());
		}
		self.deflate(&[], FlushCompress::Sync)?;
		self.emit()?;
		self.sink.flush()
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.sink.timeout_mut()
	}

	/// Finishes the deflate body, writes the CRC-32/ISIZE trailer, then
	/// closes the delegate. The first failure stays primary.
	fn close_sink(&mut self) -> Result {
		if self.closed {
			return Ok(());
		}
		self.closed = true;

		let finished = (|| {
			self.deflate(&[], FlushCompress::Finish)?;
			let crc = self.crc.clone().finalize();
			self.staging.write_u32_le(crc);
			self.staging.write_u32_le(self.bytes_in as u32);
			self.emit()
		})();
		let closed = self.sink.close_sink();
		combine(finished, closed)
	}
}

impl<S: Sink> Drop for GzipSink<S> {
	fn drop(&mut self) {
		let _ = self.close_sink();
	}
}

/// Decompresses an RFC 1952 gzip member pulled from the wrapped source,
/// validating the header and the CRC-32/ISIZE trailer.
pub struct GzipSource<S: Source> {
	source: BufferedSource<S>,
	inflater: Inflater,
	crc: crc32fast::Hasher,
	bytes_out: u64,
	section: Section,
	closed: bool,
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Section {
	Header,
	Body,
	Done,
}

impl<S: Source> GzipSource<S> {
	pub fn new(source: S) -> Self {
		Self {
			source: BufferedSource::new(source),
			inflater: Inflater::new(),
			crc: crc32fast::Hasher::new(),
			bytes_out: 0,
			section: Section::Header,
			closed: false,
		}
	}

	fn read_header(&mut self) -> Result {
		let mut header_crc = crc32fast::Hasher::new();

		let fixed = self.source.read_byte_string(10)
			.map_err(|_| Error::protocol("truncated gzip header"))?;
		let fixed = fixed.to_vec();
		header_crc.update(&fixed);
		if fixed[0] != 0x1F || fixed[1] != 0x8B {
			return Err(Error::protocol(format!(
				"not a gzip stream: magic {:02x}{:02x}", fixed[0], fixed[1],
			)));
		}
		if fixed[2] != 0x08 {
			return Err(Error::protocol(format!(
				"unsupported compression method {}", fixed[2],
			)));
		}
		let flags = fixed[3];

		if flags & FEXTRA != 0 {
			let len = self.source.read_byte_string(2)
				.map_err(|_| Error::protocol("truncated gzip FEXTRA"))?;
			let len_bytes = len.to_vec();
			header_crc.update(&len_bytes);
			let xlen = usize::from(u16::from_le_bytes([len_bytes[0], len_bytes[1]]));
			let extra = self.source.read_byte_string(xlen)
				.map_err(|_| Error::protocol("truncated gzip FEXTRA"))?;
			header_crc.update(&extra.to_vec());
		}
		if flags & FNAME != 0 {
			self.skip_zero_terminated(&mut header_crc, "FNAME")?;
		}
		if flags & FCOMMENT != 0 {
			self.skip_zero_terminated(&mut header_crc, "FCOMMENT")?;
		}
		if flags & FHCRC != 0 {
			let expected = self.source.read_u16_le()
				.map_err(|_| Error::protocol("truncated gzip FHCRC"))?;
			let actual = (header_crc.finalize() & 0xFFFF) as u16;
			if expected != actual {
				return Err(Error::protocol(format!(
					"gzip header CRC mismatch: expected {expected:#06x}, was {actual:#06x}",
				)));
			}
		}
		Ok(())
	}

	fn skip_zero_terminated(
		&mut self,
		header_crc: &mut crc32fast::Hasher,
		field: &str,
	) -> Result {
		let end = self.source.index_of(0, 0)?
			.ok_or_else(|| Error::protocol(format!("truncated gzip {field}")))?;
		let bytes = self.source.read_byte_string(end + 1)?;
		header_crc.update(&bytes.to_vec());
		Ok(())
	}

	fn read_trailer(&mut self) -> Result {
		let crc = self.source.read_u32_le()
			.map_err(|_| Error::protocol("truncated gzip trailer"))?;
		let isize = self.source.read_u32_le()
			.map_err(|_| Error::protocol("truncated gzip trailer"))?;

		let actual_crc = self.crc.clone().finalize();
		if crc != actual_crc {
			return Err(Error::protocol(format!(
				"gzip CRC mismatch: expected {crc:#010x}, was {actual_crc:#010x}",
			)));
		}
		let actual_isize = self.bytes_out as u32;
		if isize != actual_isize {
			return Err(Error::protocol(format!(
				"gzip size mismatch: expected {isize}, was {actual_isize}",
			)));
		}
		if !self.source.exhausted()? {
			return Err(Error::protocol("gzip finished before exhausting the source"));
		}
		Ok(())
	}
}

impl<S: Source> Source for GzipSource<S> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		if self.closed {
			return Err(Error::closed());
		}
		if byte_count == 0 || self.section == Section::Done {
			return Ok(0);
		}

		if self.section == Section::Header {
			self.read_header()?;
			self.section = Section::Body;
		}

		let start = sink.size();
		let produced = self.inflater.inflate(&mut self.source, sink, byte_count)?;
		if produced > 0 {
			let crc = &mut self.crc;
			sink.for_each_chunk_in(start, start + produced, |chunk| crc.update(chunk));
			self.bytes_out += produced as u64;
			return Ok(produced);
		}

		self.read_trailer()?;
		self.section = Section::Done;
		Ok(0)
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.source.timeout_mut()
	}

	fn close_source(&mut self) -> Result {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.source.close_source()
	}
}

#[cfg(test)]
mod test {
	use pretty_assertions::assert_eq;
	use quickcheck_macros::quickcheck;
	use crate::Buffer;
	use crate::streams::{Sink, Source, SourceExt};
	use super::{DeflateSink, GzipSink, GzipSource, InflateSource};

	fn gzip(data: &[u8]) -> Vec<u8> {
		let mut out = Buffer::new();
		{
			let mut sink = GzipSink::new(&mut out);
			let mut src = Buffer::new();
			src.write_slice(data);
			let count = src.size();
			if count > 0 {
				sink.write(&mut src, count).unwrap();
			}
			sink.close_sink().unwrap();
		}
		out.read_slice_to_end()
	}

	fn gunzip(data: &[u8]) -> crate::Result<Vec<u8>> {
		let mut source = GzipSource::new(&data[..]);
		let mut out = Buffer::new();
		source.read_to_end(&mut out)?;
		Ok(out.read_slice_to_end())
	}

	#[test]
	fn gzip_header_and_trailer_are_stable() {
		let compressed = gzip(b"Hi!");
		assert_eq!(
			&compressed[..10],
			&[0x1F, 0x8B, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0x00],
		);
		// CRC32("Hi!") = 0x799ec5da, ISIZE = 3, both little-endian.
		let trailer = &compressed[compressed.len() - 8..];
		assert_eq!(trailer, &[0xDA, 0xC5, 0x9E, 0x79, 0x03, 0x00, 0x00, 0x00]);
	}

	#[quickcheck]
	fn gzip_round_trips(data: Vec<u8>) -> bool {
		gunzip(&gzip(&data)).unwrap() == data
	}

	#[test]
	fn gzip_detects_corrupt_crc() {
		let mut compressed = gzip(b"checksummed payload");
		let at = compressed.len() - 6;
		compressed[at] ^= 0xFF;
		let err = gunzip(&compressed).unwrap_err();
		assert!(matches!(err.kind(), crate::ErrorKind::Protocol(_)));
	}

	#[test]
	fn gzip_rejects_bad_magic() {
		let err = gunzip(b"PK\x03\x04 not gzip at all").unwrap_err();
		assert!(matches!(err.kind(), crate::ErrorKind::Protocol(_)));
	}

	#[test]
	fn gzip_skips_name_and_extra_fields() {
		let plain = gzip(b"payload");
		// Rewrite the header to carry FEXTRA + FNAME.
		let mut framed = vec![0x1F, 0x8B, 0x08, super::FEXTRA | super::FNAME, 0, 0, 0, 0, 0, 0];
		framed.extend_from_slice(&[0x04, 0x00]);
		framed.extend_from_slice(b"ex!!");
		framed.extend_from_slice(b"file.txt\0");
		framed.extend_from_slice(&plain[10..]);
		assert_eq!(gunzip(&framed).unwrap(), b"payload");
	}

	#[test]
	fn gzip_rejects_trailing_garbage() {
		let mut compressed = gzip(b"data");
		compressed.push(0xEE);
		assert!(gunzip(&compressed).is_err());
	}

	#[quickcheck]
	fn deflate_round_trips(data: Vec<u8>) -> bool {
		let mut compressed = Buffer::new();
		{
			let mut sink = DeflateSink::new(&mut compressed);
			let mut src = Buffer::new();
			src.write_slice(&data);
			let count = src.size();
			if count > 0 {
				sink.write(&mut src, count).unwrap();
			}
			sink.close_sink().unwrap();
		}

		let bytes = compressed.read_slice_to_end();
		let mut source = InflateSource::new(&bytes[..]);
		let mut out = Buffer::new();
		source.read_to_end(&mut out).unwrap();
		out.read_slice_to_end() == data
	}

	#[test]
	fn empty_gzip_member_round_trips() {
		assert_eq!(gunzip(&gzip(b"")).unwrap(), b"");
	}
}
