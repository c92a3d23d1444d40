// SPDX-License-Identifier: Apache-2.0

use std::cmp::min;
use std::io;
use crate::{Error, Result};
use crate::byte_str::ByteString;
use super::Buffer;

macro_rules! gen_int_reads {
	($($name:ident $name_le:ident -> $ty:ident,)+) => {$(
		#[doc = concat!(" Reads one big-endian [`", stringify!($ty), "`].")]
		pub fn $name(&mut self) -> Result<$ty> {
			Ok(<$ty>::from_be_bytes(self.read_array()?))
		}

		#[doc = concat!(" Reads one little-endian [`", stringify!($ty), "`].")]
		pub fn $name_le(&mut self) -> Result<$ty> {
			Ok(<$ty>::from_le_bytes(self.read_array()?))
		}
	)+};
}

impl Buffer {
	/// Reads one byte.
	pub fn read_u8(&mut self) -> Result<u8> {
		self.require(1)?;
		let head = self.segments.front_mut()
			.expect("require(1) guarantees a head segment");
		let byte = head.data()[0];
		head.consume(1);
		self.size -= 1;
		self.trim_head();
		Ok(byte)
	}

	/// Reads one byte.
	pub fn read_i8(&mut self) -> Result<i8> {
		self.read_u8().map(|b| b as i8)
	}

	gen_int_reads! {
		read_u16 read_u16_le -> u16,
		read_i16 read_i16_le -> i16,
		read_u32 read_u32_le -> u32,
		read_i32 read_i32_le -> i32,
		read_u64 read_u64_le -> u64,
		read_i64 read_i64_le -> i64,
	}

	/// Reads exactly `N` bytes into an array.
	pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
		let mut array = [0; N];
		self.read_slice_exact(&mut array)?;
		Ok(array)
	}

	/// Reads up to `dst.len()` bytes into `dst`, returning the count read.
	pub fn read_slice(&mut self, dst: &mut [u8]) -> usize {
		let mut read = 0;
		while read < dst.len() {
			let Some(head) = self.segments.front_mut() else { break };
			let n = min(dst.len() - read, head.len());
			dst[read..read + n].copy_from_slice(&head.data()[..n]);
			head.consume(n);
			read += n;
			self.size -= n;
			self.trim_head();
		}
		read
	}

	/// Fills `dst` exactly, consuming nothing when the buffer is short.
	pub fn read_slice_exact(&mut self, dst: &mut [u8]) -> Result {
		self.require(dst.len())?;
		let read = self.read_slice(dst);
		debug_assert_eq!(read, dst.len());
		Ok(())
	}

	/// Drains the whole buffer into a vector.
	pub fn read_slice_to_end(&mut self) -> Vec<u8> {
		let mut dst = vec![0; self.size];
		let read = self.read_slice(&mut dst);
		debug_assert_eq!(read, dst.len());
		dst
	}

	/// Reads `byte_count` bytes into an immutable [`ByteString`].
	pub fn read_byte_string(&mut self, byte_count: usize) -> Result<ByteString> {
		self.require(byte_count)?;
		let mut bytes = vec![0; byte_count];
		self.read_slice_exact(&mut bytes)?;
		Ok(ByteString::new(bytes))
	}

	/// Decodes `byte_count` bytes as UTF-8. Ill-formed sequences become the
	/// replacement character `U+FFFD`, one per maximal malformed subpart, so
	/// decoding always succeeds once enough bytes are buffered.
	pub fn read_utf8(&mut self, byte_count: usize) -> Result<String> {
		self.require(byte_count)?;
		let mut bytes = vec![0; byte_count];
		self.read_slice_exact(&mut bytes)?;
		Ok(decode_utf8_replacing(bytes))
	}

	/// Decodes every buffered byte as UTF-8 with replacement.
	pub fn read_utf8_all(&mut self) -> Result<String> {
		self.read_utf8(self.size)
	}

	/// Decodes one code point, consuming 1-4 bytes. A stray continuation or
	/// invalid lead byte consumes one byte and yields `U+FFFD`; a truncated
	/// trailer consumes the valid prefix and yields `U+FFFD`; overlong forms
	/// and surrogate values consume their full length and yield `U+FFFD`.
	pub fn read_utf8_code_point(&mut self) -> Result<char> {
		self.require(1)?;

		let b0 = self.get(0).map(u32::from)
			.ok_or_else(Error::premature_eof)?;
		let (mut code_point, byte_count, min_code_point) = match b0 {
			_ if b0 & 0x80 == 0x00 => (b0 & 0x7F, 1, 0x0),
			_ if b0 & 0xE0 == 0xC0 => (b0 & 0x1F, 2, 0x80),
			_ if b0 & 0xF0 == 0xE0 => (b0 & 0x0F, 3, 0x800),
			_ if b0 & 0xF8 == 0xF0 => (b0 & 0x07, 4, 0x1_0000),
			_ => {
				// Stray continuation or invalid lead byte.
				self.skip(1)?;
				return Ok('\u{FFFD}');
			}
		};
		if self.size < byte_count {
			return Err(Error::premature_eof());
		}

		for i in 1..byte_count {
			let b = u32::from(self.get(i).ok_or_else(Error::premature_eof)?);
			if b & 0xC0 == 0x80 {
				code_point = code_point << 6 | b & 0x3F;
			} else {
				self.skip(i)?;
				return Ok('\u{FFFD}');
			}
		}
		self.skip(byte_count)?;

		if code_point < min_code_point {
			// Overlong encoding.
			return Ok('\u{FFFD}');
		}
		Ok(char::from_u32(code_point).unwrap_or('\u{FFFD}'))
	}

	/// Reads through the next line terminator (`\n` or `\r\n`) and returns
	/// the line without it. With no terminator left, returns the remaining
	/// bytes, or `None` if the buffer is empty.
	pub fn read_utf8_line(&mut self) -> Result<Option<String>> {
		match self.index_of(b'\n', 0, self.size) {
			Some(newline) => self.read_utf8_line_at(newline).map(Some),
			None if self.size > 0 => self.read_utf8_all().map(Some),
			None => Ok(None),
		}
	}

	/// Like [`read_utf8_line`](Self::read_utf8_line), but fails with
	/// [`Eof`](crate::ErrorKind::Eof) when the data runs out before a
	/// terminator and with [`PrematureEof`](crate::ErrorKind::PrematureEof)
	/// when no terminator appears within `limit` bytes.
	pub fn read_utf8_line_strict(&mut self, limit: usize) -> Result<String> {
		let scan = min(self.size, limit.saturating_add(1));
		match self.index_of(b'\n', 0, scan) {
			Some(newline) => self.read_utf8_line_at(newline),
			None if self.size > limit => Err(Error::premature_eof()),
			None => Err(Error::eof()),
		}
	}

	pub(crate) fn read_utf8_line_at(&mut self, newline: usize) -> Result<String> {
		let line = if newline > 0 && self.get(newline - 1) == Some(b'\r') {
			let line = self.read_utf8(newline - 1)?;
			self.skip(2)?;
			line
		} else {
			let line = self.read_utf8(newline)?;
			self.skip(1)?;
			line
		};
		Ok(line)
	}

	/// Parses a signed decimal long from the leading digits, consuming only
	/// the sign and digits. Overflow fails with
	/// [`InvalidArgument`](crate::ErrorKind::InvalidArgument) and leaves the
	/// buffer positioned at the overflowing digit.
	pub fn read_decimal_i64(&mut self) -> Result<i64> {
		self.require(1)?;

		let mut index = 0;
		let negative = self.get(0) == Some(b'-');
		if negative {
			index = 1;
		}

		// Accumulate negatively so i64::MIN parses without overflow.
		let mut value: i64 = 0;
		let mut digits = 0;
		while let Some(b @ b'0'..=b'9') = self.get(index) {
			let digit = i64::from(b - b'0');
			let next = value.checked_mul(10)
				.and_then(|v| v.checked_sub(digit))
				.filter(|&v| negative || v >= -i64::MAX);
			let Some(next) = next else {
				self.skip(index)?;
				return Err(Error::invalid_argument("decimal overflows an i64"));
			};
			value = next;
			digits += 1;
			index += 1;
		}

		if digits == 0 {
			let found = self.get(index).map_or("end of buffer".into(), |b| format!("{b:#04x}"));
			return Err(Error::invalid_argument(format!("expected a digit, found {found}")));
		}
		self.skip(index)?;
		Ok(if negative { value } else { -value })
	}

	/// Parses an unsigned hexadecimal long from the leading hex digits,
	/// case-insensitive, consuming only the digits. Overflow fails with
	/// [`InvalidArgument`](crate::ErrorKind::InvalidArgument) and leaves the
	/// buffer positioned at the overflowing digit.
	pub fn read_hex_u64(&mut self) -> Result<u64> {
		self.require(1)?;

		let mut value: u64 = 0;
		let mut index = 0;
		while let Some(b) = self.get(index) {
			let digit = match b {
				b'0'..=b'9' => u64::from(b - b'0'),
				b'a'..=b'f' => u64::from(b - b'a') + 10,
				b'A'..=b'F' => u64::from(b - b'A') + 10,
				_ => break,
			};
			if value & 0xF000_0000_0000_0000 != 0 {
				self.skip(index)?;
				return Err(Error::invalid_argument("hexadecimal overflows a u64"));
			}
			value = value << 4 | digit;
			index += 1;
		}

		if index == 0 {
			let found = self.get(0).map_or("end of buffer".into(), |b| format!("{b:#04x}"));
			return Err(Error::invalid_argument(format!("expected a hex digit, found {found}")));
		}
		self.skip(index)?;
		Ok(value)
	}
}

/// Decodes with one `U+FFFD` per maximal ill-formed subsequence, matching the
/// W3C/Unicode reference behavior. The fast path validates with `simdutf8`.
pub(crate) fn decode_utf8_replacing(bytes: Vec<u8>) -> String {
	if simdutf8::basic::from_utf8(&bytes).is_ok() {
		// Safety: validated immediately above.
		unsafe { String::from_utf8_unchecked(bytes) }
	} else {
		String::from_utf8_lossy(&bytes).into_owned()
	}
}

impl io::Read for Buffer {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		Ok(self.read_slice(buf))
	}
}

#[cfg(test)]
mod test {
	use pretty_assertions::assert_eq;
	use quickcheck_macros::quickcheck;
	use crate::{Buffer, Error};

	#[test]
	fn typed_reads_consume_in_order() {
		let mut buf = Buffer::from(&[1, 2, 3, 4, 5, 6, 7, 8][..]);
		assert_eq!(buf.read_u64_le().unwrap(), 0x0807_0605_0403_0201);
		assert!(buf.is_empty());

		let mut buf = Buffer::from(&[0xCA, 0xFE, 0xBA, 0xBE][..]);
		assert_eq!(buf.read_u16().unwrap(), 0xCAFE);
		assert_eq!(buf.read_u16().unwrap(), 0xBABE);
		assert!(buf.read_u16().unwrap_err().is_eof());
	}

	#[test]
	fn typed_read_spanning_segments() {
		let mut buf = Buffer::new();
		buf.write_slice(&[0; crate::segment::SIZE - 2]);
		buf.write_u32(0xDEAD_BEEF);
		buf.skip(crate::segment::SIZE - 2).unwrap();
		assert_eq!(buf.read_u32().unwrap(), 0xDEAD_BEEF);
	}

	#[test]
	fn utf8_prefix_then_rest() {
		let mut buf = Buffer::from("Hello, World!");
		assert_eq!(buf.read_utf8(5).unwrap(), "Hello");
		assert_eq!(buf.read_utf8_all().unwrap(), ", World!");
	}

	#[test]
	fn utf8_replaces_malformed() {
		let mut buf = Buffer::from(&b"\xC3\x28"[..]);
		assert_eq!(buf.read_utf8(2).unwrap(), "\u{FFFD}(");
	}

	#[test]
	fn code_point_decoding() {
		let mut buf = Buffer::from(&b"\xC3\xA9"[..]);
		assert_eq!(buf.read_utf8_code_point().unwrap(), '\u{E9}');
		assert!(buf.is_empty());

		// Stray continuation consumes a single byte.
		let mut buf = Buffer::from(&b"\x80a"[..]);
		assert_eq!(buf.read_utf8_code_point().unwrap(), '\u{FFFD}');
		assert_eq!(buf.read_utf8_code_point().unwrap(), 'a');

		// Overlong NUL.
		let mut buf = Buffer::from(&b"\xC0\x80"[..]);
		assert_eq!(buf.read_utf8_code_point().unwrap(), '\u{FFFD}');
		assert!(buf.is_empty());

		// Surrogate range.
		let mut buf = Buffer::from(&b"\xED\xA0\x80"[..]);
		assert_eq!(buf.read_utf8_code_point().unwrap(), '\u{FFFD}');

		// Truncated trailer consumes the valid prefix.
		let mut buf = Buffer::from(&b"\xE2\x82a"[..]);
		assert_eq!(buf.read_utf8_code_point().unwrap(), '\u{FFFD}');
		assert_eq!(buf.read_utf8_code_point().unwrap(), 'a');
	}

	#[quickcheck]
	fn utf8_round_trips(text: String) -> bool {
		let mut buf = Buffer::new();
		buf.write_utf8(&text);
		buf.size() == text.len() && buf.read_utf8_all().unwrap() == text
	}

	#[test]
	fn lines_with_mixed_terminators() {
		let mut buf = Buffer::from("foo\nbar\r\nbaz");
		assert_eq!(buf.read_utf8_line().unwrap().as_deref(), Some("foo"));
		assert_eq!(buf.read_utf8_line().unwrap().as_deref(), Some("bar"));
		assert_eq!(buf.read_utf8_line().unwrap().as_deref(), Some("baz"));
		assert_eq!(buf.read_utf8_line().unwrap(), None);
	}

	#[test]
	fn strict_line_failures() {
		let mut buf = Buffer::from("no terminator");
		assert!(matches!(
			buf.read_utf8_line_strict(64).unwrap_err().kind(),
			crate::ErrorKind::Eof,
		));

		let mut buf = Buffer::from("a long line without a break\n");
		assert!(matches!(
			buf.read_utf8_line_strict(5).unwrap_err().kind(),
			crate::ErrorKind::PrematureEof,
		));

		let mut buf = Buffer::from("12345\nrest");
		assert_eq!(buf.read_utf8_line_strict(5).unwrap(), "12345");
		assert_eq!(buf.read_utf8_all().unwrap(), "rest");
	}

	#[test]
	fn decimal_parsing() {
		let mut buf = Buffer::from("-9223372036854775808 trailing");
		assert_eq!(buf.read_decimal_i64().unwrap(), i64::MIN);
		assert_eq!(buf.read_utf8_all().unwrap(), " trailing");

		let mut buf = Buffer::from("9223372036854775808");
		let err = buf.read_decimal_i64().unwrap_err();
		assert!(matches!(err.kind(), crate::ErrorKind::InvalidArgument(_)));
		// Positioned at the overflowing digit.
		assert_eq!(buf.read_utf8_all().unwrap(), "8");

		let mut buf = Buffer::from("x");
		assert!(buf.read_decimal_i64().is_err());
	}

	#[test]
	fn hex_parsing() {
		let mut buf = Buffer::from("dEAdBeeF;");
		assert_eq!(buf.read_hex_u64().unwrap(), 0xDEAD_BEEF);
		assert_eq!(buf.read_utf8_all().unwrap(), ";");

		let mut buf = Buffer::from("ffffffffffffffff0");
		let err = buf.read_hex_u64().unwrap_err();
		assert!(matches!(err.kind(), crate::ErrorKind::InvalidArgument(_)));
		assert_eq!(buf.read_utf8_all().unwrap(), "0");
	}

	#[test]
	fn read_byte_string_copies_out() {
		let mut buf = Buffer::from("snapshot me");
		let bytes = buf.read_byte_string(8).unwrap();
		assert_eq!(bytes.to_vec(), b"snapshot");
		assert_eq!(buf.read_utf8_all().unwrap(), " me");
	}

	#[test]
	fn exact_read_consumes_nothing_on_shortfall() {
		let mut buf = Buffer::from("abc");
		let mut dst = [0; 8];
		assert!(buf.read_slice_exact(&mut dst).is_err());
		assert_eq!(buf.size(), 3);

		assert_eq!(Error::premature_eof().is_eof(), true);
	}
}
