// SPDX-License-Identifier: Apache-2.0

use std::io;
use crate::byte_str::ByteString;
use super::Buffer;

macro_rules! gen_int_writes {
	($($name:ident $name_le:ident -> $ty:ident,)+) => {$(
		#[doc = concat!(" Writes one big-endian [`", stringify!($ty), "`].")]
		pub fn $name(&mut self, value: $ty) {
			self.write_slice(&value.to_be_bytes());
		}

		#[doc = concat!(" Writes one little-endian [`", stringify!($ty), "`].")]
		pub fn $name_le(&mut self, value: $ty) {
			self.write_slice(&value.to_le_bytes());
		}
	)+};
}

impl Buffer {
	/// Appends `src` in full, claiming tail segments as needed. Writing to a
	/// buffer cannot fail; it only grows memory.
	pub fn write_slice(&mut self, mut src: &[u8]) {
		while !src.is_empty() {
			let tail = self.writable_segment(1);
			let n = tail.push_slice(src);
			src = &src[n..];
			self.grow(n);
		}
	}

	/// Writes one byte.
	pub fn write_u8(&mut self, value: u8) {
		self.write_slice(&[value]);
	}

	/// Writes one byte.
	pub fn write_i8(&mut self, value: i8) {
		self.write_u8(value as u8);
	}

	gen_int_writes! {
		write_u16 write_u16_le -> u16,
		write_i16 write_i16_le -> i16,
		write_u32 write_u32_le -> u32,
		write_i32 write_i32_le -> i32,
		write_u64 write_u64_le -> u64,
		write_i64 write_i64_le -> i64,
	}

	/// Appends `string` encoded as UTF-8. Rust strings are always valid
	/// UTF-8, so this is a plain byte copy and never emits a BOM.
	pub fn write_utf8(&mut self, string: &str) {
		self.write_slice(string.as_bytes());
	}

	/// Encodes one code point as 1-4 UTF-8 bytes. Surrogate values and values
	/// above `0x10FFFF` are encoded as the replacement character `U+FFFD`.
	pub fn write_utf8_code_point(&mut self, code_point: u32) {
		let c = char::from_u32(code_point).unwrap_or('\u{FFFD}');
		let mut scratch = [0; 4];
		self.write_slice(c.encode_utf8(&mut scratch).as_bytes());
	}

	/// Appends all bytes of `bytes`.
	pub fn write_byte_string(&mut self, bytes: &ByteString) {
		bytes.for_each_chunk(|chunk| self.write_slice(chunk));
	}

	/// Appends the signed decimal form of `value`.
	pub fn write_decimal_i64(&mut self, value: i64) {
		let mut scratch = [0; 20];
		let mut at = scratch.len();
		// Accumulate on the negative side; i64::MIN has no positive
		// counterpart.
		let negative = value < 0;
		let mut value = if negative { value } else { -value };
		loop {
			at -= 1;
			scratch[at] = b'0' + (-(value % 10)) as u8;
			value /= 10;
			if value == 0 { break }
		}
		if negative {
			at -= 1;
			scratch[at] = b'-';
		}
		self.write_slice(&scratch[at..]);
	}

	/// Appends the lowercase hexadecimal form of `value`, without a leading
	/// `0x` and with no leading zeros.
	pub fn write_hex_u64(&mut self, mut value: u64) {
		const DIGITS: &[u8; 16] = b"0123456789abcdef";
		if value == 0 {
			self.write_u8(b'0');
			return;
		}
		let mut digits = [0; 16];
		let mut at = digits.len();
		while value != 0 {
			at -= 1;
			digits[at] = DIGITS[(value & 0xF) as usize];
			value >>= 4;
		}
		self.write_slice(&digits[at..]);
	}
}

impl io::Write for Buffer {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.write_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

#[cfg(test)]
mod test {
	use pretty_assertions::assert_eq;
	use super::super::Buffer;

	#[test]
	fn integers_round_endianness() {
		let mut buf = Buffer::new();
		buf.write_u32(0x0102_0304);
		buf.write_u32_le(0x0102_0304);
		assert_eq!(buf.read_slice_to_end(), [1, 2, 3, 4, 4, 3, 2, 1]);
	}

	#[test]
	fn code_point_replacement() {
		let mut buf = Buffer::new();
		buf.write_utf8_code_point(0xE9);
		buf.write_utf8_code_point(0xD800);
		buf.write_utf8_code_point(0x11_0000);
		buf.write_utf8_code_point(0x1F600);
		assert_eq!(
			buf.read_slice_to_end(),
			b"\xC3\xA9\xEF\xBF\xBD\xEF\xBF\xBD\xF0\x9F\x98\x80",
		);
	}

	#[test]
	fn decimal_and_hex_forms() {
		let mut buf = Buffer::new();
		buf.write_decimal_i64(i64::MIN);
		buf.write_u8(b' ');
		buf.write_decimal_i64(0);
		buf.write_u8(b' ');
		buf.write_hex_u64(0xdead_beef);
		assert_eq!(
			buf.read_utf8_all().unwrap(),
			"-9223372036854775808 0 deadbeef",
		);
	}
}
