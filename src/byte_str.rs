// SPDX-License-Identifier: Apache-2.0

use std::borrow::Cow;
use std::cmp::{min, Ordering};
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, Engine, GeneralPurpose, GeneralPurposeConfig};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use digest::Digest;
use hmac::{Hmac, Mac};
use crate::{Error, Result};
use crate::segment::Block;

/// An immutable sequence of bytes, freely shareable across threads.
///
/// A byte string either owns one contiguous allocation or references a run of
/// buffer segments taken by [`Buffer::snapshot`](crate::Buffer::snapshot); a
/// parallel directory of cumulative offsets keeps indexed access cheap for
/// the segmented form. The two forms are indistinguishable through every
/// public operation: equality, ordering, hashing, encoding, and digests all
/// agree bit-for-bit.
#[derive(Clone)]
pub struct ByteString {
	repr: Repr,
	hash: once_cell::sync::OnceCell<u64>,
}

#[derive(Clone)]
enum Repr {
	Flat(Arc<[u8]>),
	Segmented {
		chunks: Arc<[Chunk]>,
		/// Cumulative end offset of each chunk; the last entry is the total
		/// length.
		directory: Arc<[usize]>,
		len: usize,
	},
}

#[derive(Clone)]
struct Chunk {
	block: Arc<Block>,
	start: usize,
	end: usize,
}

impl Chunk {
	fn data(&self) -> &[u8] {
		&self.block[self.start..self.end]
	}
}

/// Accepts both RFC 4648 alphabets with or without padding when decoding.
const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
	.with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

macro_rules! gen_hmac {
	($($name:ident -> $digest:ty,)+) => {$(
		#[doc = concat!(
			" The keyed-hash message authentication code of the bytes under `key`.",
			" The key must be non-empty.",
		)]
		pub fn $name(&self, key: &ByteString) -> Result<Self> {
			if key.is_empty() {
				return Err(Error::invalid_argument("empty HMAC key"));
			}
			let mut mac = Hmac::<$digest>::new_from_slice(&key.as_contiguous())
				.map_err(|err| Error::invalid_argument(format!("bad HMAC key: {err}")))?;
			self.for_each_chunk(|chunk| mac.update(chunk));
			Ok(Self::new(mac.finalize().into_bytes().to_vec()))
		}
	)+};
}

impl ByteString {
	pub fn empty() -> Self {
		Self::new(Vec::new())
	}

	/// Takes ownership of `bytes` as a contiguous byte string.
	pub fn new(bytes: Vec<u8>) -> Self {
		Self::from_flat(bytes.into())
	}

	/// Copies `bytes` into a new byte string.
	pub fn of(bytes: &[u8]) -> Self {
		Self::from_flat(bytes.into())
	}

	/// The UTF-8 bytes of `text`.
	pub fn encode_utf8(text: &str) -> Self {
		Self::of(text.as_bytes())
	}

	fn from_flat(bytes: Arc<[u8]>) -> Self {
		Self { repr: Repr::Flat(bytes), hash: once_cell::sync::OnceCell::new() }
	}

	/// Builds the segmented form from shared block windows, in O(segments).
	pub(crate) fn from_segments(segments: Vec<(Arc<Block>, Range<usize>)>) -> Self {
		let mut chunks = Vec::with_capacity(segments.len());
		let mut directory = Vec::with_capacity(segments.len());
		let mut len = 0;
		for (block, range) in segments {
			if range.is_empty() { continue }
			len += range.len();
			chunks.push(Chunk { block, start: range.start, end: range.end });
			directory.push(len);
		}
		Self {
			repr: Repr::Segmented {
				chunks: chunks.into(),
				directory: directory.into(),
				len,
			},
			hash: once_cell::sync::OnceCell::new(),
		}
	}

	/// Decodes a base64 string in either RFC 4648 alphabet, tolerating
	/// trailing whitespace. Returns `None` for any other irregularity.
	pub fn decode_base64(encoded: &str) -> Option<Self> {
		let trimmed = encoded.trim_end_matches(['\r', '\n', ' ', '\t']);
		STANDARD_LENIENT.decode(trimmed)
			.or_else(|_| URL_SAFE_LENIENT.decode(trimmed))
			.ok()
			.map(Self::new)
	}

	/// Decodes an even-length, case-insensitive hex string.
	pub fn decode_hex(encoded: &str) -> Result<Self> {
		base16ct::mixed::decode_vec(encoded)
			.map(Self::new)
			.map_err(|err| Error::invalid_argument(format!("not a hex string: {err}")))
	}

	pub fn len(&self) -> usize {
		match &self.repr {
			Repr::Flat(bytes) => bytes.len(),
			Repr::Segmented { len, .. } => *len,
		}
	}

	pub fn is_empty(&self) -> bool { self.len() == 0 }

	/// The byte at `index`, if in bounds. O(1) for the contiguous form,
	/// O(log segments) for snapshots.
	pub fn byte(&self, index: usize) -> Option<u8> {
		match &self.repr {
			Repr::Flat(bytes) => bytes.get(index).copied(),
			Repr::Segmented { chunks, directory, len } => {
				if index >= *len {
					return None;
				}
				let chunk = directory.partition_point(|&end| end <= index);
				let chunk_start = if chunk == 0 { 0 } else { directory[chunk - 1] };
				Some(chunks[chunk].data()[index - chunk_start])
			}
		}
	}

	/// Calls `f` once per contiguous run of bytes, in order.
	pub fn for_each_chunk(&self, mut f: impl FnMut(&[u8])) {
		match &self.repr {
			Repr::Flat(bytes) => {
				if !bytes.is_empty() {
					f(bytes);
				}
			}
			Repr::Segmented { chunks, .. } => {
				for chunk in chunks.iter() {
					f(chunk.data());
				}
			}
		}
	}

	/// The bytes as one contiguous slice, copying only for the segmented
	/// form.
	pub fn as_contiguous(&self) -> Cow<'_, [u8]> {
		match &self.repr {
			Repr::Flat(bytes) => Cow::Borrowed(bytes),
			Repr::Segmented { .. } => Cow::Owned(self.to_vec()),
		}
	}

	pub fn to_vec(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.len());
		self.for_each_chunk(|chunk| out.extend_from_slice(chunk));
		out
	}

	/// Copies out the bytes in `[begin, end)` as a contiguous byte string.
	pub fn substring(&self, begin: usize, end: usize) -> Result<Self> {
		if begin > end || end > self.len() {
			return Err(Error::invalid_argument(format!(
				"substring {begin}..{end} out of bounds for length {}", self.len(),
			)));
		}
		match &self.repr {
			Repr::Flat(bytes) => Ok(Self::of(&bytes[begin..end])),
			Repr::Segmented { .. } => {
				let mut out = Vec::with_capacity(end - begin);
				let mut offset = 0;
				self.for_each_chunk(|chunk| {
					let chunk_end = offset + chunk.len();
					if chunk_end > begin && offset < end {
						let from = begin.saturating_sub(offset);
						let to = min(chunk.len(), end - offset);
						out.extend_from_slice(&chunk[from..to]);
					}
					offset = chunk_end;
				});
				Ok(Self::new(out))
			}
		}
	}

	pub fn starts_with(&self, prefix: &[u8]) -> bool {
		if prefix.len() > self.len() {
			return false;
		}
		compare_prefix(self, prefix)
	}

	pub fn ends_with(&self, suffix: &[u8]) -> bool {
		let len = self.len();
		if suffix.len() > len {
			return false;
		}
		let offset = len - suffix.len();
		suffix.iter()
			.enumerate()
			.all(|(i, &b)| self.byte(offset + i) == Some(b))
	}

	/// The first index at or after `from_index` where `needle` occurs.
	pub fn index_of(&self, needle: &[u8], from_index: usize) -> Option<usize> {
		let bytes = self.as_contiguous();
		if needle.is_empty() {
			return (from_index <= bytes.len()).then_some(from_index);
		}
		if from_index >= bytes.len() {
			return None;
		}
		bytes[from_index..]
			.windows(needle.len())
			.position(|window| window == needle)
			.map(|i| i + from_index)
	}

	/// The last index at or before `from_index` where `needle` occurs.
	pub fn last_index_of(&self, needle: &[u8], from_index: usize) -> Option<usize> {
		let bytes = self.as_contiguous();
		let from = min(from_index, bytes.len());
		if needle.is_empty() {
			return Some(from);
		}
		bytes[..min(from.saturating_add(needle.len()), bytes.len())]
			.windows(needle.len())
			.rposition(|window| window == needle)
	}

	/// Decodes the bytes as strict UTF-8.
	pub fn utf8(&self) -> Result<String> {
		let bytes = self.as_contiguous().into_owned();
		match simdutf8::basic::from_utf8(&bytes) {
			// Safety: validated immediately above.
			Ok(_) => Ok(unsafe { String::from_utf8_unchecked(bytes) }),
			Err(err) => Err(Error::invalid_argument(format!("not UTF-8: {err}"))),
		}
	}

	/// Lowercase hexadecimal, two digits per byte.
	pub fn hex(&self) -> String {
		let mut out = String::with_capacity(self.len() * 2);
		self.for_each_chunk(|chunk| {
			out.push_str(&base16ct::lower::encode_string(chunk));
		});
		out
	}

	/// Standard-alphabet base64 with padding.
	pub fn base64(&self) -> String {
		STANDARD.encode(self.as_contiguous())
	}

	/// URL-safe base64 without padding.
	pub fn base64_url(&self) -> String {
		URL_SAFE_NO_PAD.encode(self.as_contiguous())
	}

	fn digest_with<D: Digest>(&self) -> Self {
		let mut digest = D::new();
		self.for_each_chunk(|chunk| digest.update(chunk));
		Self::new(digest.finalize().to_vec())
	}

	pub fn md5(&self) -> Self { self.digest_with::<md5::Md5>() }
	pub fn sha1(&self) -> Self { self.digest_with::<sha1::Sha1>() }
	pub fn sha256(&self) -> Self { self.digest_with::<sha2::Sha256>() }
	pub fn sha512(&self) -> Self { self.digest_with::<sha2::Sha512>() }

	gen_hmac! {
		hmac_sha1 -> sha1::Sha1,
		hmac_sha256 -> sha2::Sha256,
		hmac_sha512 -> sha2::Sha512,
	}

	/// A copy with ASCII letters lowercased; returns a cheap clone when no
	/// byte needs rewriting.
	pub fn to_ascii_lowercase(&self) -> Self {
		self.map_ascii(u8::is_ascii_uppercase, u8::to_ascii_lowercase)
	}

	/// A copy with ASCII letters uppercased; returns a cheap clone when no
	/// byte needs rewriting.
	pub fn to_ascii_uppercase(&self) -> Self {
		self.map_ascii(u8::is_ascii_lowercase, u8::to_ascii_uppercase)
	}

	fn map_ascii(&self, needs: impl Fn(&u8) -> bool, apply: impl Fn(&u8) -> u8) -> Self {
		let mut dirty = false;
		self.for_each_chunk(|chunk| dirty |= chunk.iter().any(&needs));
		if !dirty {
			return self.clone();
		}
		let mut out = self.to_vec();
		for b in &mut out {
			*b = apply(b);
		}
		Self::new(out)
	}

	/// A stable, cached hash of the content. Equal byte strings always have
	/// equal content hashes, regardless of representation.
	pub fn content_hash(&self) -> u64 {
		*self.hash.get_or_init(|| {
			// FNV-1a, streamed chunk by chunk.
			let mut hash: u64 = 0xCBF2_9CE4_8422_2325;
			self.for_each_chunk(|chunk| {
				for &b in chunk {
					hash ^= u64::from(b);
					hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
				}
			});
			hash
		})
	}
}

fn compare_prefix(bytes: &ByteString, mut prefix: &[u8]) -> bool {
	let mut matches = true;
	bytes.for_each_chunk(|chunk| {
		if !matches || prefix.is_empty() {
			return;
		}
		let n = min(chunk.len(), prefix.len());
		matches &= chunk[..n] == prefix[..n];
		prefix = &prefix[n..];
	});
	matches && prefix.is_empty()
}

impl PartialEq for ByteString {
	fn eq(&self, other: &Self) -> bool {
		if self.len() != other.len() {
			return false;
		}
		let mut bytes = Vec::new();
		// Compare without flattening when one side is already contiguous.
		match (&self.repr, &other.repr) {
			(Repr::Flat(lhs), Repr::Flat(rhs)) => return lhs == rhs,
			(Repr::Flat(flat), _) => return compare_prefix(other, flat),
			(_, Repr::Flat(flat)) => return compare_prefix(self, flat),
			_ => self.for_each_chunk(|chunk| bytes.extend_from_slice(chunk)),
		}
		compare_prefix(other, &bytes)
	}
}

impl Eq for ByteString {}

impl PartialEq<[u8]> for ByteString {
	fn eq(&self, other: &[u8]) -> bool {
		self.len() == other.len() && compare_prefix(self, other)
	}
}

impl PartialEq<&[u8]> for ByteString {
	fn eq(&self, other: &&[u8]) -> bool {
		self == *other
	}
}

impl Ord for ByteString {
	fn cmp(&self, other: &Self) -> Ordering {
		let lhs = self.as_contiguous();
		let rhs = other.as_contiguous();
		lhs.cmp(&rhs)
	}
}

impl PartialOrd for ByteString {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Hash for ByteString {
	fn hash<H: Hasher>(&self, state: &mut H) {
		state.write_u64(self.content_hash());
	}
}

impl From<Vec<u8>> for ByteString {
	fn from(value: Vec<u8>) -> Self { Self::new(value) }
}

impl From<&[u8]> for ByteString {
	fn from(value: &[u8]) -> Self { Self::of(value) }
}

impl From<&str> for ByteString {
	fn from(value: &str) -> Self { Self::encode_utf8(value) }
}

impl Display for ByteString {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		const PREVIEW: usize = 64;
		if self.is_empty() {
			return write!(f, "[size=0]");
		}

		let text = self.utf8().ok()
			.filter(|text| !text.chars().any(char::is_control));
		if let Some(text) = text {
			let mut chars = text.chars();
			let preview: String = chars.by_ref().take(PREVIEW).collect();
			return if chars.next().is_some() {
				write!(f, "[size={} text={preview}\u{2026}]", self.len())
			} else {
				write!(f, "[text={preview}]")
			};
		}

		if self.len() <= PREVIEW {
			write!(f, "[size={} hex={}]", self.len(), self.hex())
		} else {
			let prefix = self.substring(0, PREVIEW)
				.unwrap_or_else(|_| Self::empty());
			write!(f, "[size={} hex={}\u{2026}]", self.len(), prefix.hex())
		}
	}
}

impl Debug for ByteString {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "ByteString{self}")
	}
}
