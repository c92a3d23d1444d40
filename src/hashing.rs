// SPDX-License-Identifier: Apache-2.0

//! Streaming digests and the hashing stream adapters.

use digest::Digest;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use crate::{Buffer, ByteString, Error, Result};
use crate::streams::{Sink, Source};
use crate::timeout::Timeout;

/// The digest algorithms the buffer and streams understand.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashAlgorithm {
	Md5,
	Sha1,
	Sha256,
	Sha512,
}

/// A streaming digest: plain or HMAC, selected at runtime.
///
/// [`finish`](Self::finish) returns the digest of everything fed so far and
/// resets, so one instance can hash a sequence of messages.
pub struct MessageDigest {
	inner: Inner,
}

enum Inner {
	Md5(Md5),
	Sha1(Sha1),
	Sha256(Sha256),
	Sha512(Sha512),
	HmacSha1(Hmac<Sha1>),
	HmacSha256(Hmac<Sha256>),
	HmacSha512(Hmac<Sha512>),
}

impl MessageDigest {
	pub fn new(algorithm: HashAlgorithm) -> Self {
		let inner = match algorithm {
			HashAlgorithm::Md5 => Inner::Md5(Md5::new()),
			HashAlgorithm::Sha1 => Inner::Sha1(Sha1::new()),
			HashAlgorithm::Sha256 => Inner::Sha256(Sha256::new()),
			HashAlgorithm::Sha512 => Inner::Sha512(Sha512::new()),
		};
		Self { inner }
	}

	/// A keyed digest. The key must be non-empty; MD5 has no HMAC form
	/// here.
	pub fn hmac(algorithm: HashAlgorithm, key: &ByteString) -> Result<Self> {
		if key.is_empty() {
			return Err(Error::invalid_argument("empty HMAC key"));
		}
		let key = key.as_contiguous();
		let bad_key = |err| Error::invalid_argument(format!("bad HMAC key: {err}"));
		let inner = match algorithm {
			HashAlgorithm::Md5 => {
				return Err(Error::invalid_argument("no HMAC-MD5 support"));
			}
			HashAlgorithm::Sha1 => {
				Inner::HmacSha1(Hmac::new_from_slice(&key).map_err(bad_key)?)
			}
			HashAlgorithm::Sha256 => {
				Inner::HmacSha256(Hmac::new_from_slice(&key).map_err(bad_key)?)
			}
			HashAlgorithm::Sha512 => {
				Inner::HmacSha512(Hmac::new_from_slice(&key).map_err(bad_key)?)
			}
		};
		Ok(Self { inner })
	}

	pub fn update(&mut self, bytes: &[u8]) {
		match &mut self.inner {
			Inner::Md5(d) => Digest::update(d, bytes),
			Inner::Sha1(d) => Digest::update(d, bytes),
			Inner::Sha256(d) => Digest::update(d, bytes),
			Inner::Sha512(d) => Digest::update(d, bytes),
			Inner::HmacSha1(m) => m.update(bytes),
			Inner::HmacSha256(m) => m.update(bytes),
			Inner::HmacSha512(m) => m.update(bytes),
		}
	}

	/// The digest of all bytes fed since construction or the last finish.
	/// Resets, so the next [`update`](Self::update) starts a new digest.
	pub fn finish(&mut self) -> ByteString {
		let bytes = match &mut self.inner {
			Inner::Md5(d) => d.finalize_reset().to_vec(),
			Inner::Sha1(d) => d.finalize_reset().to_vec(),
			Inner::Sha256(d) => d.finalize_reset().to_vec(),
			Inner::Sha512(d) => d.finalize_reset().to_vec(),
			Inner::HmacSha1(m) => m.finalize_reset().into_bytes().to_vec(),
			Inner::HmacSha256(m) => m.finalize_reset().into_bytes().to_vec(),
			Inner::HmacSha512(m) => m.finalize_reset().into_bytes().to_vec(),
		};
		ByteString::new(bytes)
	}
}

impl Buffer {
	/// The digest of all buffered bytes, consuming nothing.
	pub fn digest(&self, algorithm: HashAlgorithm) -> ByteString {
		let mut digest = MessageDigest::new(algorithm);
		self.for_each_chunk_in(0, self.size(), |chunk| digest.update(chunk));
		digest.finish()
	}

	/// The keyed digest of all buffered bytes, consuming nothing.
	pub fn hmac(&self, algorithm: HashAlgorithm, key: &ByteString) -> Result<ByteString> {
		let mut digest = MessageDigest::hmac(algorithm, key)?;
		self.for_each_chunk_in(0, self.size(), |chunk| digest.update(chunk));
		Ok(digest.finish())
	}
}

/// A forwarding source that feeds every byte read through it into a digest.
///
/// Errors pass through untouched; only successfully delivered bytes are
/// hashed.
pub struct HashingSource<S: Source> {
	source: S,
	digest: MessageDigest,
}

impl<S: Source> HashingSource<S> {
	pub fn new(source: S, digest: MessageDigest) -> Self {
		Self { source, digest }
	}

	/// The digest of everything read so far; resets the running state.
	pub fn hash(&mut self) -> ByteString {
		self.digest.finish()
	}

	pub fn get_mut(&mut self) -> &mut S {
		&mut self.source
	}
}

impl<S: Source> Source for HashingSource<S> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		let start = sink.size();
		let read = self.source.read(sink, byte_count)?;
		let digest = &mut self.digest;
		sink.for_each_chunk_in(start, start + read, |chunk| digest.update(chunk));
		Ok(read)
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.source.timeout_mut()
	}

	fn close_source(&mut self) -> Result {
		self.source.close_source()
	}
}

/// A forwarding sink that feeds every byte written through it into a digest.
pub struct HashingSink<S: Sink> {
	sink: S,
	digest: MessageDigest,
}

impl<S: Sink> HashingSink<S> {
	pub fn new(sink: S, digest: MessageDigest) -> Self {
		Self { sink, digest }
	}

	/// The digest of everything written so far; resets the running state.
	pub fn hash(&mut self) -> ByteString {
		self.digest.finish()
	}

	pub fn get_mut(&mut self) -> &mut S {
		&mut self.sink
	}
}

impl<S: Sink> Sink for HashingSink<S> {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		source.require(byte_count)?;
		let digest = &mut self.digest;
		source.for_each_chunk_in(0, byte_count, |chunk| digest.update(chunk));
		self.sink.write(source, byte_count)
	}

	fn flush(&mut self) -> Result {
		self.sink.flush()
	}

	fn timeout_mut(&mut self) -> Option<&mut Timeout> {
		self.sink.timeout_mut()
	}

	fn close_sink(&mut self) -> Result {
		self.sink.close_sink()
	}
}

#[cfg(test)]
mod test {
	use pretty_assertions::assert_eq;
	use crate::{Buffer, ByteString};
	use crate::streams::{blackhole, Sink, Source, SourceExt};
	use super::{HashAlgorithm, HashingSink, HashingSource, MessageDigest};

	const ABC_SHA256: &str =
		"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

	#[test]
	fn buffer_digest_does_not_consume() {
		let mut buf = Buffer::from("abc");
		assert_eq!(buf.digest(HashAlgorithm::Sha256).hex(), ABC_SHA256);
		assert_eq!(buf.size(), 3);
		assert_eq!(buf.read_utf8_all().unwrap(), "abc");
	}

	#[test]
	fn hashing_source_sees_read_bytes() {
		let mut source = HashingSource::new(
			&b"abc"[..],
			MessageDigest::new(HashAlgorithm::Sha256),
		);
		let mut sink = Buffer::new();
		source.read_to_end(&mut sink).unwrap();
		assert_eq!(source.hash().hex(), ABC_SHA256);
	}

	#[test]
	fn hashing_sink_sees_written_bytes() {
		let mut sink = HashingSink::new(
			blackhole(),
			MessageDigest::new(HashAlgorithm::Sha256),
		);
		let mut buf = Buffer::from("abc");
		sink.write(&mut buf, 3).unwrap();
		assert_eq!(sink.hash().hex(), ABC_SHA256);
	}

	#[test]
	fn finish_resets_the_digest() {
		let mut digest = MessageDigest::new(HashAlgorithm::Md5);
		digest.update(b"first");
		let first = digest.finish();
		digest.update(b"first");
		assert_eq!(digest.finish(), first);
	}

	#[test]
	fn hmac_matches_byte_string_hmac() {
		let key = ByteString::encode_utf8("key");
		let mut buf = Buffer::from("message");
		let streamed = buf.hmac(HashAlgorithm::Sha256, &key).unwrap();
		let direct = ByteString::encode_utf8("message").hmac_sha256(&key).unwrap();
		assert_eq!(streamed, direct);
	}

	#[test]
	fn hmac_rejects_empty_keys() {
		assert!(MessageDigest::hmac(HashAlgorithm::Sha256, &ByteString::empty()).is_err());
	}
}
