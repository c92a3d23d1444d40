// SPDX-License-Identifier: Apache-2.0

//! ## How it works
//!
//! Bytes live in reusable 8 KiB chunks of memory called *segments*, arranged
//! in a deque to form a [`Buffer`]. Segments are claimed from a process-wide
//! [pool](crate::pool) and returned to it as they drain, so steady-state IO
//! allocates almost nothing. Moving data between buffers relinks whole
//! segments instead of copying them; splitting and copy-on-write sharing keep
//! that cheap even when only part of a segment moves.
//!
//! Two small traits connect buffers to the outside world: a [`Source`] pulls
//! bytes into a buffer, a [`Sink`] pushes bytes out of one. Wrapping either
//! in its [buffered form](crate::BufferedSource) adds the typed read/write
//! surface: integers in both endiannesses, UTF-8 with replacement decoding,
//! lines, decimal and hex numbers, prefix matching over an [`Options`] trie,
//! and non-consuming peeks. Blocking backends honor a [`Timeout`] with an
//! optional absolute deadline.
//!
//! [`ByteString`] is the immutable companion: a shareable byte sequence with
//! hex/base64 codecs, digests, and a segmented form that
//! [`Buffer::snapshot`] produces in constant time per segment. Gzip and
//! deflate [codec adapters](crate::GzipSink), [hashing
//! streams](crate::HashingSource), and a [portable file-system
//! interface](crate::fs::FileSystem) with an [in-memory test
//! double](crate::fs::memory::MemoryFileSystem) round out the toolkit.

mod buffer;
mod buffered;
mod byte_str;
mod codec;
mod error;
pub mod fs;
mod hashing;
mod options;
mod path;
pub mod pool;
mod segment;
pub mod streams;
mod timeout;

pub use buffer::{Buffer, BufferCursor};
pub use buffered::{BufferedSink, BufferedSource, Lines, Peek};
pub use byte_str::ByteString;
pub use codec::{DeflateSink, GzipSink, GzipSource, InflateSource};
pub use error::{combine, Error, ErrorKind, Result};
pub use hashing::{HashAlgorithm, HashingSink, HashingSource, MessageDigest};
pub use options::Options;
pub use path::Path;
pub use segment::{Segment, SIZE as SEGMENT_SIZE};
pub use streams::{Sink, SinkExt, Source, SourceExt};
pub use timeout::Timeout;
