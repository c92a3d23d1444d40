// SPDX-License-Identifier: Apache-2.0

//! An in-memory [`FileSystem`] used as the test double for everything built
//! on the file-system contract. All state lives in one locked map keyed by
//! canonical absolute path; a caller-supplied clock stamps every mutation,
//! and open-but-unclosed streams are tracked so tests can assert leak
//! freedom.

use std::cmp::min;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use parking_lot::Mutex;
use crate::{Buffer, ByteString, Error, Result};
use crate::fs::{FileHandle, FileMetadata, FileSystem};
use crate::path::Path;
use crate::streams::{Sink, Source};

/// Milliseconds since the Unix epoch, from wherever the test wants them.
pub type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
	Box::new(|| {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map_or(0, |elapsed| elapsed.as_millis() as i64)
	})
}

/// A complete, memory-backed file system.
///
/// The unix-like flavor permits deleting and moving files that are open; the
/// windows-like flavor refuses, mirroring host behavior that trips up
/// portable code. Sources snapshot file contents at open, and sinks buffer
/// privately until `flush`/`close` commits, so concurrent readers never see
/// torn writes.
#[derive(Clone)]
pub struct MemoryFileSystem {
	inner: Arc<Inner>,
}

struct Inner {
	state: Mutex<State>,
	clock: Clock,
	windows_limitations: bool,
}

#[derive(Default)]
struct State {
	elements: BTreeMap<String, Element>,
	open_paths: Vec<Path>,
}

enum Element {
	File {
		data: ByteString,
		created_at_ms: i64,
		modified_at_ms: i64,
		accessed_at_ms: i64,
	},
	Directory {
		created_at_ms: i64,
	},
	Symlink {
		target: Path,
		created_at_ms: i64,
	},
}

impl Default for MemoryFileSystem {
	fn default() -> Self { Self::new() }
}

impl MemoryFileSystem {
	/// A unix-like instance on the system clock.
	pub fn new() -> Self {
		Self::with_options(false, system_clock())
	}

	/// A windows-like instance: open files cannot be deleted or moved.
	pub fn windows() -> Self {
		Self::with_options(true, system_clock())
	}

	pub fn with_options(windows_limitations: bool, clock: Clock) -> Self {
		let mut elements = BTreeMap::new();
		elements.insert("/".to_owned(), Element::Directory { created_at_ms: clock() });
		Self {
			inner: Arc::new(Inner {
				state: Mutex::new(State { elements, open_paths: Vec::new() }),
				clock,
				windows_limitations,
			}),
		}
	}

	/// Paths opened as a source, sink, or handle and not yet closed. Tests
	/// assert this is empty at teardown to prove nothing leaked.
	pub fn open_paths(&self) -> Vec<Path> {
		self.inner.state.lock().open_paths.clone()
	}

	fn now(&self) -> i64 {
		(self.inner.clock)()
	}
}

/// Anchors relative paths at the root and renormalizes.
fn absolute(path: &Path) -> Path {
	Path::new("/").resolve(path, true)
}

impl State {
	/// The canonical path for `path`, following symlinks in every component,
	/// and in the final component only when `follow_leaf`. Resolution does
	/// not require the path to exist.
	fn resolve(&self, path: &Path, follow_leaf: bool) -> Result<Path> {
		let mut current = Path::new("/");
		let mut remaining: VecDeque<String> = absolute(path).segments().into();
		let mut hops = 0;

		while let Some(component) = remaining.pop_front() {
			let next = current.resolve(&Path::new(&component), true);
			let is_leaf = remaining.is_empty();
			match self.elements.get(&next.to_string()) {
				Some(Element::Symlink { target, .. }) if follow_leaf || !is_leaf => {
					hops += 1;
					if hops > 40 {
						return Err(Error::io(format!("too many symlinks resolving {path}")));
					}
					let landed = current.resolve(target, true);
					let mut restart: VecDeque<String> = landed.segments().into();
					restart.append(&mut remaining);
					remaining = restart;
					current = Path::new("/");
				}
				_ => current = next,
			}
		}
		Ok(current)
	}

	fn get(&self, canonical: &Path) -> Option<&Element> {
		self.elements.get(&canonical.to_string())
	}

	fn is_directory(&self, canonical: &Path) -> bool {
		matches!(self.get(canonical), Some(Element::Directory { .. }))
	}

	fn require_parent_directory(&self, canonical: &Path) -> Result {
		let Some(parent) = canonical.parent() else {
			return Ok(());
		};
		if self.is_directory(&parent) {
			Ok(())
		} else {
			Err(Error::io(format!("parent {parent} is not an existing directory")))
		}
	}

	/// Direct children of a directory key, in sorted order.
	fn children_of(&self, canonical: &Path) -> Vec<Path> {
		let dir = canonical.to_string();
		let prefix = if dir == "/" { "/".to_owned() } else { format!("{dir}/") };
		self.elements
			.range(prefix.clone()..)
			.take_while(|(key, _)| key.starts_with(&prefix))
			.filter(|(key, _)| **key != dir && !key[prefix.len()..].contains('/'))
			.map(|(key, _)| Path::new(key))
			.collect()
	}

	fn is_open(&self, canonical: &Path) -> bool {
		self.open_paths.contains(canonical)
	}

	fn release(&mut self, canonical: &Path) {
		if let Some(at) = self.open_paths.iter().position(|open| open == canonical) {
			self.open_paths.remove(at);
		}
	}
}

impl Inner {
	/// Stores `data` as the file at `key`, creating or replacing it and
	/// stamping the modification time.
	fn commit(&self, canonical: &Path, data: ByteString) {
		let now = (self.clock)();
		let mut state = self.state.lock();
		let key = canonical.to_string();
		let created_at_ms = match state.elements.get(&key) {
			Some(Element::File { created_at_ms, .. }) => *created_at_ms,
			_ => now,
		};
		state.elements.insert(key, Element::File {
			data,
			created_at_ms,
			modified_at_ms: now,
			accessed_at_ms: now,
		});
	}

	fn release(&self, canonical: &Path) {
		self.state.lock().release(canonical);
	}
}

impl FileSystem for MemoryFileSystem {
	fn canonicalize(&self, path: &Path) -> Result<Path> {
		let state = self.inner.state.lock();
		let resolved = state.resolve(path, true)?;
		if state.get(&resolved).is_some() {
			Ok(resolved)
		} else {
			Err(Error::file_not_found(path))
		}
	}

	fn metadata_or_none(&self, path: &Path) -> Result<Option<FileMetadata>> {
		let state = self.inner.state.lock();
		let resolved = state.resolve(path, false)?;
		let metadata = state.get(&resolved).map(|element| match element {
			Element::File { data, created_at_ms, modified_at_ms, accessed_at_ms } => {
				FileMetadata {
					is_regular_file: true,
					size: Some(data.len() as u64),
					created_at_ms: Some(*created_at_ms),
					last_modified_at_ms: Some(*modified_at_ms),
					last_accessed_at_ms: Some(*accessed_at_ms),
					..FileMetadata::default()
				}
			}
			Element::Directory { created_at_ms } => FileMetadata {
				is_directory: true,
				created_at_ms: Some(*created_at_ms),
				..FileMetadata::default()
			},
			Element::Symlink { target, created_at_ms } => FileMetadata {
				symlink_target: Some(target.clone()),
				created_at_ms: Some(*created_at_ms),
				..FileMetadata::default()
			},
		});
		Ok(metadata)
	}

	fn list(&self, dir: &Path) -> Result<Vec<Path>> {
		let state = self.inner.state.lock();
		let resolved = state.resolve(dir, true)?;
		match state.get(&resolved) {
			None => Err(Error::file_not_found(dir)),
			Some(Element::Directory { .. }) => Ok(state.children_of(&resolved)),
			Some(_) => Err(Error::io(format!("{dir} is not a directory"))),
		}
	}

	fn list_or_none(&self, dir: &Path) -> Result<Option<Vec<Path>>> {
		let state = self.inner.state.lock();
		let resolved = state.resolve(dir, true)?;
		match state.get(&resolved) {
			Some(Element::Directory { .. }) => Ok(Some(state.children_of(&resolved))),
			_ => Ok(None),
		}
	}

	fn source(&self, file: &Path) -> Result<Box<dyn Source>> {
		let now = self.now();
		let mut state = self.inner.state.lock();
		let resolved = state.resolve(file, true)?;
		let data = match state.elements.get_mut(&resolved.to_string()) {
			Some(Element::File { data, accessed_at_ms, .. }) => {
				*accessed_at_ms = now;
				data.clone()
			}
			Some(_) => return Err(Error::io(format!("{file} is not a file"))),
			None => return Err(Error::file_not_found(file)),
		};
		state.open_paths.push(resolved.clone());

		// The snapshot taken here is immune to later writes to the file.
		let mut buffer = Buffer::new();
		buffer.write_byte_string(&data);
		Ok(Box::new(MemorySource {
			fs: Arc::clone(&self.inner),
			canonical: resolved,
			buffer,
			closed: false,
		}))
	}

	fn sink(&self, file: &Path, must_create: bool) -> Result<Box<dyn Sink>> {
		self.open_sink(file, must_create, false, false)
	}

	fn appending_sink(&self, file: &Path, must_exist: bool) -> Result<Box<dyn Sink>> {
		self.open_sink(file, false, must_exist, true)
	}

	fn open_read_only(&self, file: &Path) -> Result<Box<dyn FileHandle>> {
		let mut state = self.inner.state.lock();
		let resolved = state.resolve(file, true)?;
		match state.get(&resolved) {
			Some(Element::File { .. }) => {}
			Some(_) => return Err(Error::io(format!("{file} is not a file"))),
			None => return Err(Error::file_not_found(file)),
		}
		state.open_paths.push(resolved.clone());
		Ok(Box::new(MemoryFileHandle {
			fs: Arc::clone(&self.inner),
			canonical: resolved,
			read_write: false,
			closed: false,
		}))
	}

	fn open_read_write(
		&self,
		file: &Path,
		must_create: bool,
		must_exist: bool,
	) -> Result<Box<dyn FileHandle>> {
		if must_create && must_exist {
			return Err(Error::invalid_argument(
				"must_create and must_exist are mutually exclusive",
			));
		}

		let now = self.now();
		let mut state = self.inner.state.lock();
		let resolved = state.resolve(file, true)?;
		match state.get(&resolved) {
			Some(Element::File { .. }) => {
				if must_create {
					return Err(Error::io(format!("{file} already exists")));
				}
			}
			Some(_) => return Err(Error::io(format!("{file} is not a file"))),
			None => {
				if must_exist {
					return Err(Error::file_not_found(file));
				}
				state.require_parent_directory(&resolved)?;
				state.elements.insert(resolved.to_string(), Element::File {
					data: ByteString::empty(),
					created_at_ms: now,
					modified_at_ms: now,
					accessed_at_ms: now,
				});
			}
		}
		state.open_paths.push(resolved.clone());
		Ok(Box::new(MemoryFileHandle {
			fs: Arc::clone(&self.inner),
			canonical: resolved,
			read_write: true,
			closed: false,
		}))
	}

	fn create_directory(&self, dir: &Path, must_create: bool) -> Result {
		let now = self.now();
		let mut state = self.inner.state.lock();
		let resolved = state.resolve(dir, true)?;
		match state.get(&resolved) {
			Some(Element::Directory { .. }) => {
				if must_create {
					Err(Error::io(format!("{dir} already exists")))
				} else {
					Ok(())
				}
			}
			Some(_) => Err(Error::io(format!("{dir} already exists and is not a directory"))),
			None => {
				state.require_parent_directory(&resolved)?;
				state.elements.insert(
					resolved.to_string(),
					Element::Directory { created_at_ms: now },
				);
				Ok(())
			}
		}
	}

	fn atomic_move(&self, source: &Path, target: &Path) -> Result {
		let mut state = self.inner.state.lock();
		let from = state.resolve(source, false)?;
		let to = state.resolve(target, false)?;

		if state.get(&from).is_none() {
			return Err(Error::file_not_found(source));
		}
		if state.is_directory(&to) {
			return Err(Error::io(format!("{target} is an existing directory")));
		}
		state.require_parent_directory(&to)?;
		if self.inner.windows_limitations && (state.is_open(&from) || state.is_open(&to)) {
			return Err(Error::io(format!("cannot move open file {source}")));
		}

		let from_key = from.to_string();
		let to_key = to.to_string();
		if state.is_directory(&from) {
			// Move the whole subtree by rewriting key prefixes.
			let sub_prefix = format!("{from_key}/");
			let moved: Vec<String> = state.elements.keys()
				.filter(|key| **key == from_key || key.starts_with(&sub_prefix))
				.cloned()
				.collect();
			for key in moved {
				let Some(element) = state.elements.remove(&key) else { continue };
				let new_key = format!("{to_key}{}", &key[from_key.len()..]);
				state.elements.insert(new_key, element);
			}
		} else {
			let Some(element) = state.elements.remove(&from_key) else {
				return Err(Error::file_not_found(source));
			};
			state.elements.insert(to_key, element);
		}
		Ok(())
	}

	fn delete(&self, path: &Path, must_exist: bool) -> Result {
		let mut state = self.inner.state.lock();
		let resolved = state.resolve(path, false)?;
		match state.get(&resolved) {
			None => {
				if must_exist {
					Err(Error::file_not_found(path))
				} else {
					Ok(())
				}
			}
			Some(Element::Directory { .. }) if !state.children_of(&resolved).is_empty() => {
				Err(Error::io(format!("{path} is not empty")))
			}
			Some(_) => {
				if self.inner.windows_limitations && state.is_open(&resolved) {
					return Err(Error::io(format!("cannot delete open file {path}")));
				}
				state.elements.remove(&resolved.to_string());
				Ok(())
			}
		}
	}

	fn create_symlink(&self, link: &Path, target: &Path) -> Result {
		let now = self.now();
		let mut state = self.inner.state.lock();
		let resolved = state.resolve(link, false)?;
		if state.get(&resolved).is_some() {
			return Err(Error::io(format!("{link} already exists")));
		}
		state.require_parent_directory(&resolved)?;
		state.elements.insert(resolved.to_string(), Element::Symlink {
			target: target.clone(),
			created_at_ms: now,
		});
		Ok(())
	}
}

impl MemoryFileSystem {
	fn open_sink(
		&self,
		file: &Path,
		must_create: bool,
		must_exist: bool,
		append: bool,
	) -> Result<Box<dyn Sink>> {
		let mut state = self.inner.state.lock();
		let resolved = state.resolve(file, true)?;

		let existing = match state.get(&resolved) {
			Some(Element::File { data, .. }) => Some(data.clone()),
			Some(_) => return Err(Error::io(format!("{file} is not a writable file"))),
			None => None,
		};
		if must_create && existing.is_some() {
			return Err(Error::io(format!("{file} already exists")));
		}
		if must_exist && existing.is_none() {
			return Err(Error::io(format!("{file} does not exist")));
		}
		state.require_parent_directory(&resolved)?;
		state.open_paths.push(resolved.clone());
		drop(state);

		let mut content = Buffer::new();
		if append {
			if let Some(base) = &existing {
				content.write_byte_string(base);
			}
		}
		// Opening truncates (or creates) immediately, like a host file
		// system; the written content lands on flush and close.
		self.inner.commit(&resolved, match append {
			true => existing.unwrap_or_else(ByteString::empty),
			false => ByteString::empty(),
		});

		Ok(Box::new(MemorySink {
			fs: Arc::clone(&self.inner),
			canonical: resolved,
			content,
			closed: false,
		}))
	}
}

struct MemorySource {
	fs: Arc<Inner>,
	canonical: Path,
	buffer: Buffer,
	closed: bool,
}

impl Source for MemorySource {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		if self.closed {
			return Err(Error::closed());
		}
		let n = min(byte_count, self.buffer.size());
		self.buffer.transfer_to(sink, n)?;
		Ok(n)
	}

	fn close_source(&mut self) -> Result {
		if !self.closed {
			self.closed = true;
			self.fs.release(&self.canonical);
		}
		Ok(())
	}
}

impl Drop for MemorySource {
	fn drop(&mut self) {
		let _ = self.close_source();
	}
}

struct MemorySink {
	fs: Arc<Inner>,
	canonical: Path,
	content: Buffer,
	closed: bool,
}

impl MemorySink {
	fn commit(&mut self) {
		self.fs.commit(&self.canonical, self.content.snapshot());
	}
}

impl Sink for MemorySink {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		if self.closed {
			return Err(Error::closed());
		}
		source.transfer_to(&mut self.content, byte_count)
	}

	fn flush(&mut self) -> Result {
		if self.closed {
			return Err(Error::closed());
		}
		self.commit();
		Ok(())
	}

	fn close_sink(&mut self) -> Result {
		if !self.closed {
			self.closed = true;
			self.commit();
			self.fs.release(&self.canonical);
		}
		Ok(())
	}
}

impl Drop for MemorySink {
	fn drop(&mut self) {
		let _ = self.close_sink();
	}
}

struct MemoryFileHandle {
	fs: Arc<Inner>,
	canonical: Path,
	read_write: bool,
	closed: bool,
}

impl MemoryFileHandle {
	fn check_open(&self) -> Result {
		if self.closed {
			Err(Error::closed())
		} else {
			Ok(())
		}
	}

	fn with_data<R>(&self, f: impl FnOnce(&ByteString) -> R) -> Result<R> {
		let state = self.fs.state.lock();
		match state.get(&self.canonical) {
			Some(Element::File { data, .. }) => Ok(f(data)),
			_ => Err(Error::file_not_found(&self.canonical)),
		}
	}

	fn update_data(&self, f: impl FnOnce(Vec<u8>) -> Vec<u8>) -> Result {
		let data = self.with_data(ByteString::to_vec)?;
		self.fs.commit(&self.canonical, ByteString::new(f(data)));
		Ok(())
	}
}

impl FileHandle for MemoryFileHandle {
	fn is_read_write(&self) -> bool {
		self.read_write
	}

	fn read(&mut self, file_offset: u64, dst: &mut [u8]) -> Result<usize> {
		self.check_open()?;
		self.with_data(|data| {
			let len = data.len() as u64;
			if file_offset >= len {
				return 0;
			}
			let from = file_offset as usize;
			let n = min(dst.len(), data.len() - from);
			let mut copied = 0;
			let mut offset = 0;
			data.for_each_chunk(|chunk| {
				let chunk_end = offset + chunk.len();
				if chunk_end > from && copied < n {
					let begin = if offset >= from { 0 } else { from - offset };
					let take = min(chunk.len() - begin, n - copied);
					dst[copied..copied + take].copy_from_slice(&chunk[begin..begin + take]);
					copied += take;
				}
				offset = chunk_end;
			});
			copied
		})
	}

	fn write(&mut self, file_offset: u64, src: &[u8]) -> Result {
		self.check_open()?;
		if !self.read_write {
			return Err(Error::io("file handle is read-only"));
		}
		let offset = file_offset as usize;
		self.update_data(|mut data| {
			if data.len() < offset {
				data.resize(offset, 0);
			}
			let overlap = min(src.len(), data.len() - offset);
			data[offset..offset + overlap].copy_from_slice(&src[..overlap]);
			data.extend_from_slice(&src[overlap..]);
			data
		})
	}

	fn size(&self) -> Result<u64> {
		self.check_open()?;
		self.with_data(|data| data.len() as u64)
	}

	fn resize(&mut self, new_size: u64) -> Result {
		self.check_open()?;
		if !self.read_write {
			return Err(Error::io("file handle is read-only"));
		}
		self.update_data(|mut data| {
			data.resize(new_size as usize, 0);
			data
		})
	}

	fn flush(&mut self) -> Result {
		self.check_open()
	}

	fn close(&mut self) -> Result {
		if !self.closed {
			self.closed = true;
			self.fs.release(&self.canonical);
		}
		Ok(())
	}
}

impl Drop for MemoryFileHandle {
	fn drop(&mut self) {
		let _ = self.close();
	}
}

#[cfg(test)]
mod test {
	use pretty_assertions::assert_eq;
	use crate::fs::{FileHandle, FileSystem};
	use crate::path::Path;
	use crate::streams::{Source, SourceExt};
	use crate::Buffer;
	use super::MemoryFileSystem;

	fn path(s: &str) -> Path { Path::new(s) }

	fn fixed_clock() -> super::Clock {
		Box::new(|| 1_700_000_000_000)
	}

	fn write_text(fs: &MemoryFileSystem, at: &str, text: &str) {
		fs.write(&path(at), |sink| sink.write_utf8(text)).unwrap();
	}

	fn read_text(fs: &MemoryFileSystem, at: &str) -> String {
		fs.read(&path(at), |source| source.read_utf8_all()).unwrap()
	}

	#[test]
	fn write_then_read_round_trips() {
		let fs = MemoryFileSystem::new();
		write_text(&fs, "/greeting.txt", "hello there");
		assert_eq!(read_text(&fs, "/greeting.txt"), "hello there");
		assert!(fs.open_paths().is_empty());
	}

	#[test]
	fn create_directory_requires_parent() {
		let fs = MemoryFileSystem::new();
		assert!(fs.create_directory(&path("/a/b/c"), false).is_err());
		fs.create_directories(&path("/a/b/c"), false).unwrap();
		assert!(fs.metadata(&path("/a/b/c")).unwrap().is_directory);
		// Idempotent unless must_create.
		fs.create_directories(&path("/a/b/c"), false).unwrap();
		assert!(fs.create_directories(&path("/a/b/c"), true).is_err());
	}

	#[test]
	fn sources_snapshot_at_open() {
		let fs = MemoryFileSystem::new();
		write_text(&fs, "/data", "original");

		let mut source = fs.source(&path("/data")).unwrap();
		write_text(&fs, "/data", "replaced");

		let mut buf = Buffer::new();
		source.read_to_end(&mut buf).unwrap();
		assert_eq!(buf.read_utf8_all().unwrap(), "original");
		source.close_source().unwrap();
		assert!(fs.open_paths().is_empty());
	}

	#[test]
	fn sink_commits_on_close_and_tracks_open_paths() {
		let fs = MemoryFileSystem::new();
		{
			let mut sink = fs.sink(&path("/out"), false).unwrap();
			assert_eq!(fs.open_paths(), vec![path("/out")]);
			let mut buf = Buffer::from("payload");
			use crate::streams::Sink;
			sink.write(&mut buf, 7).unwrap();
			sink.close_sink().unwrap();
		}
		assert_eq!(read_text(&fs, "/out"), "payload");
		assert!(fs.open_paths().is_empty());
	}

	#[test]
	fn must_create_and_must_exist() {
		let fs = MemoryFileSystem::new();
		write_text(&fs, "/exists", "x");
		assert!(fs.sink(&path("/exists"), true).is_err());
		assert!(fs.appending_sink(&path("/missing"), true).is_err());

		fs.write(&path("/log"), |sink| sink.write_utf8("one")).unwrap();
		{
			let mut sink = fs.appending_sink(&path("/log"), true).unwrap()
				.buffered();
			use crate::streams::{SinkExt as _, Sink as _};
			sink.write_utf8(" two").unwrap();
			sink.close_sink().unwrap();
		}
		assert_eq!(read_text(&fs, "/log"), "one two");
	}

	#[test]
	fn list_is_sorted_and_full_paths() {
		let fs = MemoryFileSystem::new();
		fs.create_directory(&path("/dir"), false).unwrap();
		write_text(&fs, "/dir/b", "");
		write_text(&fs, "/dir/a", "");
		fs.create_directory(&path("/dir/c"), false).unwrap();

		let listed = fs.list(&path("/dir")).unwrap();
		assert_eq!(listed, vec![path("/dir/a"), path("/dir/b"), path("/dir/c")]);

		assert!(fs.list(&path("/missing")).unwrap_err().is_file_not_found());
		assert!(fs.list(&path("/dir/a")).is_err());
		assert_eq!(fs.list_or_none(&path("/dir/a")).unwrap(), None);
		assert_eq!(fs.list_or_none(&path("/missing")).unwrap(), None);
	}

	#[test]
	fn list_recursively_is_preorder() {
		let fs = MemoryFileSystem::new();
		fs.create_directories(&path("/r/a/inner"), false).unwrap();
		write_text(&fs, "/r/a/inner/file", "");
		write_text(&fs, "/r/b", "");

		let walked: Vec<String> = fs.list_recursively(&path("/r"), false)
			.map(|entry| entry.unwrap().to_string())
			.collect();
		assert_eq!(walked, ["/r/a", "/r/a/inner", "/r/a/inner/file", "/r/b"]);
	}

	#[test]
	fn list_recursively_follows_symlinked_directories() {
		let fs = MemoryFileSystem::new();
		fs.create_directories(&path("/real/sub"), false).unwrap();
		write_text(&fs, "/real/sub/file", "x");
		fs.create_symlink(&path("/link"), &path("/real")).unwrap();

		// Without following, the link is listed but never entered.
		let shallow: Vec<String> = fs.list_recursively(&path("/"), false)
			.map(|entry| entry.unwrap().to_string())
			.collect();
		assert_eq!(shallow, ["/link", "/real", "/real/sub", "/real/sub/file"]);

		// Following descends through the link into the target's subtree.
		let deep: Vec<String> = fs.list_recursively(&path("/"), true)
			.map(|entry| entry.unwrap().to_string())
			.collect();
		assert_eq!(deep, [
			"/link",
			"/real/sub",
			"/real/sub/file",
			"/real",
			"/real/sub",
			"/real/sub/file",
		]);
	}

	#[test]
	fn list_recursively_detects_symlink_cycles() {
		let fs = MemoryFileSystem::new();
		fs.create_directory(&path("/a"), false).unwrap();
		fs.create_symlink(&path("/a/loop"), &path("/a")).unwrap();

		// Without following, the loop is just an entry.
		let safe: Vec<String> = fs.list_recursively(&path("/a"), false)
			.map(|entry| entry.unwrap().to_string())
			.collect();
		assert_eq!(safe, ["/a/loop"]);

		// Following it would re-enter a directory on the active chain.
		let outcome: Vec<_> = fs.list_recursively(&path("/a"), true).collect();
		assert_eq!(outcome.len(), 1);
		assert!(outcome[0].is_err());
	}

	#[test]
	fn symlinks_resolve_and_canonicalize() {
		let fs = MemoryFileSystem::new();
		fs.create_directory(&path("/real"), false).unwrap();
		write_text(&fs, "/real/file", "via link");
		fs.create_symlink(&path("/link"), &path("/real")).unwrap();

		assert_eq!(read_text(&fs, "/link/file"), "via link");
		assert_eq!(fs.canonicalize(&path("/link/file")).unwrap(), path("/real/file"));

		let metadata = fs.metadata(&path("/link")).unwrap();
		assert_eq!(metadata.symlink_target, Some(path("/real")));

		assert!(fs.create_symlink(&path("/nope/link"), &path("/real")).is_err());
		assert!(fs.create_symlink(&path("/link"), &path("/real")).is_err());
	}

	#[test]
	fn symlink_cycles_are_detected() {
		let fs = MemoryFileSystem::new();
		fs.create_symlink(&path("/a"), &path("/b")).unwrap();
		fs.create_symlink(&path("/b"), &path("/a")).unwrap();
		assert!(fs.canonicalize(&path("/a/leaf")).is_err());
	}

	#[test]
	fn atomic_move_renames_subtrees() {
		let fs = MemoryFileSystem::new();
		fs.create_directories(&path("/from/deep"), false).unwrap();
		write_text(&fs, "/from/deep/file", "cargo");

		fs.create_directory(&path("/to"), false).unwrap();
		fs.atomic_move(&path("/from"), &path("/to/moved")).unwrap();
		assert_eq!(read_text(&fs, "/to/moved/deep/file"), "cargo");
		assert!(!fs.exists(&path("/from")).unwrap());

		assert!(fs.atomic_move(&path("/ghost"), &path("/to/x")).unwrap_err().is_file_not_found());
		assert!(fs.atomic_move(&path("/to/moved/deep/file"), &path("/to")).is_err());
	}

	#[test]
	fn delete_semantics() {
		let fs = MemoryFileSystem::new();
		fs.create_directory(&path("/dir"), false).unwrap();
		write_text(&fs, "/dir/file", "");

		assert!(fs.delete(&path("/dir"), false).is_err());
		fs.delete(&path("/missing"), false).unwrap();
		assert!(fs.delete(&path("/missing"), true).unwrap_err().is_file_not_found());

		fs.delete_recursively(&path("/dir"), true).unwrap();
		assert!(!fs.exists(&path("/dir")).unwrap());
	}

	#[test]
	fn windows_mode_refuses_touching_open_files() {
		let fs = MemoryFileSystem::windows();
		write_text(&fs, "/busy", "x");
		let source = fs.source(&path("/busy")).unwrap();
		assert!(fs.delete(&path("/busy"), true).is_err());
		assert!(fs.atomic_move(&path("/busy"), &path("/elsewhere")).is_err());
		drop(source);
		fs.delete(&path("/busy"), true).unwrap();

		// The unix-like flavor allows both.
		let fs = MemoryFileSystem::new();
		write_text(&fs, "/busy", "x");
		let _source = fs.source(&path("/busy")).unwrap();
		fs.delete(&path("/busy"), true).unwrap();
	}

	#[test]
	fn file_handles_read_write_resize() {
		let fs = MemoryFileSystem::new();
		let mut handle = fs.open_read_write(&path("/handle"), false, false).unwrap();
		handle.write(0, b"0123456789").unwrap();
		handle.write(4, b"xx").unwrap();

		let mut dst = [0; 10];
		assert_eq!(handle.read(0, &mut dst).unwrap(), 10);
		assert_eq!(&dst, b"0123xx6789");

		handle.resize(4).unwrap();
		assert_eq!(handle.size().unwrap(), 4);
		assert_eq!(handle.read(2, &mut dst).unwrap(), 2);

		// Writing past the end zero-fills the gap.
		handle.write(6, b"end").unwrap();
		assert_eq!(handle.size().unwrap(), 9);
		let mut all = [0; 9];
		handle.read(0, &mut all).unwrap();
		assert_eq!(&all, b"0123\0\0end");

		handle.close().unwrap();
		handle.close().unwrap();
		assert!(handle.read(0, &mut dst).unwrap_err().is_closed());
		assert!(fs.open_paths().is_empty());
	}

	#[test]
	fn read_only_handles_refuse_writes() {
		let fs = MemoryFileSystem::new();
		write_text(&fs, "/ro", "fixed");
		let mut handle = fs.open_read_only(&path("/ro")).unwrap();
		assert!(!handle.is_read_write());
		assert!(handle.write(0, b"x").is_err());
		assert!(handle.resize(0).is_err());

		assert!(fs.open_read_write(&path("/x"), true, true).is_err());
	}

	#[test]
	fn handle_views_advance_cursors() {
		let fs = MemoryFileSystem::new();
		write_text(&fs, "/seq", "abcdefgh");
		let mut handle = fs.open_read_write(&path("/seq"), false, true).unwrap();

		{
			let mut source = handle.source_at(4);
			let mut buf = Buffer::new();
			use crate::streams::SourceExt as _;
			source.read_to_end(&mut buf).unwrap();
			assert_eq!(buf.read_utf8_all().unwrap(), "efgh");
		}
		{
			use crate::streams::Sink as _;
			let mut sink = handle.sink_at(0);
			let mut buf = Buffer::from("XY");
			sink.write(&mut buf, 2).unwrap();
		}
		let mut dst = [0; 8];
		handle.read(0, &mut dst).unwrap();
		assert_eq!(&dst, b"XYcdefgh");
	}

	#[test]
	fn injected_clock_stamps_metadata() {
		let fs = MemoryFileSystem::with_options(false, fixed_clock());
		write_text(&fs, "/stamped", "x");
		let metadata = fs.metadata(&path("/stamped")).unwrap();
		assert_eq!(metadata.last_modified_at_ms, Some(1_700_000_000_000));
		assert_eq!(metadata.size, Some(1));
	}

	#[test]
	fn relative_paths_anchor_at_root() {
		let fs = MemoryFileSystem::new();
		write_text(&fs, "rooted", "x");
		assert!(fs.exists(&path("/rooted")).unwrap());
		assert_eq!(fs.canonicalize(&path("rooted")).unwrap(), path("/rooted"));
		// Dot-dot cannot escape the root.
		assert_eq!(fs.canonicalize(&path("../../rooted")).unwrap(), path("/rooted"));
	}
}
