// SPDX-License-Identifier: Apache-2.0

//! The portable file-system contract: one abstract operation set that every
//! backend honors identically, plus the decorator used to build restricted
//! views. The crate ships a single concrete backend, the in-memory
//! [`MemoryFileSystem`](memory::MemoryFileSystem) test double.

pub mod memory;

use std::cmp::min;
use std::collections::HashMap;
use crate::{Error, Result};
use crate::buffer::Buffer;
use crate::buffered::{BufferedSink, BufferedSource};
use crate::path::Path;
use crate::streams::{Sink, Source, SourceExt, SinkExt};

/// What a backend knows about one path. Only the two type booleans are
/// mandatory; everything else is host-dependent.
#[derive(Clone, Debug, Default)]
pub struct FileMetadata {
	pub is_regular_file: bool,
	pub is_directory: bool,
	pub symlink_target: Option<Path>,
	pub size: Option<u64>,
	pub created_at_ms: Option<i64>,
	pub last_modified_at_ms: Option<i64>,
	pub last_accessed_at_ms: Option<i64>,
	/// Backend-specific attributes, opaque tag to opaque value.
	pub extras: HashMap<String, String>,
}

impl FileMetadata {
	pub fn file() -> Self {
		Self { is_regular_file: true, ..Self::default() }
	}

	pub fn directory() -> Self {
		Self { is_directory: true, ..Self::default() }
	}

	pub fn symlink(target: Path) -> Self {
		Self { symlink_target: Some(target), ..Self::default() }
	}

	pub fn is_symlink(&self) -> bool {
		self.symlink_target.is_some()
	}
}

/// An open file supporting random access reads and, for read-write handles,
/// writes and resizing.
pub trait FileHandle {
	/// `true` when the handle was opened for writing as well as reading.
	fn is_read_write(&self) -> bool;

	/// Copies up to `dst.len()` bytes starting at `file_offset` into `dst`,
	/// returning the count read; zero only at or past end of file.
	fn read(&mut self, file_offset: u64, dst: &mut [u8]) -> Result<usize>;

	/// Writes all of `src` at `file_offset`, extending the file as needed.
	/// Fails with [`Io`](crate::ErrorKind::Io) on read-only handles.
	fn write(&mut self, file_offset: u64, src: &[u8]) -> Result;

	/// The current file size in bytes.
	fn size(&self) -> Result<u64>;

	/// Truncates or zero-extends the file to `new_size`.
	fn resize(&mut self, new_size: u64) -> Result;

	/// Pushes written bytes to the backing store.
	fn flush(&mut self) -> Result;

	/// Releases the handle. Idempotent; other operations fail with
	/// [`Closed`](crate::ErrorKind::Closed) afterwards.
	fn close(&mut self) -> Result;

	/// A sequential [`Source`] over the file starting at `offset`. The view
	/// borrows the handle; drop it before using the handle directly again.
	fn source_at(&mut self, offset: u64) -> HandleSource<'_, Self>
	where Self: Sized {
		HandleSource { handle: self, position: offset }
	}

	/// A sequential [`Sink`] into the file starting at `offset`.
	fn sink_at(&mut self, offset: u64) -> HandleSink<'_, Self>
	where Self: Sized {
		HandleSink { handle: self, position: offset }
	}
}

impl<H: FileHandle + ?Sized> FileHandle for Box<H> {
	fn is_read_write(&self) -> bool { (**self).is_read_write() }

	fn read(&mut self, file_offset: u64, dst: &mut [u8]) -> Result<usize> {
		(**self).read(file_offset, dst)
	}

	fn write(&mut self, file_offset: u64, src: &[u8]) -> Result {
		(**self).write(file_offset, src)
	}

	fn size(&self) -> Result<u64> { (**self).size() }

	fn resize(&mut self, new_size: u64) -> Result { (**self).resize(new_size) }

	fn flush(&mut self) -> Result { (**self).flush() }

	fn close(&mut self) -> Result { (**self).close() }
}

/// A cursor-advancing read view over a [`FileHandle`].
pub struct HandleSource<'h, H: FileHandle> {
	handle: &'h mut H,
	position: u64,
}

impl<H: FileHandle> Source for HandleSource<'_, H> {
	fn read(&mut self, sink: &mut Buffer, byte_count: usize) -> Result<usize> {
		if byte_count == 0 {
			return Ok(0);
		}
		let read = {
			let tail = sink.writable_segment(1);
			let n = min(byte_count, tail.writable_len());
			let read = self.handle.read(self.position, &mut tail.writable()[..n])?;
			tail.add(read);
			read
		};
		sink.grow(read);
		self.position += read as u64;
		Ok(read)
	}
}

/// A cursor-advancing write view over a [`FileHandle`].
pub struct HandleSink<'h, H: FileHandle> {
	handle: &'h mut H,
	position: u64,
}

impl<H: FileHandle> Sink for HandleSink<'_, H> {
	fn write(&mut self, source: &mut Buffer, byte_count: usize) -> Result {
		source.require(byte_count)?;
		let mut remaining = byte_count;
		while remaining > 0 {
			let n = {
				let head = source.head_data()
					.ok_or_else(Error::premature_eof)?;
				let n = min(head.len(), remaining);
				self.handle.write(self.position, &head[..n])?;
				n
			};
			source.skip(n)?;
			self.position += n as u64;
			remaining -= n;
		}
		Ok(())
	}

	fn flush(&mut self) -> Result {
		self.handle.flush()
	}
}

/// The abstract file-system operation set.
///
/// Implementations interpret relative paths against their own working
/// directory and are safe for concurrent use; the streams and handles they
/// return are single-owner.
pub trait FileSystem: Send + Sync {
	/// The absolute, symlink-free path of an existing file or directory.
	fn canonicalize(&self, path: &Path) -> Result<Path>;

	/// Metadata, or `None` when nothing exists at `path`.
	fn metadata_or_none(&self, path: &Path) -> Result<Option<FileMetadata>>;

	/// Metadata, failing with
	/// [`FileNotFound`](crate::ErrorKind::FileNotFound) when nothing exists
	/// at `path`.
	fn metadata(&self, path: &Path) -> Result<FileMetadata> {
		self.metadata_or_none(path)?
			.ok_or_else(|| Error::file_not_found(path))
	}

	fn exists(&self, path: &Path) -> Result<bool> {
		Ok(self.metadata_or_none(path)?.is_some())
	}

	/// The immediate children of a directory as full paths, sorted.
	fn list(&self, dir: &Path) -> Result<Vec<Path>>;

	/// Like [`list`](Self::list), but `None` when `dir` does not exist or is
	/// not a directory.
	fn list_or_none(&self, dir: &Path) -> Result<Option<Vec<Path>>>;

	/// A stream over a file's bytes, from the beginning.
	fn source(&self, file: &Path) -> Result<Box<dyn Source>>;

	/// A sink that truncates and replaces `file`. With `must_create`, fails
	/// if the file already exists.
	fn sink(&self, file: &Path, must_create: bool) -> Result<Box<dyn Sink>>;

	/// A sink that appends to `file`, creating it unless `must_exist`.
	fn appending_sink(&self, file: &Path, must_exist: bool) -> Result<Box<dyn Sink>>;

	/// A random-access read-only handle to an existing file.
	fn open_read_only(&self, file: &Path) -> Result<Box<dyn FileHandle>>;

	/// A random-access read-write handle. `must_create` and `must_exist` are
	/// mutually exclusive.
	fn open_read_write(
		&self,
		file: &Path,
		must_create: bool,
		must_exist: bool,
	) -> Result<Box<dyn FileHandle>>;

	/// Creates one directory. The parent must already exist.
	fn create_directory(&self, dir: &Path, must_create: bool) -> Result;

	/// Creates `dir` and any missing ancestors. `must_create` applies to the
	/// deepest directory only.
	fn create_directories(&self, dir: &Path, must_create: bool) -> Result {
		let mut missing = Vec::new();
		let mut probe = Some(dir.clone());
		while let Some(current) = probe {
			if self.exists(&current)? {
				break;
			}
			probe = current.parent();
			missing.push(current);
		}

		let mut deepest_created = false;
		for current in missing.iter().rev() {
			self.create_directory(current, false)?;
			deepest_created = true;
		}
		if must_create && !deepest_created {
			return Err(Error::io(format!("{dir} already exists")));
		}
		Ok(())
	}

	/// Atomically replaces `target` with `source`.
	fn atomic_move(&self, source: &Path, target: &Path) -> Result;

	/// Copies a file's bytes. Not atomic; metadata is not copied.
	fn copy(&self, source: &Path, target: &Path) -> Result {
		let mut from = self.source(source)?;
		let mut sink = self.sink(target, false)?;
		let copied = sink.write_all_from(&mut from).map(drop);
		let closed = crate::combine(from.close_source(), sink.close_sink());
		crate::combine(copied, closed)
	}

	/// Deletes one file, empty directory, or symlink.
	fn delete(&self, path: &Path, must_exist: bool) -> Result;

	/// Deletes `path` and everything under it, children first. Symlinks are
	/// deleted, never followed.
	fn delete_recursively(&self, path: &Path, must_exist: bool) -> Result {
		let metadata = match self.metadata_or_none(path)? {
			Some(metadata) => metadata,
			None if must_exist => return Err(Error::file_not_found(path)),
			None => return Ok(()),
		};
		if metadata.is_directory && !metadata.is_symlink() {
			for child in self.list(path)? {
				self.delete_recursively(&child, true)?;
			}
		}
		self.delete(path, must_exist)
	}

	/// Creates a symlink at `link` pointing to `target`. The parent of
	/// `link` must exist and `link` must not.
	fn create_symlink(&self, link: &Path, target: &Path) -> Result;

	/// Walks everything under `dir` lazily, parents before children,
	/// siblings in sorted order.
	fn list_recursively<'a>(
		&'a self,
		dir: &Path,
		follow_symlinks: bool,
	) -> DirectoryWalk<'a>
	where Self: Sized {
		DirectoryWalk::new(self, dir, follow_symlinks)
	}

	/// Opens `file` for reading, runs `f`, and closes the stream on every
	/// exit path. A close failure after a successful body is the primary
	/// error.
	fn read<T>(
		&self,
		file: &Path,
		f: impl FnOnce(&mut BufferedSource<Box<dyn Source>>) -> Result<T>,
	) -> Result<T>
	where Self: Sized {
		let mut source = self.source(file)?.buffered();
		let result = f(&mut source);
		let closed = source.close_source();
		finish_use(result, closed)
	}

	/// Opens `file` for writing (truncating), runs `f`, and closes the sink
	/// on every exit path.
	fn write<T>(
		&self,
		file: &Path,
		f: impl FnOnce(&mut BufferedSink<Box<dyn Sink>>) -> Result<T>,
	) -> Result<T>
	where Self: Sized {
		let mut sink = self.sink(file, false)?.buffered();
		let result = f(&mut sink);
		let closed = sink.close_sink();
		finish_use(result, closed)
	}
}

fn finish_use<T>(result: Result<T>, closed: Result) -> Result<T> {
	match (result, closed) {
		(Ok(value), Ok(())) => Ok(value),
		(Ok(_), Err(close_err)) => Err(close_err),
		(Err(err), Ok(())) => Err(err),
		(Err(err), Err(close_err)) => Err(err.with_suppressed(close_err)),
	}
}

/// The lazy iterator behind
/// [`list_recursively`](FileSystem::list_recursively).
pub struct DirectoryWalk<'a> {
	fs: &'a dyn FileSystem,
	stack: Vec<WalkFrame>,
	follow_symlinks: bool,
	/// A failure from construction, surfaced by the first `next()` call.
	pending_error: Option<Error>,
}

/// One directory being iterated. While following symlinks, `canonical` holds
/// the directory's resolved identity so re-entering any directory on the
/// active chain is caught as a cycle.
struct WalkFrame {
	children: std::vec::IntoIter<Path>,
	canonical: Option<Path>,
}

impl<'a> DirectoryWalk<'a> {
	fn new(fs: &'a dyn FileSystem, dir: &Path, follow_symlinks: bool) -> Self {
		let mut pending_error = None;
		let children = match fs.list(dir) {
			Ok(children) => children.into_iter(),
			Err(err) => {
				pending_error = Some(err);
				Vec::new().into_iter()
			}
		};

		let mut canonical = None;
		if follow_symlinks && pending_error.is_none() {
			match fs.canonicalize(dir) {
				Ok(resolved) => canonical = Some(resolved),
				Err(err) => pending_error = Some(err),
			}
		}

		Self {
			fs,
			stack: vec![WalkFrame { children, canonical }],
			follow_symlinks,
			pending_error,
		}
	}

	/// Whether `path` names a directory to walk into, following the final
	/// symlink when requested. Returns the resolved identity alongside, for
	/// the cycle check. A dangling link is yielded but never entered.
	fn descent_target(&self, path: &Path) -> Result<Option<Path>> {
		let Some(metadata) = self.fs.metadata_or_none(path)? else {
			return Ok(None);
		};

		if metadata.is_symlink() {
			if !self.follow_symlinks {
				return Ok(None);
			}
			let Ok(target) = self.fs.canonicalize(path) else {
				return Ok(None);
			};
			let target_is_dir = self.fs.metadata_or_none(&target)?
				.map_or(false, |m| m.is_directory);
			return Ok(target_is_dir.then_some(target));
		}

		if !metadata.is_directory {
			return Ok(None);
		}
		if self.follow_symlinks {
			return self.fs.canonicalize(path).map(Some);
		}
		Ok(Some(path.clone()))
	}

	fn descend(&mut self, path: &Path, canonical: Path) -> Result {
		if self.follow_symlinks {
			let cycles = self.stack.iter()
				.any(|frame| frame.canonical.as_ref() == Some(&canonical));
			if cycles {
				return Err(Error::io(format!("symlink cycle at {path}")));
			}
		}
		let children = self.fs.list(path)?;
		self.stack.push(WalkFrame {
			children: children.into_iter(),
			canonical: self.follow_symlinks.then_some(canonical),
		});
		Ok(())
	}
}

impl Iterator for DirectoryWalk<'_> {
	type Item = Result<Path>;

	fn next(&mut self) -> Option<Self::Item> {
		if let Some(err) = self.pending_error.take() {
			self.stack.clear();
			return Some(Err(err));
		}
		loop {
			let frame = self.stack.last_mut()?;
			let Some(path) = frame.children.next() else {
				self.stack.pop();
				continue;
			};

			match self.descent_target(&path) {
				Ok(Some(canonical)) => {
					if let Err(err) = self.descend(&path, canonical) {
						return Some(Err(err));
					}
				}
				Ok(None) => {}
				Err(err) => return Some(Err(err)),
			}
			return Some(Ok(path));
		}
	}
}

/// A decorator that forwards every operation to another file system,
/// mapping paths on the way in and out. Composing these builds jailed or
/// relocated views without touching the backend.
pub struct ForwardingFileSystem<F: FileSystem> {
	inner: F,
	on_path_parameter: PathHook,
	on_path_result: PathHook,
}

type PathHook = Box<dyn Fn(Path) -> Result<Path> + Send + Sync>;

impl<F: FileSystem> ForwardingFileSystem<F> {
	pub fn new(inner: F) -> Self {
		Self {
			inner,
			on_path_parameter: Box::new(|path| Ok(path)),
			on_path_result: Box::new(|path| Ok(path)),
		}
	}

	/// Transforms every path argument before it reaches the backend.
	pub fn on_path_parameter(
		mut self,
		hook: impl Fn(Path) -> Result<Path> + Send + Sync + 'static,
	) -> Self {
		self.on_path_parameter = Box::new(hook);
		self
	}

	/// Transforms every path the backend returns.
	pub fn on_path_result(
		mut self,
		hook: impl Fn(Path) -> Result<Path> + Send + Sync + 'static,
	) -> Self {
		self.on_path_result = Box::new(hook);
		self
	}

	pub fn inner(&self) -> &F {
		&self.inner
	}

	fn map_in(&self, path: &Path) -> Result<Path> {
		(self.on_path_parameter)(path.clone())
	}

	fn map_out(&self, path: Path) -> Result<Path> {
		(self.on_path_result)(path)
	}
}

impl<F: FileSystem> FileSystem for ForwardingFileSystem<F> {
	fn canonicalize(&self, path: &Path) -> Result<Path> {
		let result = self.inner.canonicalize(&self.map_in(path)?)?;
		self.map_out(result)
	}

	fn metadata_or_none(&self, path: &Path) -> Result<Option<FileMetadata>> {
		self.inner.metadata_or_none(&self.map_in(path)?)
	}

	fn list(&self, dir: &Path) -> Result<Vec<Path>> {
		self.inner.list(&self.map_in(dir)?)?
			.into_iter()
			.map(|p| self.map_out(p))
			.collect()
	}

	fn list_or_none(&self, dir: &Path) -> Result<Option<Vec<Path>>> {
		match self.inner.list_or_none(&self.map_in(dir)?)? {
			Some(children) => {
				let mapped: Result<Vec<_>> = children.into_iter()
					.map(|p| self.map_out(p))
					.collect();
				Ok(Some(mapped?))
			}
			None => Ok(None),
		}
	}

	fn source(&self, file: &Path) -> Result<Box<dyn Source>> {
		self.inner.source(&self.map_in(file)?)
	}

	fn sink(&self, file: &Path, must_create: bool) -> Result<Box<dyn Sink>> {
		self.inner.sink(&self.map_in(file)?, must_create)
	}

	fn appending_sink(&self, file: &Path, must_exist: bool) -> Result<Box<dyn Sink>> {
		self.inner.appending_sink(&self.map_in(file)?, must_exist)
	}

	fn open_read_only(&self, file: &Path) -> Result<Box<dyn FileHandle>> {
		self.inner.open_read_only(&self.map_in(file)?)
	}

	fn open_read_write(
		&self,
		file: &Path,
		must_create: bool,
		must_exist: bool,
	) -> Result<Box<dyn FileHandle>> {
		self.inner.open_read_write(&self.map_in(file)?, must_create, must_exist)
	}

	fn create_directory(&self, dir: &Path, must_create: bool) -> Result {
		self.inner.create_directory(&self.map_in(dir)?, must_create)
	}

	fn atomic_move(&self, source: &Path, target: &Path) -> Result {
		self.inner.atomic_move(&self.map_in(source)?, &self.map_in(target)?)
	}

	fn delete(&self, path: &Path, must_exist: bool) -> Result {
		self.inner.delete(&self.map_in(path)?, must_exist)
	}

	fn create_symlink(&self, link: &Path, target: &Path) -> Result {
		self.inner.create_symlink(&self.map_in(link)?, &self.map_in(target)?)
	}
}

#[cfg(test)]
mod test {
	use pretty_assertions::assert_eq;
	use crate::path::Path;
	use super::memory::MemoryFileSystem;
	use super::{FileSystem, ForwardingFileSystem};

	fn path(s: &str) -> Path { Path::new(s) }

	/// A view that roots every operation under `/jail`.
	fn jailed(inner: MemoryFileSystem) -> ForwardingFileSystem<MemoryFileSystem> {
		ForwardingFileSystem::new(inner)
			.on_path_parameter(|p| Ok(path("/jail").resolve(&p, true)))
			.on_path_result(|p| p.relative_to(&path("/jail")))
	}

	#[test]
	fn forwarding_maps_paths_both_ways() {
		let inner = MemoryFileSystem::new();
		inner.create_directory(&path("/jail"), false).unwrap();

		let fs = jailed(inner.clone());
		fs.write(&path("inmate"), |sink| sink.write_utf8("behind bars")).unwrap();

		// The backend sees the jailed location...
		let read_back = inner
			.read(&path("/jail/inmate"), |source| source.read_utf8_all())
			.unwrap();
		assert_eq!(read_back, "behind bars");

		// ...while the view lists relative names.
		let listed = fs.list(&path(".")).unwrap();
		assert_eq!(listed, vec![path("inmate")]);
		assert!(inner.open_paths().is_empty());
	}

	#[test]
	fn walk_is_preorder_through_the_decorator() {
		let inner = MemoryFileSystem::new();
		inner.create_directories(&path("/jail/sub"), false).unwrap();
		inner.write(&path("/jail/sub/file"), |sink| sink.write_utf8("x")).unwrap();

		let fs = jailed(inner);
		let walked: Vec<String> = fs.list_recursively(&path("."), false)
			.map(|entry| entry.unwrap().to_string())
			.collect();
		assert_eq!(walked, ["sub", "sub/file"]);
	}
}
