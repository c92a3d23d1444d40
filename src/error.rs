// SPDX-License-Identifier: Apache-2.0

use std::error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::result;

pub type Result<T = ()> = result::Result<T, Error>;

type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// The failure category of an [`Error`].
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
	/// A read was attempted past the end of a stream.
	#[error("end of input")]
	Eof,
	/// A typed read or `require` could not be satisfied with the bytes left.
	#[error("premature end of input")]
	PrematureEof,
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	#[error("illegal state: {0}")]
	IllegalState(String),
	/// The stream or handle was already closed.
	#[error("closed")]
	Closed,
	#[error("file not found: {0}")]
	FileNotFound(String),
	#[error("{0}")]
	Io(String),
	/// A timeout or deadline expired mid-operation.
	#[error("interrupted: {0}")]
	InterruptedIo(String),
	/// Malformed framed input, such as a bad gzip header.
	#[error("{0}")]
	Protocol(String),
}

/// The crate-wide error type: a kind, an optional cause, and errors suppressed
/// while unwinding a multi-step operation such as a buffered close.
#[derive(Debug)]
pub struct Error {
	kind: ErrorKind,
	source: Option<BoxError>,
	suppressed: Vec<Error>,
}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.kind, f)
	}
}

impl error::Error for Error {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		self.source
			.as_deref()
			.map(|src| src as &(dyn error::Error + 'static))
	}
}

impl Error {
	fn new(kind: ErrorKind, source: Option<BoxError>) -> Self {
		Self { kind, source, suppressed: Vec::new() }
	}

	pub fn eof() -> Self { Self::new(ErrorKind::Eof, None) }

	pub fn premature_eof() -> Self { Self::new(ErrorKind::PrematureEof, None) }

	pub fn invalid_argument(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidArgument(message.into()), None)
	}

	pub fn illegal_state(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::IllegalState(message.into()), None)
	}

	pub fn closed() -> Self { Self::new(ErrorKind::Closed, None) }

	pub fn file_not_found(path: impl Display) -> Self {
		Self::new(ErrorKind::FileNotFound(path.to_string()), None)
	}

	pub fn io(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Io(message.into()), None)
	}

	pub fn io_caused_by(
		message: impl Into<String>,
		source: impl error::Error + Send + Sync + 'static,
	) -> Self {
		Self::new(ErrorKind::Io(message.into()), Some(Box::new(source)))
	}

	pub fn interrupted(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InterruptedIo(message.into()), None)
	}

	pub fn protocol(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Protocol(message.into()), None)
	}

	pub fn kind(&self) -> &ErrorKind { &self.kind }

	pub fn is_eof(&self) -> bool {
		matches!(self.kind, ErrorKind::Eof | ErrorKind::PrematureEof)
	}

	pub fn is_closed(&self) -> bool {
		matches!(self.kind, ErrorKind::Closed)
	}

	pub fn is_file_not_found(&self) -> bool {
		matches!(self.kind, ErrorKind::FileNotFound(_))
	}

	/// Attaches an error raised after this one in the same cleanup path. The
	/// receiver stays primary.
	pub fn with_suppressed(mut self, error: Error) -> Self {
		self.suppressed.push(error);
		self
	}

	/// Errors attached by [`with_suppressed`](Self::with_suppressed).
	pub fn suppressed(&self) -> &[Error] { &self.suppressed }
}

/// Combines the results of a multi-step cleanup: the first failure is primary,
/// later failures are attached to it as suppressed.
pub fn combine(first: Result, second: Result) -> Result {
	match (first, second) {
		(Ok(()), second) => second,
		(Err(e), Ok(())) => Err(e),
		(Err(e), Err(later)) => Err(e.with_suppressed(later)),
	}
}

impl From<io::Error> for Error {
	fn from(value: io::Error) -> Self {
		let kind = match value.kind() {
			io::ErrorKind::UnexpectedEof => ErrorKind::Eof,
			io::ErrorKind::NotFound => ErrorKind::FileNotFound(value.to_string()),
			io::ErrorKind::TimedOut => ErrorKind::InterruptedIo(value.to_string()),
			_ => ErrorKind::Io(value.to_string()),
		};
		Self::new(kind, Some(Box::new(value)))
	}
}

impl From<Error> for io::Error {
	fn from(value: Error) -> Self {
		let kind = match value.kind() {
			ErrorKind::Eof | ErrorKind::PrematureEof => io::ErrorKind::UnexpectedEof,
			ErrorKind::FileNotFound(_) => io::ErrorKind::NotFound,
			ErrorKind::InterruptedIo(_) => io::ErrorKind::TimedOut,
			ErrorKind::InvalidArgument(_) => io::ErrorKind::InvalidInput,
			ErrorKind::Protocol(_) => io::ErrorKind::InvalidData,
			_ => io::ErrorKind::Other,
		};
		io::Error::new(kind, value)
	}
}

#[cfg(test)]
mod test {
	use super::{combine, Error, ErrorKind};

	#[test]
	fn combine_keeps_first_primary() {
		let combined = combine(
			Err(Error::io("flush failed")),
			Err(Error::closed()),
		).unwrap_err();

		assert!(matches!(combined.kind(), ErrorKind::Io(_)));
		assert_eq!(combined.suppressed().len(), 1);
		assert!(combined.suppressed()[0].is_closed());
	}

	#[test]
	fn combine_passes_second_through() {
		let combined = combine(Ok(()), Err(Error::eof())).unwrap_err();
		assert!(combined.is_eof());
	}
}
