// SPDX-License-Identifier: Apache-2.0

use crate::{Error, Result};
use crate::buffered::BufferedSource;
use crate::byte_str::ByteString;
use crate::streams::Source;

/// A precomputed byte trie over a small set of alternatives, for one-of-many
/// prefix matching with [`BufferedSource::select`].
///
/// Matching returns the longest alternative that prefixes the stream and
/// consumes exactly its bytes. Identical alternatives resolve to the one
/// supplied first. A failed match consumes nothing.
pub struct Options {
	values: Vec<ByteString>,
	nodes: Vec<Node>,
}

#[derive(Default)]
struct Node {
	/// `(value index, value length)` when a whole alternative ends here.
	terminal: Option<(usize, usize)>,
	children: Vec<(u8, usize)>,
}

impl Options {
	/// Builds the trie. Alternatives must be non-empty; an empty byte string
	/// would match everything.
	pub fn of(values: impl IntoIterator<Item = ByteString>) -> Result<Self> {
		let values: Vec<_> = values.into_iter().collect();
		let mut nodes = vec![Node::default()];

		for (index, value) in values.iter().enumerate() {
			if value.is_empty() {
				return Err(Error::invalid_argument("the empty byte string is not a valid option"));
			}

			let mut node = 0;
			let bytes = value.to_vec();
			for &b in &bytes {
				let found = nodes[node].children.iter()
					.find(|&&(byte, _)| byte == b)
					.map(|&(_, child)| child);
				node = match found {
					Some(child) => child,
					None => {
						nodes.push(Node::default());
						let child = nodes.len() - 1;
						nodes[node].children.push((b, child));
						child
					}
				};
			}
			// The earliest identical alternative keeps the slot.
			if nodes[node].terminal.is_none() {
				nodes[node].terminal = Some((index, bytes.len()));
			}
		}

		Ok(Self { values, nodes })
	}

	pub fn len(&self) -> usize { self.values.len() }

	pub fn is_empty(&self) -> bool { self.values.is_empty() }

	/// The alternative at `index`.
	pub fn get(&self, index: usize) -> Option<&ByteString> {
		self.values.get(index)
	}

	/// Walks the trie against `source`, pulling bytes as needed, and
	/// consumes the deepest full alternative found.
	pub(crate) fn select_from<S: Source>(
		&self,
		source: &mut BufferedSource<S>,
	) -> Result<Option<usize>> {
		let mut node = 0;
		let mut depth = 0;
		let mut best = None;

		loop {
			if !source.request(depth + 1)? {
				break;
			}
			let Some(byte) = source.buffer().get(depth) else { break };
			let child = self.nodes[node].children.iter()
				.find(|&&(b, _)| b == byte)
				.map(|&(_, child)| child);
			let Some(child) = child else { break };

			node = child;
			depth += 1;
			if let Some(terminal) = self.nodes[node].terminal {
				best = Some(terminal);
			}
		}

		match best {
			Some((index, length)) => {
				source.skip(length)?;
				Ok(Some(index))
			}
			None => Ok(None),
		}
	}
}
