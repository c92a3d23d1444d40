// SPDX-License-Identifier: Apache-2.0

use std::cmp::min;
use std::time::{Duration, Instant};
use parking_lot::{Condvar, MutexGuard};
use crate::{Error, Result};

/// A per-operation time limit and an absolute deadline, consulted by blocking
/// stream backends before each syscall and while sleeping.
///
/// Both limits are independent: the per-operation `timeout` caps a single
/// blocking call, the `deadline` caps all work on the stream as a whole. A
/// zero timeout and an absent deadline mean "no limit". Buffer-to-buffer
/// operations never consult timeouts because they never block.
#[derive(Clone, Debug)]
pub struct Timeout {
	timeout: Duration,
	deadline: Option<Instant>,
	/// The sentinel returned by [`Timeout::none`] ignores setter calls, so a
	/// stream that advertises "no timeout" cannot be given one accidentally.
	frozen: bool,
}

impl Default for Timeout {
	fn default() -> Self { Self::new() }
}

impl Timeout {
	/// A fresh, fully mutable timeout with no limits set.
	pub fn new() -> Self {
		Self {
			timeout: Duration::ZERO,
			deadline: None,
			frozen: false,
		}
	}

	/// The immutable "no timeout" sentinel: both limits unset, setters
	/// ignored.
	pub fn none() -> Self {
		Self { frozen: true, ..Self::new() }
	}

	/// Caps the wait of a single blocking operation. `Duration::ZERO` clears
	/// the cap.
	pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
		if !self.frozen {
			self.timeout = timeout;
		}
		self
	}

	pub fn clear_timeout(&mut self) -> &mut Self {
		self.set_timeout(Duration::ZERO)
	}

	/// The per-operation cap, `Duration::ZERO` when unset.
	pub fn timeout(&self) -> Duration { self.timeout }

	/// Sets the absolute instant after which blocking operations fail.
	pub fn set_deadline(&mut self, deadline: Instant) -> &mut Self {
		if !self.frozen {
			self.deadline = Some(deadline);
		}
		self
	}

	/// Sets the deadline to `duration` from now.
	pub fn deadline_after(&mut self, duration: Duration) -> &mut Self {
		self.set_deadline(Instant::now() + duration)
	}

	pub fn clear_deadline(&mut self) -> &mut Self {
		if !self.frozen {
			self.deadline = None;
		}
		self
	}

	pub fn has_deadline(&self) -> bool { self.deadline.is_some() }

	/// The deadline, if one is set.
	pub fn deadline(&self) -> Option<Instant> { self.deadline }

	/// Fails with [`InterruptedIo`](crate::ErrorKind::InterruptedIo) if the
	/// deadline has passed. Backends call this before every blocking syscall.
	pub fn throw_if_reached(&self) -> Result {
		match self.deadline {
			Some(deadline) if Instant::now() >= deadline => {
				Err(Error::interrupted("deadline reached"))
			}
			_ => Ok(()),
		}
	}

	/// The longest a single wait may last right now: the smaller of the
	/// per-operation timeout and the time left until the deadline. `None`
	/// means wait forever.
	pub fn effective_wait(&self) -> Option<Duration> {
		let until_deadline = self.deadline
			.map(|deadline| deadline.saturating_duration_since(Instant::now()));
		match (self.timeout, until_deadline) {
			(Duration::ZERO, None) => None,
			(Duration::ZERO, Some(left)) => Some(left),
			(timeout, None) => Some(timeout),
			(timeout, Some(left)) => Some(min(timeout, left)),
		}
	}

	/// Blocks on `condvar` until notified or until the effective wait
	/// expires. Returns `true` if the wait timed out. With no limits set this
	/// waits indefinitely.
	pub fn wait_until_notified<T>(
		&self,
		condvar: &Condvar,
		guard: &mut MutexGuard<'_, T>,
	) -> bool {
		match self.effective_wait() {
			None => {
				condvar.wait(guard);
				false
			}
			Some(Duration::ZERO) => true,
			Some(wait) => condvar.wait_for(guard, wait).timed_out(),
		}
	}

	/// Runs `f` with this timeout tightened to also respect `other`, then
	/// restores the original limits.
	pub fn intersect_with<R>(&mut self, other: &Timeout, f: impl FnOnce(&mut Self) -> R) -> R {
		let original_timeout = self.timeout;
		let original_deadline = self.deadline;

		if !self.frozen {
			if other.timeout != Duration::ZERO {
				self.timeout = if self.timeout == Duration::ZERO {
					other.timeout
				} else {
					min(self.timeout, other.timeout)
				};
			}
			if let Some(theirs) = other.deadline {
				self.deadline = Some(match self.deadline {
					Some(ours) => min(ours, theirs),
					None => theirs,
				});
			}
		}

		let result = f(self);
		self.timeout = original_timeout;
		self.deadline = original_deadline;
		result
	}
}

#[cfg(test)]
mod test {
	use std::time::{Duration, Instant};
	use super::Timeout;

	#[test]
	fn none_rejects_modification() {
		let mut timeout = Timeout::none();
		timeout.set_timeout(Duration::from_secs(1));
		timeout.deadline_after(Duration::from_secs(1));
		assert_eq!(timeout.timeout(), Duration::ZERO);
		assert!(!timeout.has_deadline());
	}

	#[test]
	fn zero_means_unset() {
		let timeout = Timeout::new();
		assert_eq!(timeout.effective_wait(), None);
		assert!(timeout.throw_if_reached().is_ok());
	}

	#[test]
	fn effective_wait_is_the_minimum() {
		let mut timeout = Timeout::new();
		timeout.set_timeout(Duration::from_secs(10));
		timeout.set_deadline(Instant::now() + Duration::from_secs(1));
		let wait = timeout.effective_wait().unwrap();
		assert!(wait <= Duration::from_secs(1));
	}

	#[test]
	fn reached_deadline_interrupts() {
		let mut timeout = Timeout::new();
		timeout.set_deadline(Instant::now() - Duration::from_millis(1));
		assert!(timeout.throw_if_reached().is_err());
	}

	#[test]
	fn intersect_restores_limits() {
		let mut a = Timeout::new();
		a.set_timeout(Duration::from_secs(5));
		let mut b = Timeout::new();
		b.set_timeout(Duration::from_secs(1));

		a.intersect_with(&b, |merged| {
			assert_eq!(merged.timeout(), Duration::from_secs(1));
		});
		assert_eq!(a.timeout(), Duration::from_secs(5));
	}
}
