//! The coalescing/keepalive timer that shapes broadcast cadence.
//!
//! A single-writer timer: after [`Heartbeat::mark_changed`], the next sync
//! fires `coalesce_delay` later unless one is already pending. If nothing
//! changes, a sync still fires every `keepalive_delay`, so idle connections
//! exchange at least one message per keepalive period and keep NAT bindings
//! and ICE consent alive.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

pub const DEFAULT_COALESCE_DELAY: Duration = Duration::from_millis(20);
pub const DEFAULT_KEEPALIVE_DELAY: Duration = Duration::from_secs(1);

struct Shared {
	notify_changed: Notify,
	fired: Notify,
	pending: AtomicBool,
}

/// Handle to a running heartbeat task. Dropping the last handle stops the
/// timer.
#[derive(Clone)]
pub struct Heartbeat {
	shared: Arc<Shared>,
}

impl Heartbeat {
	/// Spawns the heartbeat task, invoking `sync_action` on every firing.
	pub fn spawn<F, Fut>(
		coalesce_delay: Duration,
		keepalive_delay: Duration,
		sync_action: F,
	) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let shared = Arc::new(Shared {
			notify_changed: Notify::new(),
			fired: Notify::new(),
			pending: AtomicBool::new(false),
		});
		let task_shared = Arc::clone(&shared);
		tokio::spawn(async move {
			Self::run(task_shared, coalesce_delay, keepalive_delay, sync_action).await;
		});
		Self { shared }
	}

	pub fn spawn_with_defaults<F, Fut>(sync_action: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		Self::spawn(DEFAULT_COALESCE_DELAY, DEFAULT_KEEPALIVE_DELAY, sync_action)
	}

	/// Requests a sync. If one isn't already pending, it will fire
	/// `coalesce_delay` from now; otherwise this call is a no-op, since a
	/// sync observing this change is already scheduled.
	pub fn mark_changed(&self) {
		if !self.shared.pending.swap(true, Ordering::AcqRel) {
			self.shared.notify_changed.notify_one();
		}
	}

	/// Suspends until the next firing. Non-buffered: if called after a
	/// firing already happened, waits for the *following* one.
	pub async fn await_next_sync(&self) {
		self.shared.fired.notified().await;
	}

	async fn run<F, Fut>(
		shared: Arc<Shared>,
		coalesce_delay: Duration,
		keepalive_delay: Duration,
		sync_action: F,
	) where
		F: Fn() -> Fut,
		Fut: Future<Output = ()>,
	{
		let mut keepalive_deadline = Instant::now() + keepalive_delay;
		loop {
			let pending = shared.pending.load(Ordering::Acquire);
			let coalesce_sleep = async {
				if pending {
					tokio::time::sleep(coalesce_delay).await;
				} else {
					std::future::pending::<()>().await;
				}
			};
			tokio::select! {
				_ = shared.notify_changed.notified(), if !pending => {
					continue;
				}
				_ = coalesce_sleep => {
					sync_action().await;
					shared.pending.store(false, Ordering::Release);
					shared.fired.notify_waiters();
					keepalive_deadline = Instant::now() + keepalive_delay;
				}
				_ = tokio::time::sleep_until(keepalive_deadline) => {
					sync_action().await;
					shared.pending.store(false, Ordering::Release);
					shared.fired.notify_waiters();
					keepalive_deadline = Instant::now() + keepalive_delay;
				}
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::atomic::AtomicU32;

	#[tokio::test(start_paused = true)]
	async fn fires_on_keepalive_with_no_changes() {
		let count = Arc::new(AtomicU32::new(0));
		let count2 = Arc::clone(&count);
		let hb = Heartbeat::spawn(Duration::from_millis(20), Duration::from_millis(100), move || {
			let count = Arc::clone(&count2);
			async move {
				count.fetch_add(1, Ordering::SeqCst);
			}
		});

		hb.await_next_sync().await;
		assert_eq!(count.load(Ordering::SeqCst), 1);
		hb.await_next_sync().await;
		assert_eq!(count.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn mark_changed_fires_after_coalesce_delay_not_immediately() {
		let count = Arc::new(AtomicU32::new(0));
		let count2 = Arc::clone(&count);
		let hb = Heartbeat::spawn(
			Duration::from_millis(20),
			Duration::from_secs(10),
			move || {
				let count = Arc::clone(&count2);
				async move {
					count.fetch_add(1, Ordering::SeqCst);
				}
			},
		);

		hb.mark_changed();
		// Give the coalescing task a chance to observe the notify before the
		// delay, to assert it hasn't fired yet.
		tokio::time::sleep(Duration::from_millis(5)).await;
		assert_eq!(count.load(Ordering::SeqCst), 0);

		hb.await_next_sync().await;
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn repeated_mark_changed_within_window_does_not_rearm() {
		let count = Arc::new(AtomicU32::new(0));
		let count2 = Arc::clone(&count);
		let hb = Heartbeat::spawn(
			Duration::from_millis(20),
			Duration::from_secs(10),
			move || {
				let count = Arc::clone(&count2);
				async move {
					count.fetch_add(1, Ordering::SeqCst);
				}
			},
		);

		hb.mark_changed();
		tokio::time::sleep(Duration::from_millis(10)).await;
		hb.mark_changed(); // should not push the deadline out further
		hb.await_next_sync().await;
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn await_next_sync_is_non_buffered() {
		let hb = Heartbeat::spawn(
			Duration::from_millis(10),
			Duration::from_millis(50),
			|| async {},
		);
		hb.await_next_sync().await;
		// A waiter starting now must observe the *next* firing, not the one
		// that already happened.
		let started = Instant::now();
		hb.await_next_sync().await;
		assert!(started.elapsed() > Duration::from_millis(1));
	}
}
