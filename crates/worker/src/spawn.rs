use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

/// Returns the ambient tokio runtime handle, falling back to a shared
/// process runtime when called outside of one.
pub(crate) fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("cadence-worker-global")
			.build()
			.expect("failed to build cadence-worker global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task tagged with `name` for tracing.
#[allow(clippy::disallowed_methods)]
pub fn spawn<F>(name: &'static str, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task = name, "worker.spawn");
	runtime_handle().spawn(fut)
}
