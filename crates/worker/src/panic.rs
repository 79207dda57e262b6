use std::any::Any;

use tokio::task::JoinError;

/// Renders a panic payload as a message.
///
/// `panic!` payloads are either `&'static str` or `String`; anything else is
/// reported generically.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

/// Extracts the panic message from a failed join, or `None` if the task was
/// cancelled rather than panicking.
pub fn join_error_panic_message(err: JoinError) -> Option<String> {
	if !err.is_panic() {
		return None;
	}
	Some(panic_message(&*err.into_panic()))
}
