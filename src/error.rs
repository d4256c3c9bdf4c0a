use miette::Diagnostic;

/// Errors raised while establishing or re-establishing a physical connection.
#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum FactoryError {
	#[error("failed to establish physical connection: {0}")]
	#[diagnostic(code(robust_ws::factory::connect))]
	Connect(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("failed to parse connection url: {0}")]
	#[diagnostic(code(robust_ws::factory::url))]
	Url(#[from] url::ParseError),

	#[error("retry deadline exceeded before a physical connection could be established")]
	#[diagnostic(code(robust_ws::factory::deadline_exceeded))]
	DeadlineExceeded,

	#[error("{0}")]
	#[diagnostic(code(robust_ws::factory::other))]
	Other(String),
}

/// Errors raised by [`RobustConnection::send`](crate::RobustConnection::send) and
/// [`BufferedResendConnection::send`](crate::BufferedResendConnection::send).
#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum SendError {
	#[error("cannot send while the connection is not open (state: {0:?})")]
	#[diagnostic(code(robust_ws::send::not_open))]
	NotOpen(crate::ReadyState),

	#[error("the connection's actor task has already terminated")]
	#[diagnostic(code(robust_ws::send::actor_gone))]
	ActorGone,
}

/// Errors raised by [`RobustConnection::close`](crate::RobustConnection::close).
#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum CloseError {
	#[error("close code {0} is reserved and may not be used")]
	#[diagnostic(code(robust_ws::close::invalid_code), help("use 1000, a code in 1001-1011 other than 1004/1005/1006, or an application code in 3000-4999"))]
	InvalidCode(u16),

	#[error("the connection's actor task has already terminated")]
	#[diagnostic(code(robust_ws::close::actor_gone))]
	ActorGone,
}

/// Errors raised while reading from or discarding from a [`MessageBuffer`](crate::MessageBuffer).
#[derive(Debug, thiserror::Error, Diagnostic, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum MessageBufferError {
	#[error("id {id} is out of range: buffer holds [{floor}, {next})")]
	#[diagnostic(code(robust_ws::buffer::out_of_range))]
	OutOfRange { id: u64, floor: u64, next: u64 },
}
