use thiserror::Error;

/// Largest method body the execution engine accepts.
pub const MAX_BODY_SIZE: usize = (1 << 14) - 1;

/// Largest method body the dependency walker will even consider.
pub const MAX_WALKABLE_BODY_SIZE: usize = (1 << 16) - 1;

/// Fatal conditions of the compile pipeline. The pipeline fails fast on the
/// first of these and leaves no partial image on the device.
#[derive(Debug, Error)]
pub enum CompileError {
	#[error("operand {raw:#010x} in `{site}` does not resolve to anything in the program")]
	UnresolvedReference { raw: u32, site: String },

	#[error("substitute `{substitute}` targets `{member}`, which does not exist in `{target}`")]
	MissingReplacementTarget { substitute: String, member: String, target: String },

	#[error("`{0}` is concrete but has neither a body nor a native binding")]
	MissingImplementation(String),

	#[error("body of `{method}` is {size} bytes, over the {limit} byte limit")]
	OversizedMethod { method: String, size: usize, limit: usize },

	#[error("entry point `{method}`: {reason}")]
	BadEntryPoint { method: String, reason: &'static str },

	#[error("`{mnemonic}` in `{site}` is not supported by the execution engine")]
	UnsupportedOpcode { mnemonic: &'static str, site: String },

	#[error("malformed bytecode in `{site}`: {detail}")]
	MalformedBody { site: String, detail: &'static str },

	#[error(transparent)]
	Device(#[from] DeviceError),
}

/// Failures reported by the device or its transport during upload.
#[derive(Debug, Error)]
pub enum DeviceError {
	#[error("transport failure: {0}")]
	Transport(#[from] std::io::Error),

	#[error("device rejected a {frame} frame with code {code}")]
	Rejected { frame: &'static str, code: u32 },

	#[error("device closed the link mid-deployment")]
	LinkLost,
}
