pub mod context;
pub mod processors;
pub mod session;
pub mod templater;

/// Safety ceiling shared by while loops, for-each loops and regexp match
/// scans when no explicit maximum is configured.
pub const DEFAULT_MAX_LOOPS: f64 = 10_000.0;

/// Name of the variable a try processor binds the captured failure to inside
/// the catch scope.
pub const ERROR_VARIABLE: &str = "_error";

/// Name of the variable the http processor binds the response handle to.
pub const HTTP_INFO_VARIABLE: &str = "http";

pub use context::DynamicContext;
pub use processors::{PluginProcessor, PluginRegistry};
pub use session::{
    ProcessorInfo, Session, SessionHandle, SessionListener, SessionOptions, Status,
};
