use thiserror::Error;

/// Error taxonomy for one engine run. Application failures (`Config`, `Eval`,
/// `Resource`) unwind until an enclosing try processor or the session driver
/// catches them. `Cancelled` is a separate channel: every layer re-raises it,
/// even when a collaborator has wrapped it inside an application failure.
#[derive(Debug, Error, Clone)]
pub enum ExecError {
    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<ExecError>>,
    },

    #[error("evaluation error: {message}")]
    Eval {
        message: String,
        #[source]
        source: Option<Box<ExecError>>,
    },

    #[error("resource error: {message}")]
    Resource {
        message: String,
        #[source]
        source: Option<Box<ExecError>>,
    },

    #[error("illegal state: {message}")]
    IllegalState { message: String },

    #[error("execution cancelled")]
    Cancelled,
}

impl ExecError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
            source: None,
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
            source: None,
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    pub fn wrap_eval(message: impl Into<String>, cause: ExecError) -> Self {
        Self::Eval {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn wrap_resource(message: impl Into<String>, cause: ExecError) -> Self {
        Self::Resource {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn wrap_config(message: impl Into<String>, cause: ExecError) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Walks the cause chain so a cancellation smuggled inside an
    /// application failure is still recognized as cancellation.
    pub fn is_cancelled(&self) -> bool {
        let mut current = self;
        loop {
            match current {
                Self::Cancelled => return true,
                Self::Config { source, .. }
                | Self::Eval { source, .. }
                | Self::Resource { source, .. } => match source {
                    Some(cause) => current = cause,
                    None => return false,
                },
                Self::IllegalState { .. } => return false,
            }
        }
    }
}
