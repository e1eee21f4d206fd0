#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
pub type LaunchpadError = Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Settings(#[from] config::ConfigError),
    #[error("stack config error: {0}")]
    Stack(#[from] crate::config::stack::StackConfigError),
    #[error("container runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        Error: From<E>,
    {
        error.into()
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }

    pub fn with_context<M>(context: M, source: Error) -> Self
    where
        M: Into<String>,
    {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Walks context wrappers to find a structural failure, if any.
    pub fn structural(&self) -> Option<&StructuralError> {
        match self {
            Error::Structural(err) => Some(err),
            Error::Orchestrator(OrchestratorError::Structural(err)) => Some(err),
            Error::Context { source, .. } => source.structural(),
            _ => None,
        }
    }
}

/// Errors in the stack declaration that make a run impossible. Raised before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("UnknownProfile: profile `{profile}` is not declared")]
    UnknownProfile { profile: String },
    #[error("CyclicDependency: services [{}] form a dependency cycle", services.join(", "))]
    CyclicDependency { services: Vec<String> },
    #[error("MissingDependency: `{service}` references undeclared service `{dependency}`")]
    MissingDependency { service: String, dependency: String },
}

impl StructuralError {
    pub fn kind(&self) -> &'static str {
        match self {
            StructuralError::UnknownProfile { .. } => "UnknownProfile",
            StructuralError::CyclicDependency { .. } => "CyclicDependency",
            StructuralError::MissingDependency { .. } => "MissingDependency",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error("a startup run is already in progress")]
    AlreadyRunning,
    #[error("restart requested before any start")]
    NothingToRestart,
}

pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(context.into(), err.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(f().into(), err.into()))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

#[macro_export]
macro_rules! err {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::error::Error::msg(format!($fmt $(, $arg)*))
    }};
    ($err:expr) => {{
        $crate::error::Error::new($err)
    }};
}

#[macro_export]
macro_rules! bail_err {
    ($($arg:tt)*) => {{
        return Err($crate::err!($($arg)*));
    }};
}
