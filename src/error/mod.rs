use std::fmt::Display;
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

use crate::broker::BrokerError;
use crate::gather::{GatherError, ReassemblyError};
use crate::gc::GcError;
use crate::planner::PlanningError;
use crate::result::ResultError;
use crate::scheduler::ScheduleError;
use crate::storage::StorageError;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The unified error type for the whole pipeline
///
/// Subsystems return their own error enums; this type is what crosses the
/// boundary to the CLI and the HTTP surface, where a numeric code and a
/// status hint are needed.
#[derive(Error, Debug)]
pub enum CubeflowError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] Planning error: {message}")]
    Planning {
        code: u16,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] Scheduling error: {message}")]
    Scheduling {
        code: u16,
        message: String,
        pid: Option<String>,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] Fetch error: {message}")]
    Fetch {
        code: u16,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] Reassembly error: {message}")]
    Reassembly {
        code: u16,
        message: String,
        pid: Option<String>,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] Broker error: {message}")]
    Broker {
        code: u16,
        message: String,
        pid: Option<String>,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] Garbage collection error: {message}")]
    Gc {
        code: u16,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl CubeflowError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message)
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a broker error with specific code
    pub fn broker_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Broker {
            code,
            message: message.into(),
            pid: None,
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(mut self, source: impl Into<BoxedSource>) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Planning { source: src, .. }
            | Self::Scheduling { source: src, .. }
            | Self::Fetch { source: src, .. }
            | Self::Reassembly { source: src, .. }
            | Self::Broker { source: src, .. }
            | Self::Gc { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Attach the process id the error belongs to, where the variant tracks one
    pub fn with_pid(mut self, process: impl Into<String>) -> Self {
        match &mut self {
            Self::Scheduling { pid, .. } | Self::Reassembly { pid, .. } | Self::Broker { pid, .. } => {
                *pid = Some(process.into());
            }
            _ => {}
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Planning { message, .. }
            | Self::Scheduling { message, .. }
            | Self::Fetch { message, .. }
            | Self::Reassembly { message, .. }
            | Self::Broker { message, .. }
            | Self::Gc { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Planning { code, .. }
            | Self::Scheduling { code, .. }
            | Self::Fetch { code, .. }
            | Self::Reassembly { code, .. }
            | Self::Broker { code, .. }
            | Self::Gc { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// The process id attached to this error, if any
    pub fn pid(&self) -> Option<&str> {
        match self {
            Self::Scheduling { pid, .. } | Self::Reassembly { pid, .. } | Self::Broker { pid, .. } => {
                pid.as_deref()
            }
            _ => None,
        }
    }

    /// HTTP status hint for the transport layer
    pub fn http_status(&self) -> u16 {
        match self.code() {
            ErrorCode::PLAN_BAD_INPUT => 400,
            ErrorCode::RESULT_NOT_FOUND => 404,
            ErrorCode::FETCH_FORBIDDEN => 403,
            ErrorCode::RESULT_TIMEOUT => 504,
            _ => 500,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Planning { .. } => 3,
            Self::Scheduling { .. } => 4,
            Self::Fetch { .. } => 5,
            Self::Reassembly { .. } => 6,
            Self::Broker { .. } => 7,
            Self::Gc { .. } => 8,
            Self::Other { .. } => 1,
        }
    }
}

impl From<PlanningError> for CubeflowError {
    fn from(err: PlanningError) -> Self {
        let code = match &err {
            PlanningError::BadInput(_) => ErrorCode::PLAN_BAD_INPUT,
            PlanningError::Internal(_) => ErrorCode::PLAN_INTERNAL,
            PlanningError::MissingHeader => ErrorCode::PLAN_EMPTY,
        };
        Self::Planning {
            code,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<ScheduleError> for CubeflowError {
    fn from(err: ScheduleError) -> Self {
        let code = match &err {
            ScheduleError::HeaderWrite(_) => ErrorCode::SCHEDULE_HEADER_WRITE,
            ScheduleError::Publish { .. } => ErrorCode::SCHEDULE_PUBLISH,
            ScheduleError::Cancelled { .. } => ErrorCode::SCHEDULE_CANCELLED,
            ScheduleError::Expire(_) => ErrorCode::SCHEDULE_GENERIC,
        };
        Self::Scheduling {
            code,
            message: err.to_string(),
            pid: None,
            source: Some(Box::new(err)),
        }
    }
}

impl From<StorageError> for CubeflowError {
    fn from(err: StorageError) -> Self {
        let code = match &err {
            StorageError::NotFound(_) => ErrorCode::FETCH_NOT_FOUND,
            StorageError::Forbidden(_) => ErrorCode::FETCH_FORBIDDEN,
            StorageError::Unavailable(_) | StorageError::Timeout(_) => {
                ErrorCode::FETCH_UNAVAILABLE
            }
            StorageError::Cancelled => ErrorCode::FETCH_CANCELLED,
            _ => ErrorCode::FETCH_GENERIC,
        };
        Self::Fetch {
            code,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<ReassemblyError> for CubeflowError {
    fn from(err: ReassemblyError) -> Self {
        let code = match &err {
            ReassemblyError::UnknownKind(_) | ReassemblyError::Init(_) => {
                ErrorCode::REASSEMBLY_INIT
            }
            ReassemblyError::Pack(_) | ReassemblyError::Incomplete { .. } => {
                ErrorCode::REASSEMBLY_PACK
            }
            ReassemblyError::Add { .. }
            | ReassemblyError::DuplicateIndex(_)
            | ReassemblyError::IndexOutOfRange { .. } => ErrorCode::REASSEMBLY_ADD,
            _ => ErrorCode::REASSEMBLY_GENERIC,
        };
        Self::Reassembly {
            code,
            message: err.to_string(),
            pid: None,
            source: Some(Box::new(err)),
        }
    }
}

impl From<GatherError> for CubeflowError {
    fn from(err: GatherError) -> Self {
        Self::Reassembly {
            code: ErrorCode::REASSEMBLY_PACK,
            message: err.to_string(),
            pid: None,
            source: Some(Box::new(err)),
        }
    }
}

impl From<BrokerError> for CubeflowError {
    fn from(err: BrokerError) -> Self {
        let code = match &err {
            BrokerError::Connection(_) => ErrorCode::BROKER_CONNECTION,
            _ => ErrorCode::BROKER_GENERIC,
        };
        Self::Broker {
            code,
            message: err.to_string(),
            pid: None,
            source: Some(Box::new(err)),
        }
    }
}

impl From<ResultError> for CubeflowError {
    fn from(err: ResultError) -> Self {
        let (code, pid) = match &err {
            ResultError::NotFound(pid) => (ErrorCode::RESULT_NOT_FOUND, Some(pid.clone())),
            ResultError::MalformedHeader(_) => (ErrorCode::RESULT_MALFORMED_HEADER, None),
            ResultError::PartFailed(_) => (ErrorCode::RESULT_PART_FAILED, None),
            ResultError::Timeout(_) => (ErrorCode::RESULT_TIMEOUT, None),
            ResultError::Broker(BrokerError::Connection(_)) => (ErrorCode::BROKER_CONNECTION, None),
            _ => (ErrorCode::BROKER_GENERIC, None),
        };
        Self::Broker {
            code,
            message: err.to_string(),
            pid,
            source: Some(Box::new(err)),
        }
    }
}

impl From<GcError> for CubeflowError {
    fn from(err: GcError) -> Self {
        let code = match &err {
            GcError::Delete { .. } => ErrorCode::GC_DELETE_FAILED,
            GcError::Enumerate(_) => ErrorCode::GC_GENERIC,
        };
        Self::Gc {
            code,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Result alias for operations that surface [`CubeflowError`]
pub type Result<T> = std::result::Result<T, CubeflowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bad_input_maps_to_client_error() {
        let err: CubeflowError = PlanningError::BadInput("lineno out of range".into()).into();
        assert_eq!(err.code(), ErrorCode::PLAN_BAD_INPUT);
        assert_eq!(err.http_status(), 400);
        assert!(err.to_string().starts_with("[E2001]"));
    }

    #[test]
    fn test_internal_planning_error_is_server_error() {
        let err: CubeflowError = PlanningError::Internal("bad manifest".into()).into();
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_result_not_found_carries_pid() {
        let err: CubeflowError = ResultError::NotFound("abc".into()).into();
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.pid(), Some("abc"));
    }

    #[test]
    fn test_result_timeout_status() {
        let err: CubeflowError = ResultError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(err.code(), ErrorCode::RESULT_TIMEOUT);
        assert_eq!(err.http_status(), 504);
    }

    #[test]
    fn test_with_context_and_pid() {
        let err = CubeflowError::broker_with_code(ErrorCode::BROKER_GENERIC, "xadd failed")
            .with_context("part 1/3")
            .with_pid("pid-1");
        assert_eq!(err.pid(), Some("pid-1"));
        assert!(err.to_string().contains("xadd failed: part 1/3"));
    }

    #[test]
    fn test_with_pid_ignored_for_config() {
        let err = CubeflowError::config("missing redis url").with_pid("p");
        assert_eq!(err.pid(), None);
        assert_eq!(err.exit_code(), 2);
    }
}
