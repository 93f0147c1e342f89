use std::fmt;

use thiserror::Error;
use vault_core::ValidationError;
use vault_core::jsonrpc::{
    CODE_INTERNAL_ERROR, CODE_INVALID_PARAMS, CODE_INVALID_REQUEST, CODE_METHOD_NOT_FOUND,
    CODE_PARSE_ERROR, CODE_SERVER_ERROR,
};

/// Machine-readable outcome attached to every reply the gateway delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    InvalidParams,
    UnsupportedMethod,
    UserMessageParseError,
    NodeResponseEncodingError,
    RequestTimeout,
    /// Only counted internally; never delivered to a caller.
    StaleNodeResponse,
    UnsupportedDonId,
    HandlerError,
    FatalError,
    Unauthorized,
}

const REQUEST_TIMEOUT_CODE: i64 = CODE_SERVER_ERROR;
const UNAUTHORIZED_CODE: i64 = CODE_SERVER_ERROR - 1;

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NoError => "NoError",
            ErrorCode::InvalidParams => "InvalidParamsError",
            ErrorCode::UnsupportedMethod => "UnsupportedMethodError",
            ErrorCode::UserMessageParseError => "UserMessageParseError",
            ErrorCode::NodeResponseEncodingError => "NodeResponseEncodingError",
            ErrorCode::RequestTimeout => "RequestTimeoutError",
            ErrorCode::StaleNodeResponse => "StaleNodeResponseError",
            ErrorCode::UnsupportedDonId => "UnsupportedDONIdError",
            ErrorCode::HandlerError => "HandlerError",
            ErrorCode::FatalError => "FatalError",
            ErrorCode::Unauthorized => "UnauthorizedError",
        }
    }

    pub fn to_jsonrpc(self) -> i64 {
        match self {
            ErrorCode::NoError => 0,
            ErrorCode::UserMessageParseError => CODE_PARSE_ERROR,
            ErrorCode::UnsupportedMethod => CODE_METHOD_NOT_FOUND,
            ErrorCode::InvalidParams => CODE_INVALID_PARAMS,
            ErrorCode::UnsupportedDonId => CODE_INVALID_REQUEST,
            ErrorCode::RequestTimeout => REQUEST_TIMEOUT_CODE,
            ErrorCode::Unauthorized => UNAUTHORIZED_CODE,
            ErrorCode::NodeResponseEncodingError
            | ErrorCode::StaleNodeResponse
            | ErrorCode::HandlerError
            | ErrorCode::FatalError => CODE_INTERNAL_ERROR,
        }
    }

    /// Maps an error code embedded in an aggregated node response.
    pub fn from_jsonrpc(code: i64) -> Self {
        match code {
            0 => ErrorCode::NoError,
            CODE_PARSE_ERROR => ErrorCode::UserMessageParseError,
            CODE_METHOD_NOT_FOUND => ErrorCode::UnsupportedMethod,
            CODE_INVALID_PARAMS => ErrorCode::InvalidParams,
            CODE_INVALID_REQUEST => ErrorCode::UnsupportedDonId,
            REQUEST_TIMEOUT_CODE => ErrorCode::RequestTimeout,
            UNAUTHORIZED_CODE => ErrorCode::Unauthorized,
            _ => ErrorCode::FatalError,
        }
    }

    pub fn is_user_error(self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidParams
                | ErrorCode::UnsupportedMethod
                | ErrorCode::UserMessageParseError
                | ErrorCode::UnsupportedDonId
                | ErrorCode::Unauthorized
        )
    }

    pub fn is_internal_error(self) -> bool {
        matches!(
            self,
            ErrorCode::StaleNodeResponse
                | ErrorCode::FatalError
                | ErrorCode::NodeResponseEncodingError
                | ErrorCode::RequestTimeout
                | ErrorCode::HandlerError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures the gateway reports to a caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request ID cannot be empty")]
    EmptyRequestId,
    #[error("request not authorized: {0}")]
    Unauthorized(String),
    #[error("request not authorized: owner {0:?} cannot prefix a request ID")]
    InvalidOwner(String),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("user message parse error: {0}")]
    Parse(String),
    #[error("invalid params error: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    Encoding(String),
    #[error("failed to forward user request to nodes")]
    AllNodesUnreachable,
    #[error("{0}")]
    QuorumUnobtainable(String),
    #[error("request expired without getting any response")]
    Timeout,
    #[error("{0}")]
    Handler(String),
    #[error("request cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::EmptyRequestId | GatewayError::InvalidParams(_) => {
                ErrorCode::InvalidParams
            }
            GatewayError::Unauthorized(_) | GatewayError::InvalidOwner(_) => {
                ErrorCode::Unauthorized
            }
            GatewayError::UnsupportedMethod(_) => ErrorCode::UnsupportedMethod,
            GatewayError::Parse(_) => ErrorCode::UserMessageParseError,
            GatewayError::Encoding(_) => ErrorCode::NodeResponseEncodingError,
            GatewayError::AllNodesUnreachable | GatewayError::QuorumUnobtainable(_) => {
                ErrorCode::FatalError
            }
            GatewayError::Timeout => ErrorCode::RequestTimeout,
            GatewayError::Handler(_) | GatewayError::Cancelled => ErrorCode::HandlerError,
        }
    }

    /// Text placed in the caller's JSON-RPC error. Encoding failures are replaced
    /// by the bare code name so internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Encoding(_) => ErrorCode::NodeResponseEncodingError.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ValidationError> for GatewayError {
    fn from(value: ValidationError) -> Self {
        GatewayError::InvalidParams(value.to_string())
    }
}
