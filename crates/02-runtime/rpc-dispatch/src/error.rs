use thiserror::Error;

use transport::TransportError;
use transport_codecs::{CodecError, ResultCode};

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("reply {type_name} for seq {seq} carried no body")]
    NoBody { seq: u64, type_name: String },

    #[error("malformed {type_name} body for seq {seq}: {reason}")]
    MalformedBody {
        seq: u64,
        type_name: String,
        reason: String,
    },

    #[error("no decoder registered for type {0:?}")]
    UnknownType(String),

    #[error("expected {expected} reply, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: &'static str,
    },

    /// The executor processed the call and reported a non-zero result code.
    #[error("executor returned {code}: {message}")]
    Aborted { code: i32, message: String },

    /// The call was retired locally before a reply arrived.
    #[error("call cancelled")]
    Cancelled,

    #[error("client is shut down")]
    Shutdown,

    #[error("timed out waiting for reply")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn internal(msg: impl Into<String>) -> Self {
        RpcError::Internal(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled)
    }

    /// Maps an executor result code onto the call's error channel.
    pub fn check(result: &ResultCode) -> RpcResult<()> {
        if result.is_ok() {
            Ok(())
        } else {
            Err(RpcError::Aborted {
                code: result.code,
                message: result.message.clone(),
            })
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_code_aborts() {
        assert_eq!(RpcError::check(&ResultCode::ok()), Ok(()));
        let err = RpcError::check(&ResultCode::error(2, "bad shape")).unwrap_err();
        assert_eq!(
            err,
            RpcError::Aborted {
                code: 2,
                message: "bad shape".into()
            }
        );
        assert_eq!(err.to_string(), "executor returned 2: bad shape");
    }
}
