use std::time::Duration;

use ethlink_transport::{RateLimitError, ShapingError, TransportError};
use thiserror::Error;

/// 流层错误的粗粒度分类，调用方据此决定重试、回退或放弃。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// 收发或等待激活超时；可恢复。
    Timeout,
    /// 被 `abort()` 打断；不会自动重试。
    Aborted,
    /// 底层套接字失败。
    TransportFailure,
    /// 参数组合非法，创建时即失败。
    InvalidConfiguration,
    /// 平台不支持所请求的能力（内核整形）。
    NotSupported,
    /// 生命周期状态不允许该操作。
    InvalidState,
    /// 调用参数非法（例如帧缓冲长度不符）。
    InvalidArgument,
}

/// 以太网流的统一错误类型。
///
/// # 契约说明（What）
/// - 每个变体都有稳定错误码（[`StreamError::code`]）与分类（[`StreamError::kind`]）；
/// - `read`/`write` 不存在“部分成功”：要么整帧完成，要么返回这里的某个错误。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StreamError {
    /// 操作超时。
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    /// 流被中止。
    #[error("stream aborted")]
    Aborted,
    /// 流未激活（或在阻塞期间被去激活）。
    #[error("stream is not activated")]
    NotActivated,
    /// 流已处于激活状态。
    #[error("stream is already activated")]
    AlreadyActivated,
    /// 底层传输失败。
    #[error("transport failure: {0}")]
    Transport(#[source] TransportError),
    /// 配置非法。
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// 帧缓冲长度不等于帧大小。
    #[error("frame buffer must be exactly {expected} bytes, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },
    /// 平台不支持。
    #[error("not supported: {0}")]
    NotSupported(String),
    /// 限流器拒绝申请。
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    /// 流量整形失败。
    #[error("traffic shaping failed: {0}")]
    Shaping(#[source] ShapingError),
}

impl StreamError {
    /// 错误分类。
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Timeout { .. } => ErrorKind::Timeout,
            StreamError::Aborted => ErrorKind::Aborted,
            StreamError::NotActivated | StreamError::AlreadyActivated => ErrorKind::InvalidState,
            StreamError::Transport(_) => ErrorKind::TransportFailure,
            StreamError::InvalidConfiguration(_) | StreamError::RateLimit(_) => {
                ErrorKind::InvalidConfiguration
            }
            StreamError::InvalidFrameSize { .. } => ErrorKind::InvalidArgument,
            StreamError::NotSupported(_) => ErrorKind::NotSupported,
            StreamError::Shaping(ShapingError::NotSupported { .. }) => ErrorKind::NotSupported,
            StreamError::Shaping(_) => ErrorKind::InvalidConfiguration,
        }
    }

    /// 稳定错误码，适合日志与告警聚合。
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Timeout => "ethlink.stream.timeout",
            ErrorKind::Aborted => "ethlink.stream.aborted",
            ErrorKind::TransportFailure => "ethlink.stream.transport_failed",
            ErrorKind::InvalidConfiguration => "ethlink.stream.invalid_configuration",
            ErrorKind::NotSupported => "ethlink.stream.not_supported",
            ErrorKind::InvalidState => "ethlink.stream.invalid_state",
            ErrorKind::InvalidArgument => "ethlink.stream.invalid_argument",
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

impl From<TransportError> for StreamError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout { operation, timeout } => {
                StreamError::Timeout { operation, timeout }
            }
            other => StreamError::Transport(other),
        }
    }
}

impl From<ShapingError> for StreamError {
    fn from(error: ShapingError) -> Self {
        match error {
            ShapingError::NotSupported { reason } => StreamError::NotSupported(reason),
            other => StreamError::Shaping(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn transport_timeouts_surface_as_stream_timeouts() {
        let err = StreamError::from(TransportError::Timeout {
            operation: "receive",
            timeout: Duration::from_millis(5),
        });
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.code(), "ethlink.stream.timeout");

        let err = StreamError::from(TransportError::Io {
            operation: "send",
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        });
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }

    #[test]
    fn unsupported_shaping_maps_to_not_supported() {
        let err = StreamError::from(ShapingError::NotSupported {
            reason: "no tc".to_owned(),
        });
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert_eq!(err.code(), "ethlink.stream.not_supported");

        let err = StreamError::from(ShapingError::InterfaceNotFound {
            address: "0.0.0.0".to_owned(),
        });
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }
}
