//! 下载相关错误

use reqwest::StatusCode;

/// 下载错误类型
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// HTTP 请求错误
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP 状态码错误
    #[error("HTTP 状态码 {status}: {url}")]
    StatusCode { status: StatusCode, url: String },

    /// 读取响应体失败
    #[error("读取响应体失败({url}): {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// 连接层失败（非 reqwest 传输实现使用）
    #[error("网络不可达: {0}")]
    Unreachable(String),
}

impl DownloadError {
    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Http(e) => !e.is_builder(),
            DownloadError::StatusCode { status, .. } => is_retryable_status(*status),
            DownloadError::Body { .. } | DownloadError::Unreachable(_) => true,
        }
    }

    /// 签名 URL 过期/无权限，值得向 resolver 刷新一次
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            DownloadError::StatusCode { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_display() {
        let err = DownloadError::Unreachable("offline".to_owned());
        assert_eq!(err.to_string(), "网络不可达: offline");
    }

    #[test]
    fn test_is_retryable() {
        assert!(
            DownloadError::StatusCode {
                status: StatusCode::REQUEST_TIMEOUT,
                url: "http://example.com".to_string()
            }
            .is_retryable()
        );
        assert!(
            DownloadError::StatusCode {
                status: StatusCode::BAD_GATEWAY,
                url: "http://example.com".to_string()
            }
            .is_retryable()
        );
        assert!(
            !DownloadError::StatusCode {
                status: StatusCode::NOT_FOUND,
                url: "http://example.com".to_string()
            }
            .is_retryable()
        );
        assert!(DownloadError::Unreachable("x".to_owned()).is_retryable());
    }

    #[test]
    fn test_auth_expired() {
        let err = DownloadError::StatusCode {
            status: StatusCode::FORBIDDEN,
            url: "http://example.com".to_string(),
        };
        assert!(err.is_auth_expired());
        assert!(!DownloadError::Unreachable("x".to_owned()).is_auth_expired());
    }
}
