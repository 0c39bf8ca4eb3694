use thiserror::Error;

/// Failure while paging through one layer. Aborts the layer and the refresh cycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    #[error("layer {layer}: request for page {page} failed")]
    Transport {
        layer: String,
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("layer {layer}: page {page} timed out")]
    Timeout {
        layer: String,
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("layer {layer}: page {page} returned HTTP {status}")]
    Status { layer: String, page: u32, status: u16 },

    #[error("layer {layer}: page {page} is not a valid feature page")]
    Decode {
        layer: String,
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("layer {layer}: page {page} rejected by feature service (code {code:?}): {message}")]
    Service {
        layer: String,
        page: u32,
        code: Option<i64>,
        message: String,
    },

    /// Free-form failure for sources other than the ArcGIS client.
    #[error("layer {layer}: {message}")]
    Message { layer: String, message: String },
}

impl FetchError {
    pub fn layer(&self) -> &str {
        match self {
            FetchError::Transport { layer, .. }
            | FetchError::Timeout { layer, .. }
            | FetchError::Status { layer, .. }
            | FetchError::Decode { layer, .. }
            | FetchError::Service { layer, .. }
            | FetchError::Message { layer, .. } => layer,
        }
    }

    /// Whether the same page request may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Decode { .. } | FetchError::Service { .. } | FetchError::Message { .. } => {
                false
            }
        }
    }

    pub(crate) fn from_reqwest(layer: &str, page: u32, source: reqwest::Error) -> Self {
        let layer = layer.to_string();
        if source.is_timeout() {
            FetchError::Timeout {
                layer,
                page,
                source,
            }
        } else if source.is_decode() {
            FetchError::Decode {
                layer,
                page,
                source,
            }
        } else if let Some(status) = source.status() {
            FetchError::Status {
                layer,
                page,
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport {
                layer,
                page,
                source,
            }
        }
    }
}

/// Stage of the replacement unit of work that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStage {
    Begin,
    Insert,
    Commit,
}

impl std::fmt::Display for PersistStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PersistStage::Begin => "begin",
            PersistStage::Insert => "insert",
            PersistStage::Commit => "commit",
        })
    }
}

/// Single failure signal of a refresh cycle. The store is left as it was.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RefreshError {
    #[error("fetch failed")]
    Fetch(#[from] FetchError),

    #[error("persistence failed during {stage}")]
    Persistence {
        stage: PersistStage,
        #[source]
        source: crate::Error,
    },

    #[error("a refresh cycle is already running")]
    AlreadyRunning,
}

impl RefreshError {
    pub(crate) fn persistence(stage: PersistStage) -> impl FnOnce(crate::Error) -> Self {
        move |source| RefreshError::Persistence { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_retry_only_on_server_side_codes() {
        let status = |status| FetchError::Status {
            layer: "UAV".to_string(),
            page: 1,
            status,
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert_eq!(status(404).layer(), "UAV");
    }

    #[test]
    fn refresh_error_names_failing_layer() {
        let err = RefreshError::from(FetchError::Status {
            layer: "National_Park".to_string(),
            page: 2,
            status: 502,
        });
        assert_eq!(err.to_string(), "fetch failed");
        assert_eq!(
            crate::error::error_chain(&err),
            "fetch failed: layer National_Park: page 2 returned HTTP 502"
        );
    }
}
