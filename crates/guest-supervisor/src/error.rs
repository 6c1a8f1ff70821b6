use std::io;

/// Transport failures of the process-event listener. Any of these ends
/// monitoring; the daemon itself keeps running.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("socket for process listening failed: {0}")]
    Socket(io::Error),

    #[error("bind for process listening failed: {0}")]
    Bind(io::Error),

    #[error("send for process listening failed: {0}")]
    Subscribe(io::Error),

    #[error("spawn process listener thread: {0}")]
    Thread(io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}
