use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error("failed to read stack file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid stack file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("infra error: {0}")]
    Infra(#[from] vs_infra::Error),

    #[error("graph error: {0}")]
    Graph(#[from] tf_graph::Error),

    #[error("{} vm(s) failed to compose: {}", .0.len(), .0.join(", "))]
    VmsFailed(Vec<String>),
}

pub type Result<T> = std::result::Result<T, SynthError>;
