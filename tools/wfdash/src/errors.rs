use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("cluster error: {0}")]
    Cluster(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("terminal error: {0}")]
    Terminal(String),
}

impl From<std::io::Error> for DashError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
