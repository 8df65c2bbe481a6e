/// Invalid engine configuration. Always fatal at initialization.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    InvalidProjection(String),
    InvalidClusterRadius(f64),
    Io(String),
    Parse(String),
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigurationError::InvalidProjection(msg) => {
                write!(f, "invalid projection: {msg}")
            }
            ConfigurationError::InvalidClusterRadius(radius) => {
                write!(f, "cluster radius must be finite and positive, got {radius}")
            }
            ConfigurationError::Io(msg) => write!(f, "config read failed: {msg}"),
            ConfigurationError::Parse(msg) => write!(f, "config parse failed: {msg}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}
