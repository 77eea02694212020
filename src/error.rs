//! Error types for voxbatch.

use crate::tts::session::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxbatchError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Pipeline errors
    #[error("Pipeline configuration rejected: {message}")]
    Configuration { message: String },

    #[error("Pipeline cannot {action} while {status}")]
    InvalidState { action: String, status: String },

    // Synthesis errors (only surface when a session is driven directly)
    #[error("Synthesis failed: {0}")]
    Session(#[from] SessionError),

    // Assembly and output errors
    #[error("Failed to assemble {artifact}: {message}")]
    Assembly { artifact: String, message: String },

    #[error("Output sink error: {message}")]
    Output { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl VoxbatchError {
    /// Returns true for errors raised before a run could start.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            VoxbatchError::Configuration { .. }
                | VoxbatchError::ConfigInvalidValue { .. }
                | VoxbatchError::ConfigParse { .. }
                | VoxbatchError::ConfigFileNotFound { .. }
                | VoxbatchError::Config(_)
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxbatchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = VoxbatchError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxbatchError::ConfigInvalidValue {
            key: "pipeline.concurrency".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for pipeline.concurrency: must be at least 1"
        );
    }

    #[test]
    fn test_configuration_display() {
        let error = VoxbatchError::Configuration {
            message: "voice is empty".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Pipeline configuration rejected: voice is empty"
        );
        assert!(error.is_configuration());
    }

    #[test]
    fn test_invalid_state_display() {
        let error = VoxbatchError::InvalidState {
            action: "stop".to_string(),
            status: "idle".to_string(),
        };
        assert_eq!(error.to_string(), "Pipeline cannot stop while idle");
        assert!(!error.is_configuration());
    }

    #[test]
    fn test_session_error_conversion() {
        let error: VoxbatchError = SessionError::NoAudioReceived.into();
        assert_eq!(
            error.to_string(),
            "Synthesis failed: turn ended without any audio frames"
        );
    }

    #[test]
    fn test_assembly_display() {
        let error = VoxbatchError::Assembly {
            artifact: "book_0001.mp3".to_string(),
            message: "disk full".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to assemble book_0001.mp3: disk full"
        );
    }

    #[test]
    fn test_other_display() {
        let error = VoxbatchError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxbatchError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxbatchError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
        assert!(error.is_configuration());
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: VoxbatchError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxbatchError>();
        assert_sync::<VoxbatchError>();
    }
}
