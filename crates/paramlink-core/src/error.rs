//! Error types for paramlink-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for paramlink-core
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound control message could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Address is not present in the parameter registry
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// A registry write would break `min <= value <= max`
    #[error("Value {value} out of range [{min}, {max}] for {address}")]
    OutOfRange {
        address: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Outbound send failed
    #[error("Emitter error: {0}")]
    Emitter(#[from] EmitterError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (server exit, shutdown signal failures, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Config(err) => Some(err.remediation()),
            Self::Emitter(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check that the listen address is free and permitted, then retry.")
                    .command("Find listener", "ss -ltnp")
                    .alternative("Pick another port with --port."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("Restart paramlink.")
                    .alternative("Run with RUST_LOG=paramlink_core=debug for more detail."),
            ),
            Self::MalformedMessage(_)
            | Self::UnknownParameter(_)
            | Self::OutOfRange { .. }
            | Self::Json(_) => None,
        }
    }
}

/// Errors raised by an outbound parameter emitter
#[derive(Error, Debug)]
pub enum EmitterError {
    /// Target address could not be parsed or resolved
    #[error("Invalid emitter target: {0}")]
    InvalidTarget(String),

    /// Packet encoding failed
    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// Datagram send failed
    #[error("Send failed: {0}")]
    Network(#[from] std::io::Error),
}

impl EmitterError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InvalidTarget(target) => Remediation::new(format!(
                "OSC target `{target}` is not a valid host:port pair."
            ))
            .alternative("Set [osc] target = \"127.0.0.1:9000\" or pass --osc-target."),
            Self::Encoding(_) => Remediation::new(
                "OSC packet encoding failed. Check that parameter addresses start with '/'.",
            ),
            Self::Network(_) => Remediation::new(
                "Could not send to the OSC host. Check that it is reachable.",
            )
            .command("Probe UDP port", "nc -vzu 127.0.0.1 9000"),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the TOML syntax and retry.")
                .alternative("Start from the defaults printed by `paramlink config`."),
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .alternative("Check that every parameter has min <= value <= max.")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
