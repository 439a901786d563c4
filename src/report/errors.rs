// Execution-side error types with operator-facing suggestions

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

use super::ReportError;

/// Color output only when stderr is a TTY and NO_COLOR is unset
/// (https://no-color.org/)
fn should_use_colors() -> bool {
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    std::io::stderr().is_terminal()
}

/// Errors raised while driving remote machines. These are execution
/// errors: the connection, transfer, or command invocation itself went
/// wrong. A check that ran but reported an unmet condition is a domain
/// failure and is carried as a [`ReportError`] instead.
#[derive(Debug)]
pub enum DeployError {
    /// Connection establishment or transport failures
    Connection {
        node: String,
        message: String,
        suggestion: Option<String>,
    },

    /// Uploading a file to the remote machine failed
    FileTransfer {
        node: String,
        remote_path: String,
        message: String,
    },

    /// A remote command could not be invoked or exited non-zero
    Command {
        node: String,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// An embedded script asset is missing
    Asset { path: String },

    /// Bad deploy spec or operation configuration
    Config {
        message: String,
        suggestion: Option<String>,
    },

    /// Executor registry lookup or dispatch failures
    Executor { message: String },

    /// Local I/O errors (log files, spec files)
    Io {
        message: String,
        path: Option<PathBuf>,
    },
}

impl DeployError {
    /// The node this error is bound to, when there is one.
    pub fn node(&self) -> Option<&str> {
        match self {
            DeployError::Connection { node, .. }
            | DeployError::FileTransfer { node, .. }
            | DeployError::Command { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Convert into the structured report error attached to actions and
    /// task items.
    pub fn to_report(&self) -> ReportError {
        match self {
            DeployError::Connection {
                node,
                message,
                suggestion,
            } => ReportError::new("connection failed")
                .with_detail(format!("node {}: {}", node, message))
                .with_fix(suggestion.clone().unwrap_or_else(|| {
                    "check the node address, credentials and SSH service".to_string()
                })),

            DeployError::FileTransfer {
                node,
                remote_path,
                message,
            } => ReportError::new("file transfer failed")
                .with_detail(format!("node {}: {} -> {}", node, message, remote_path))
                .with_fix("check remote disk space and permissions"),

            DeployError::Command {
                node,
                command,
                exit_code,
                stderr,
            } => {
                let mut detail = format!("node {}: command `{}` failed", node, command);
                if let Some(code) = exit_code {
                    detail.push_str(&format!(" with exit code {}", code));
                }
                if !stderr.is_empty() {
                    detail.push_str(&format!(", stderr: {}", stderr.trim_end()));
                }
                ReportError::new("command failed")
                    .with_detail(detail)
                    .with_fix("inspect the action log file for the full output")
            }

            DeployError::Asset { path } => ReportError::new("missing embedded script")
                .with_detail(format!("no embedded asset at {}", path))
                .with_fix("this build is broken, rebuild kforge from source"),

            DeployError::Config {
                message,
                suggestion,
            } => {
                let mut err = ReportError::new("invalid configuration").with_detail(message.clone());
                if let Some(fix) = suggestion {
                    err = err.with_fix(fix.clone());
                }
                err
            }

            DeployError::Executor { message } => {
                ReportError::new("executor dispatch failed").with_detail(message.clone())
            }

            DeployError::Io { message, path } => {
                let mut detail = message.clone();
                if let Some(path) = path {
                    detail.push_str(&format!(" ({})", path.display()));
                }
                ReportError::new("i/o error").with_detail(detail)
            }
        }
    }
}

impl std::error::Error for DeployError {}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            DeployError::Connection {
                node,
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "CONNECTION ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Node:".dimmed(), node)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            DeployError::FileTransfer {
                node,
                remote_path,
                message,
            } => {
                writeln!(f, "{}: {}", "TRANSFER ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Node:".dimmed(), node)?;
                writeln!(f, "  {} {}", "Remote path:".dimmed(), remote_path)?;
                Ok(())
            }

            DeployError::Command {
                node,
                command,
                exit_code,
                stderr,
            } => {
                write!(f, "{}: `{}`", "COMMAND FAILED".red().bold(), command)?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {})", code)?;
                }
                writeln!(f)?;
                writeln!(f, "  {} {}", "Node:".dimmed(), node)?;

                if !stderr.is_empty() {
                    writeln!(f)?;
                    writeln!(f, "  {}:", "stderr".dimmed())?;
                    for line in stderr.lines().take(10) {
                        writeln!(f, "    {}", line)?;
                    }
                }

                Ok(())
            }

            DeployError::Asset { path } => {
                writeln!(
                    f,
                    "{}: no embedded script at {}",
                    "ASSET ERROR".red().bold(),
                    path
                )?;
                Ok(())
            }

            DeployError::Config {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "CONFIG ERROR".red().bold(), message)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            DeployError::Executor { message } => {
                writeln!(f, "{}: {}", "EXECUTOR ERROR".red().bold(), message)?;
                Ok(())
            }

            DeployError::Io { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }
        }
    }
}
