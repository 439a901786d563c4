// SSH-backed machine built on ssh2

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ssh2::{KeyboardInteractivePrompt, Session};

use super::{CommandOutput, Machine};
use crate::cluster::Node;
use crate::report::DeployError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One exclusive SSH connection to a node. The session lives until
/// [`Machine::close`] is called (or the machine is dropped); commands on
/// a closed machine fail with a connection error.
pub struct SshMachine {
    node_name: String,
    session: Mutex<Option<Session>>,
}

impl SshMachine {
    /// Establish a connection: TCP with timeout, handshake, then
    /// agent -> key file -> password authentication.
    pub fn connect(node: &Node) -> Result<Self, DeployError> {
        let address = format!("{}:{}", node.address, node.port);

        let addr = address.parse().map_err(|e| DeployError::Connection {
            node: node.name.clone(),
            message: format!("invalid address {}: {}", address, e),
            suggestion: Some("check the node address in the deploy spec".to_string()),
        })?;

        let tcp =
            TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|e| {
                DeployError::Connection {
                    node: node.name.clone(),
                    message: format!("connection failed: {}", e),
                    suggestion: connection_suggestion(&e),
                }
            })?;

        let mut session = Session::new().map_err(|e| DeployError::Connection {
            node: node.name.clone(),
            message: format!("failed to create SSH session: {}", e),
            suggestion: None,
        })?;

        session.set_tcp_stream(tcp);
        session.set_timeout(CONNECT_TIMEOUT.as_millis() as u32);

        session.handshake().map_err(|e| DeployError::Connection {
            node: node.name.clone(),
            message: format!("SSH handshake failed: {}", e),
            suggestion: Some("check SSH service is running on the node".to_string()),
        })?;

        authenticate(&session, node)?;

        Ok(SshMachine {
            node_name: node.name.clone(),
            session: Mutex::new(Some(session)),
        })
    }

    fn connection_closed(&self) -> DeployError {
        DeployError::Connection {
            node: self.node_name.clone(),
            message: "connection already closed".to_string(),
            suggestion: None,
        }
    }
}

fn authenticate(session: &Session, node: &Node) -> Result<(), DeployError> {
    let user = &node.user;

    // SSH agent first
    if let Ok(mut agent) = session.agent() {
        if agent.connect().is_ok() {
            agent.list_identities().ok();
            for identity in agent.identities().unwrap_or_default() {
                if agent.userauth(user, &identity).is_ok() {
                    return Ok(());
                }
            }
        }
    }

    // Key files: spec-provided key, then the usual defaults
    let mut key_paths: Vec<String> = Vec::new();
    if let Some(ref key) = node.private_key {
        key_paths.push(key.clone());
    }
    if let Some(home) = std::env::var_os("HOME") {
        let home = Path::new(&home);
        key_paths.push(home.join(".ssh/id_ed25519").to_string_lossy().to_string());
        key_paths.push(home.join(".ssh/id_rsa").to_string_lossy().to_string());
    }

    for key_path in key_paths {
        if Path::new(&key_path).exists()
            && session
                .userauth_pubkey_file(user, None, Path::new(&key_path), None)
                .is_ok()
        {
            return Ok(());
        }
    }

    // Password, with a keyboard-interactive fallback for PAM setups
    if let Some(ref password) = node.password {
        if session.userauth_password(user, password).is_ok() {
            return Ok(());
        }

        let mut prompter = PasswordPrompter(password.clone());
        if session
            .userauth_keyboard_interactive(user, &mut prompter)
            .is_ok()
        {
            return Ok(());
        }
    }

    Err(DeployError::Connection {
        node: node.name.clone(),
        message: "authentication failed".to_string(),
        suggestion: Some(
            "ensure an SSH key is in the agent, or set private_key/password in the deploy spec"
                .to_string(),
        ),
    })
}

#[async_trait]
impl Machine for SshMachine {
    fn name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, executable: &str, args: &[String]) -> Result<CommandOutput, DeployError> {
        let command = render_command(executable, args);

        let guard = self.session.lock();
        let session = guard.as_ref().ok_or_else(|| self.connection_closed())?;

        let mut channel = session
            .channel_session()
            .map_err(|e| DeployError::Connection {
                node: self.node_name.clone(),
                message: format!("failed to open channel: {}", e),
                suggestion: None,
            })?;

        channel.exec(&command).map_err(|e| DeployError::Command {
            node: self.node_name.clone(),
            command: command.clone(),
            exit_code: None,
            stderr: format!("failed to execute: {}", e),
        })?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        channel.read_to_string(&mut stdout).ok();
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close().ok();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn put_file(&self, content: &[u8], remote_path: &str) -> Result<(), DeployError> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or_else(|| self.connection_closed())?;

        let sftp = session.sftp().map_err(|e| DeployError::FileTransfer {
            node: self.node_name.clone(),
            remote_path: remote_path.to_string(),
            message: format!("failed to open SFTP: {}", e),
        })?;

        // Parent directories may not exist on a fresh node
        if let Some(parent) = Path::new(remote_path).parent() {
            let mut dir = std::path::PathBuf::new();
            for part in parent.components() {
                dir.push(part);
                sftp.mkdir(&dir, 0o755).ok();
            }
        }

        let mut remote_file =
            sftp.create(Path::new(remote_path))
                .map_err(|e| DeployError::FileTransfer {
                    node: self.node_name.clone(),
                    remote_path: remote_path.to_string(),
                    message: format!("failed to create remote file: {}", e),
                })?;

        remote_file
            .write_all(content)
            .map_err(|e| DeployError::FileTransfer {
                node: self.node_name.clone(),
                remote_path: remote_path.to_string(),
                message: format!("failed to write remote file: {}", e),
            })?;

        Ok(())
    }

    fn close(&self) {
        if let Some(session) = self.session.lock().take() {
            session.disconnect(None, "closing", None).ok();
        }
    }
}

impl Drop for SshMachine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Render an executable plus arguments into one shell command line,
/// single-quoting arguments that need it.
pub(crate) fn render_command(executable: &str, args: &[String]) -> String {
    let mut command = executable.to_string();
    for arg in args {
        command.push(' ');
        if needs_quoting(arg) {
            command.push('\'');
            command.push_str(&arg.replace('\'', "'\\''"));
            command.push('\'');
        } else {
            command.push_str(arg);
        }
    }
    command
}

fn needs_quoting(arg: &str) -> bool {
    arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '$' | '`' | '\\' | ';' | '&' | '|'))
}

fn connection_suggestion(e: &std::io::Error) -> Option<String> {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Some("ensure SSH service is running on the node".to_string())
        }
        std::io::ErrorKind::TimedOut => {
            Some("check network connectivity and firewall rules".to_string())
        }
        std::io::ErrorKind::PermissionDenied => {
            Some("check SSH key permissions and authentication".to_string())
        }
        _ => None,
    }
}

/// Helper for keyboard-interactive authentication
struct PasswordPrompter(String);

impl KeyboardInteractivePrompt for PasswordPrompter {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.0.clone()).collect()
    }
}
