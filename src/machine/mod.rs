// Remote machine abstraction: run commands and push files to one node

mod local;
mod ssh;

pub use local::LocalMachine;
pub use ssh::SshMachine;

use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::Node;
use crate::report::DeployError;

/// Result of running one command on a machine.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Handle to one machine. A machine is exclusive to the operation that
/// opened it: no pooling, no sharing across concurrent workers, closed on
/// every exit path. Closing twice is a no-op.
#[async_trait]
pub trait Machine: Send + Sync {
    /// Node name this machine is bound to.
    fn name(&self) -> &str;

    /// Run one command and capture its output.
    async fn run(&self, executable: &str, args: &[String]) -> Result<CommandOutput, DeployError>;

    /// Write content to a file on the machine, creating parent
    /// directories as needed.
    async fn put_file(&self, content: &[u8], remote_path: &str) -> Result<(), DeployError>;

    /// Release the underlying connection.
    fn close(&self);
}

/// Open a machine handle for a node, local or over SSH.
pub async fn connect(node: &Node) -> Result<Arc<dyn Machine>, DeployError> {
    if node.is_local() {
        Ok(Arc::new(LocalMachine::new(&node.name)))
    } else {
        Ok(Arc::new(SshMachine::connect(node)?))
    }
}

#[cfg(test)]
pub mod fake {
    //! Scripted machine for unit tests: records every command and file
    //! transfer, replays queued outputs.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    pub struct FakeMachine {
        name: String,
        outputs: Mutex<VecDeque<CommandOutput>>,
        pub commands: Mutex<Vec<String>>,
        pub uploads: Mutex<Vec<String>>,
        pub close_count: AtomicUsize,
    }

    impl FakeMachine {
        pub fn new(name: impl Into<String>) -> Self {
            FakeMachine {
                name: name.into(),
                outputs: Mutex::new(VecDeque::new()),
                commands: Mutex::new(Vec::new()),
                uploads: Mutex::new(Vec::new()),
                close_count: AtomicUsize::new(0),
            }
        }

        /// Queue the output for the next command; when the queue is
        /// empty, commands succeed with empty output.
        pub fn push_output(&self, stdout: &str, stderr: &str, exit_code: i32) {
            self.outputs.lock().push_back(CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            });
        }

        pub fn command_log(&self) -> Vec<String> {
            self.commands.lock().clone()
        }
    }

    #[async_trait]
    impl Machine for FakeMachine {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(
            &self,
            executable: &str,
            args: &[String],
        ) -> Result<CommandOutput, DeployError> {
            let mut rendered = executable.to_string();
            for arg in args {
                rendered.push(' ');
                rendered.push_str(arg);
            }
            self.commands.lock().push(rendered);

            Ok(self.outputs.lock().pop_front().unwrap_or(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            }))
        }

        async fn put_file(&self, _content: &[u8], remote_path: &str) -> Result<(), DeployError> {
            self.uploads.lock().push(remote_path.to_string());
            Ok(())
        }

        fn close(&self) {
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}
