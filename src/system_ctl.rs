use log::info;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemCommands {
    pub shutdown: String,
    pub reboot: String,
}

/// Runs `command` through the shell and waits for it.
pub async fn run(command: &str) -> Result<(), CommandError> {
    info!("Running '{}'", command);
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .await
        .map_err(|source| CommandError::Spawn {
            command: command.to_string(),
            source,
        })?;
    match status.success() {
        true => Ok(()),
        false => Err(CommandError::Failed {
            command: command.to_string(),
            status,
        }),
    }
}
