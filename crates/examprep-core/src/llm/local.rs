use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{GenerationError, GenerationFuture, TextGenerator, non_empty, truncate_chars};

pub const DEFAULT_COMMAND: &str = "ollama";
pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A model served by a local runner, invoked as `<command> run <model>`
/// with the prompt on stdin.
pub struct LocalModel {
    command: String,
    model: String,
    timeout: Duration,
}

impl LocalModel {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut child = Command::new(&self.command)
            .arg("run")
            .arg(&self.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GenerationError::Process(format!("cannot start {}: {e}", self.command)))?;

        // Writing the prompt is timed too; a runner may never drain stdin.
        let stdin = child.stdin.take();
        let exchange = async move {
            if let Some(mut stdin) = stdin {
                stdin
                    .write_all(prompt.as_bytes())
                    .await
                    .map_err(|e| GenerationError::Process(format!("writing prompt: {e}")))?;
                // Dropping stdin closes it so the runner sees EOF.
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| GenerationError::Process(e.to_string()))
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| GenerationError::Timeout {
                backend: self.name().to_string(),
                timeout: self.timeout,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::Process(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                truncate_chars(stderr.trim(), 300)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TextGenerator for LocalModel {
    fn name(&self) -> &str {
        "Local model"
    }

    fn model(&self) -> &str {
        &self.model
    }

    // The runner has no output-length flag; the budget is ignored.
    fn generate<'a>(&'a self, prompt: &'a str, _max_tokens: u32) -> GenerationFuture<'a, String> {
        Box::pin(async move {
            tracing::debug!(command = %self.command, model = %self.model, "running local model");
            let text = self.run(prompt).await?;
            non_empty(self.name(), text)
        })
    }

    /// Loads the model into memory with an empty prompt.
    fn warm_up(&self) -> GenerationFuture<'_, ()> {
        Box::pin(async move {
            self.run("").await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_runner_is_a_process_error() {
        let model = LocalModel::new("examprep-no-such-runner");
        match model.generate("hello", 10).await {
            Err(GenerationError::Process(msg)) => assert!(msg.contains("cannot start")),
            other => panic!("expected Process error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_runner_reports_status() {
        // `false run <model>` exits 1 without output.
        let model = LocalModel::new("false");
        assert!(matches!(
            model.generate("hello", 10).await,
            Err(GenerationError::Process(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_covers_a_runner_that_never_reads_the_prompt() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let runner = dir.path().join("stuck-runner");
        std::fs::write(&runner, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&runner, std::fs::Permissions::from_mode(0o755)).unwrap();

        let model = LocalModel::new(runner.to_str().unwrap()).with_timeout(Duration::from_secs(1));
        // Larger than any pipe buffer, so the write alone would block.
        let prompt = "x".repeat(512 * 1024);
        let outcome = tokio::time::timeout(Duration::from_secs(10), model.generate(&prompt, 10))
            .await
            .expect("generate should give up on its own timeout");
        match outcome {
            Err(GenerationError::Timeout { timeout, .. }) => {
                assert_eq!(timeout, Duration::from_secs(1))
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn defaults() {
        let model = LocalModel::new(DEFAULT_COMMAND);
        assert_eq!(model.model(), "llama3");
        assert_eq!(model.timeout, Duration::from_secs(60));
    }
}
