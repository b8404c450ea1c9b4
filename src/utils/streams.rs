// src/utils/streams.rs: chained child processes with typed stdin/stdout connections

use std::path::PathBuf;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use futures::future::join_all;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::config::defs::PipelineError;

const SIGPIPE: i32 = 13;

/// One process in a pipeline.
#[derive(Debug, Clone)]
pub struct ProcessStage {
    /// Tool tag used in logs and errors.
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessStage {
    pub fn new(tool: &str, program: PathBuf, args: Vec<String>) -> Self {
        ProcessStage { tool: tool.to_string(), program, args }
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Where the stdout of the last stage goes.
#[derive(Debug, Clone, PartialEq)]
pub enum StdoutTarget {
    Null,
    File(PathBuf),
    Capture,
}

/// Result of a finished pipeline.
#[derive(Debug, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
}

impl ToolOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// An ordered list of processes where each stdout feeds the next stdin.
#[derive(Debug, Clone)]
pub struct ProcessPipeline {
    stages: Vec<ProcessStage>,
    stdout: StdoutTarget,
}

impl ProcessPipeline {
    pub fn new(first: ProcessStage) -> Self {
        ProcessPipeline { stages: vec![first], stdout: StdoutTarget::Null }
    }

    pub fn pipe(mut self, next: ProcessStage) -> Self {
        self.stages.push(next);
        self
    }

    pub fn stdout_to_file(mut self, path: PathBuf) -> Self {
        self.stdout = StdoutTarget::File(path);
        self
    }

    pub fn capture_stdout(mut self) -> Self {
        self.stdout = StdoutTarget::Capture;
        self
    }

    /// Spawns every stage, connects them, and waits for all of them to exit.
    ///
    /// # Returns
    /// ToolOutput with captured stdout (empty unless `capture_stdout` was set),
    /// or ToolExecution for the first stage, in pipeline order, that failed.
    pub async fn run(self) -> Result<ToolOutput, PipelineError> {
        let stage_count = self.stages.len();
        let mut children: Vec<Child> = Vec::with_capacity(stage_count);
        let mut stderr_tasks: Vec<JoinHandle<std::io::Result<Vec<u8>>>> = Vec::with_capacity(stage_count);
        let mut pump_tasks: Vec<JoinHandle<std::io::Result<u64>>> = Vec::new();
        let mut upstream: Option<ChildStdout> = None;

        for (i, stage) in self.stages.iter().enumerate() {
            let last = i + 1 == stage_count;
            debug!("Running {}", stage.command_line());

            let stdout = if last && self.stdout == StdoutTarget::Null {
                Stdio::null()
            } else {
                Stdio::piped()
            };
            let stdin = if upstream.is_some() { Stdio::piped() } else { Stdio::null() };

            let mut child = Command::new(&stage.program)
                .args(&stage.args)
                .stdin(stdin)
                .stdout(stdout)
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| PipelineError::ToolExecution {
                    tool: stage.tool.clone(),
                    error: format!("failed to spawn {}: {}", stage.program.display(), e),
                })?;

            if let Some(mut source) = upstream.take() {
                let mut sink = child.stdin.take().ok_or_else(|| PipelineError::ToolExecution {
                    tool: stage.tool.clone(),
                    error: "stdin not captured".to_string(),
                })?;
                pump_tasks.push(tokio::spawn(async move {
                    let copied = tokio::io::copy(&mut source, &mut sink).await?;
                    sink.shutdown().await?;
                    Ok::<u64, std::io::Error>(copied)
                }));
            }

            let stderr = child.stderr.take().ok_or_else(|| PipelineError::ToolExecution {
                tool: stage.tool.clone(),
                error: "stderr not captured".to_string(),
            })?;
            stderr_tasks.push(tokio::spawn(read_all(stderr)));

            if !last {
                upstream = child.stdout.take();
            }
            children.push(child);
        }

        let captured = match &self.stdout {
            StdoutTarget::Null => Vec::new(),
            StdoutTarget::File(path) => {
                let mut source = take_last_stdout(&mut children, &self.stages)?;
                let mut file = tokio::fs::File::create(path).await?;
                tokio::io::copy(&mut source, &mut file).await?;
                file.flush().await?;
                Vec::new()
            }
            StdoutTarget::Capture => {
                let source = take_last_stdout(&mut children, &self.stages)?;
                read_all(source).await.map_err(|e| PipelineError::ToolExecution {
                    tool: self.stages.last().map(|s| s.tool.clone()).unwrap_or_default(),
                    error: format!("failed to read captured stdout: {}", e),
                })?
            }
        };

        let mut statuses: Vec<std::io::Result<ExitStatus>> = Vec::with_capacity(stage_count);
        for child in children.iter_mut() {
            statuses.push(child.wait().await);
        }
        let stderrs: Vec<Vec<u8>> = join_all(stderr_tasks)
            .await
            .into_iter()
            .map(|r| match r {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => format!("<stderr unreadable: {}>", e).into_bytes(),
                Err(e) => format!("<stderr task failed: {}>", e).into_bytes(),
            })
            .collect();
        for pump in join_all(pump_tasks).await {
            match pump {
                Ok(Ok(bytes)) => debug!("Piped {} bytes between stages", bytes),
                // a downstream exit closes the pipe; exit statuses decide the outcome
                Ok(Err(e)) => debug!("Pipe closed early: {}", e),
                Err(e) => warn!("Pipe task failed: {}", e),
            }
        }

        // (tool, message, killed by SIGPIPE)
        let mut failures: Vec<(String, String, bool)> = Vec::new();
        for ((stage, status), stderr) in self.stages.iter().zip(statuses).zip(stderrs) {
            let stderr_text = String::from_utf8_lossy(&stderr).trim().to_string();
            match status {
                Ok(status) if status.success() => {
                    if !stderr_text.is_empty() {
                        debug!("{} stderr: {}", stage.tool, stderr_text);
                    }
                }
                Ok(status) => failures.push((
                    stage.tool.clone(),
                    format!("exited with {}: {}", status, stderr_text),
                    status.signal() == Some(SIGPIPE),
                )),
                Err(e) => failures.push((
                    stage.tool.clone(),
                    format!("failed while waiting for exit: {}", e),
                    false,
                )),
            }
        }

        // an upstream stage dying of SIGPIPE is a symptom; report the stage that broke the pipe
        let root = failures
            .iter()
            .position(|(_, _, sigpipe)| !sigpipe)
            .or(if failures.is_empty() { None } else { Some(0) });
        match root {
            Some(idx) => {
                for (i, (tool, error, _)) in failures.iter().enumerate() {
                    if i != idx {
                        warn!("{} also failed: {}", tool, error);
                    }
                }
                let (tool, error, _) = failures.swap_remove(idx);
                Err(PipelineError::ToolExecution { tool, error })
            }
            None => Ok(ToolOutput { stdout: captured }),
        }
    }
}

fn take_last_stdout(children: &mut [Child], stages: &[ProcessStage]) -> Result<ChildStdout, PipelineError> {
    let tool = stages.last().map(|s| s.tool.clone()).unwrap_or_default();
    children
        .last_mut()
        .and_then(|child| child.stdout.take())
        .ok_or_else(|| PipelineError::ToolExecution { tool, error: "stdout not captured".to_string() })
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(buffer)
}


/// Runs a single command and returns its stdout and stderr as lines.
/// Used for version probes, where some tools print to stderr.
///
/// # Arguments
///
/// * `stage` - Command to run.
///
/// # Returns
/// All non-empty lines of stdout followed by those of stderr.
pub async fn read_child_output_lines(stage: &ProcessStage) -> Result<Vec<String>, PipelineError> {
    let output = Command::new(&stage.program)
        .args(&stage.args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: stage.tool.clone(),
            error: format!("failed to spawn {}: {}", stage.program.display(), e),
        })?;
    if !output.status.success() {
        return Err(PipelineError::ToolExecution {
            tool: stage.tool.clone(),
            error: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let mut lines = Vec::new();
    for stream in [&output.stdout, &output.stderr] {
        let mut line_stream = LinesStream::new(BufReader::new(stream.as_slice()).lines());
        while let Some(line) = line_stream.next().await {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
    }
    Ok(lines)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_single_stage_capture() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let echo = script(dir.path(), "emit", "printf 'reads mapped:\\t42\\n'");
        let output = ProcessPipeline::new(ProcessStage::new("emit", echo, vec![]))
            .capture_stdout()
            .run()
            .await?;
        assert_eq!(output.stdout_string(), "reads mapped:\t42\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_two_stage_pipe_to_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let producer = script(dir.path(), "producer", "printf 'a\\nb\\nc\\n'");
        let upper = script(dir.path(), "upper", "tr 'a-z' 'A-Z'");
        let out = dir.path().join("out.txt");

        ProcessPipeline::new(ProcessStage::new("producer", producer, vec![]))
            .pipe(ProcessStage::new("upper", upper, vec![]))
            .stdout_to_file(out.clone())
            .run()
            .await?;
        assert_eq!(std::fs::read_to_string(out)?, "A\nB\nC\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_arguments_are_passed_verbatim() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let args = script(dir.path(), "args", "for a in \"$@\"; do echo \"[$a]\"; done");
        let output = ProcessPipeline::new(ProcessStage::new(
            "args",
            args,
            vec!["-f".to_string(), "INFO/AF>=1".to_string(), "two words".to_string()],
        ))
        .capture_stdout()
        .run()
        .await?;
        assert_eq!(output.stdout_string(), "[-f]\n[INFO/AF>=1]\n[two words]\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let failing = script(dir.path(), "failing", "echo 'index file missing' >&2; exit 3");
        let err = ProcessPipeline::new(ProcessStage::new("samtools", failing, vec![]))
            .run()
            .await
            .unwrap_err();
        match err {
            PipelineError::ToolExecution { tool, error } => {
                assert_eq!(tool, "samtools");
                assert!(error.contains("index file missing"), "{}", error);
            }
            other => panic!("unexpected error {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_in_downstream_stage_is_reported() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let producer = script(dir.path(), "producer", "echo data");
        let consumer = script(dir.path(), "consumer", "cat > /dev/null; echo 'bad input' >&2; exit 1");
        let err = ProcessPipeline::new(ProcessStage::new("bowtie2", producer, vec![]))
            .pipe(ProcessStage::new("samtools", consumer, vec![]))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolExecution { ref tool, .. } if tool == "samtools"));
        Ok(())
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "truncated")))
        }
    }

    #[tokio::test]
    async fn test_read_all_reports_errors() -> anyhow::Result<()> {
        assert_eq!(read_all(&b"SN\treads mapped:\t1\n"[..]).await?, b"SN\treads mapped:\t1\n".to_vec());
        let err = read_all(BrokenReader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
        Ok(())
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = ProcessPipeline::new(ProcessStage::new(
            "ghost",
            PathBuf::from("/nonexistent/ghost-tool"),
            vec![],
        ))
        .run()
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_read_child_output_lines_merges_streams() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let version = script(dir.path(), "version", "echo 'tool v1.0'; echo 'built today' >&2");
        let lines = read_child_output_lines(&ProcessStage::new("version", version, vec![])).await?;
        assert_eq!(lines, vec!["tool v1.0".to_string(), "built today".to_string()]);
        Ok(())
    }
}
