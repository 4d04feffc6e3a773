//! Subprocess-backed [`ToolCli`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::platform::paths;

use super::{CliError, OutputFilter, ToolCli};

/// Upper bound on the stderr text carried by [`CliError::Failed`].
const STDERR_PREVIEW_CHARS: usize = 2_000;

/// A displayed line of tool output, forwarded to an optional sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
  Stdout(String),
  Stderr(String),
}

/// Runs an executable in a fixed working directory.
///
/// Stdout and stderr are pumped line by line. Lines passing the current
/// [`OutputFilter`] are logged under the `terraform` target and sent to the
/// line sink, if one was configured. A pipe registered with
/// [`ToolCli::pipe_output`] receives the raw, unfiltered stdout bytes.
///
/// The child is killed if the returned future is dropped, so callers can
/// bound an invocation with `tokio::time::timeout`.
pub struct ProcessCli {
  exec_path: PathBuf,
  working_dir: PathBuf,
  filter: Mutex<Option<OutputFilter>>,
  pipe: Mutex<Option<DuplexStream>>,
  sink: Option<mpsc::UnboundedSender<OutputLine>>,
}

impl ProcessCli {
  pub fn new(exec_path: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
    Self {
      exec_path: exec_path.into(),
      working_dir: working_dir.into(),
      filter: Mutex::new(None),
      pipe: Mutex::new(None),
      sink: None,
    }
  }

  /// Run in the default working directory of the deployment selected by `path_key`.
  pub fn for_workspace(exec_path: impl Into<PathBuf>, path_key: &str) -> Self {
    Self::new(exec_path, paths::workspace_dir(path_key))
  }

  /// Forward displayed output lines to `sink`.
  pub fn with_sink(mut self, sink: mpsc::UnboundedSender<OutputLine>) -> Self {
    self.sink = Some(sink);
    self
  }

  pub fn exec_path(&self) -> &Path {
    &self.exec_path
  }
}

#[async_trait]
impl ToolCli for ProcessCli {
  fn working_directory(&self) -> &Path {
    &self.working_dir
  }

  async fn run_with_env(&self, args: &[String], env: &BTreeMap<String, String>) -> Result<(), CliError> {
    // One-shot settings are claimed first so a failed spawn does not leak
    // them into the following invocation.
    let filter = self.filter.lock().take().unwrap_or_default();
    let pipe = self.pipe.lock().take();

    tokio::fs::create_dir_all(&self.working_dir).await?;

    let program = self.exec_path.display().to_string();
    let command_line = format!("{} {}", program, args.join(" "));

    let mut command = Command::new(&self.exec_path);
    command
      .args(args)
      .envs(env)
      .current_dir(&self.working_dir)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    debug!(program = %program, working_dir = ?self.working_dir, "spawning tool");

    let mut child = command.spawn().map_err(|source| CliError::Spawn {
      program: program.clone(),
      source,
    })?;

    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| std::io::Error::other("child stdout was not captured"))?;
    let stderr = child
      .stderr
      .take()
      .ok_or_else(|| std::io::Error::other("child stderr was not captured"))?;

    let (stdout_result, stderr_result, status) = tokio::join!(
      pump_stdout(stdout, filter, pipe, self.sink.clone()),
      collect_stderr(stderr, self.sink.clone()),
      child.wait()
    );
    stdout_result?;
    let stderr_text = stderr_result?;
    let status = status?;

    if !status.success() {
      return Err(CliError::Failed {
        command: command_line,
        code: status.code(),
        stderr: preview_text(&stderr_text, STDERR_PREVIEW_CHARS),
      });
    }

    debug!(program = %program, "tool exited successfully");
    Ok(())
  }

  fn pipe_output(&self, writer: DuplexStream) {
    *self.pipe.lock() = Some(writer);
  }

  fn apply_filter(&self, filter: OutputFilter) {
    *self.filter.lock() = Some(filter);
  }
}

async fn pump_stdout<R>(
  stdout: R,
  mut filter: OutputFilter,
  mut pipe: Option<DuplexStream>,
  sink: Option<mpsc::UnboundedSender<OutputLine>>,
) -> std::io::Result<()>
where
  R: AsyncRead + Unpin,
{
  let mut reader = BufReader::new(stdout);
  let mut buf = Vec::new();

  loop {
    buf.clear();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
      break;
    }

    if let Some(writer) = pipe.as_mut() {
      if let Err(e) = writer.write_all(&buf).await {
        // The reader went away; keep consuming stdout so the child never blocks.
        debug!(error = %e, "output pipe closed, discarding remaining output");
        pipe = None;
      }
    }

    let text = String::from_utf8_lossy(&buf);
    let line = text.trim_end_matches(['\r', '\n']);
    if filter.accept(line) {
      info!(target: "terraform", "{}", line);
      if let Some(sink) = &sink {
        let _ = sink.send(OutputLine::Stdout(line.to_string()));
      }
    }
  }

  if let Some(mut writer) = pipe {
    let _ = writer.shutdown().await;
  }
  Ok(())
}

async fn collect_stderr<R>(stderr: R, sink: Option<mpsc::UnboundedSender<OutputLine>>) -> std::io::Result<String>
where
  R: AsyncRead + Unpin,
{
  let mut reader = BufReader::new(stderr);
  let mut buf = Vec::new();
  let mut collected = String::new();

  loop {
    buf.clear();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
      break;
    }
    let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();

    warn!(target: "terraform", "{}", line);
    if collected.len() < STDERR_PREVIEW_CHARS {
      if !collected.is_empty() {
        collected.push('\n');
      }
      collected.push_str(&line);
    }
    if let Some(sink) = &sink {
      let _ = sink.send(OutputLine::Stderr(line));
    }
  }
  Ok(collected)
}

fn preview_text(text: &str, limit: usize) -> String {
  let trimmed = text.trim();
  if trimmed.chars().count() <= limit {
    return trimmed.to_string();
  }
  let mut preview: String = trimmed.chars().take(limit).collect();
  preview.push_str("...");
  preview
}
