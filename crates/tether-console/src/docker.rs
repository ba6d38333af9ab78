use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::process::Stdio;
use tether_logs::{LogBackfill, LogSourceError, LogTail};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

const DEFAULT_DOCKER_BIN: &str = "docker";

/// Container logs read through the docker CLI. Both backfill and tail ask
/// for `--timestamps` so overlapping lines share an id.
#[derive(Debug, Clone)]
pub struct DockerLogs {
    binary: String,
}

impl Default for DockerLogs {
    fn default() -> Self {
        Self::new(DEFAULT_DOCKER_BIN)
    }
}

impl DockerLogs {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn logs_command(&self, container_id: &str, tail: usize, follow: bool) -> Command {
        let mut command = Command::new(&self.binary);
        command.arg("logs").arg("--timestamps").arg("--tail").arg(tail.to_string());
        if follow {
            command.arg("--follow");
        }
        command
            .arg(container_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl LogBackfill for DockerLogs {
    fn fetch(
        &self,
        container_id: &str,
        tail: usize,
    ) -> BoxFuture<'static, Result<Vec<String>, LogSourceError>> {
        let mut command = self.logs_command(container_id, tail, false);
        let container_id = container_id.to_string();
        Box::pin(async move {
            let output = command
                .output()
                .await
                .map_err(|err| LogSourceError::Backfill(err.to_string()))?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !output.status.success() {
                if stderr.contains("No such container") {
                    return Err(LogSourceError::NotFound(container_id));
                }
                return Err(LogSourceError::Backfill(stderr.trim().to_string()));
            }
            Ok(merge_streams(&stdout, &stderr))
        })
    }
}

impl LogTail for DockerLogs {
    fn subscribe(&self, container_id: &str) -> BoxStream<'static, Result<String, LogSourceError>> {
        let mut child = match self.logs_command(container_id, 0, true).spawn() {
            Ok(child) => child,
            Err(err) => {
                let err = LogSourceError::Tail(err.to_string());
                return stream::once(async move { Err(err) }).boxed();
            }
        };
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return stream::once(async {
                Err(LogSourceError::Tail("log pipes unavailable".to_string()))
            })
            .boxed();
        };

        // Whole lines only, so the two pipes never interleave mid-line.
        let lines = stream::select(line_stream(stdout), line_stream(stderr));
        let exit = stream::once(async move { child.wait().await }).filter_map(|status| async move {
            match status {
                Ok(status) if status.success() => None,
                Ok(status) => Some(Err(LogSourceError::Tail(format!(
                    "docker logs exited with {status}"
                )))),
                Err(err) => Some(Err(LogSourceError::Tail(err.to_string()))),
            }
        });
        lines.chain(exit).boxed()
    }
}

fn line_stream<R>(reader: R) -> BoxStream<'static, Result<String, LogSourceError>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(BufReader::new(reader).lines()), |state| async move {
        let mut lines = state?;
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok(format!("{line}\n")), Some(lines))),
            Ok(None) => None,
            Err(err) => Some((Err(LogSourceError::Tail(err.to_string())), None)),
        }
    })
    .boxed()
}

/// docker splits container stdout and stderr; timestamps put them back in
/// order. The sort is stable, so equal stamps keep stdout first.
fn merge_streams(stdout: &str, stderr: &str) -> Vec<String> {
    let mut lines = stdout
        .lines()
        .chain(stderr.lines())
        .filter(|line| !line.trim().is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    lines.sort_by(|a, b| stamp(a).cmp(stamp(b)));
    lines
}

fn stamp(line: &str) -> &str {
    line.split_once(' ').map(|(stamp, _)| stamp).unwrap_or("")
}
