use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

/// 桥接子进程句柄与标准输入。
pub struct BridgeProcess {
    child: Child,
    stdin: ChildStdin,
}

/// 桥接子进程的标准输出，按行读取。
pub struct BridgeOutput {
    stdout: BufReader<ChildStdout>,
}

impl BridgeProcess {
    /// 启动桥接子进程。
    ///
    /// 标准输出交给调用方独立读取，写入与读取互不阻塞。
    pub async fn spawn(
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
        env_vars: &[(String, String)],
    ) -> Result<(Self, BridgeOutput)> {
        info!(command, args = ?args, "spawning session bridge process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|err| {
            SyncError::TransportUnavailable(format!("failed to spawn `{command}`: {err}"))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            SyncError::TransportUnavailable("failed to capture bridge stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SyncError::TransportUnavailable("failed to capture bridge stdout".to_string())
        })?;

        info!(pid = ?child.id(), "session bridge process spawned");

        Ok((
            Self { child, stdin },
            BridgeOutput {
                stdout: BufReader::new(stdout),
            },
        ))
    }

    /// 写入一行 JSON-RPC 消息。
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        debug!(line, "sending line to session bridge");
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// 终止子进程。
    pub async fn kill(&mut self) -> Result<()> {
        info!("killing session bridge process");
        if let Err(err) = self.child.kill().await {
            warn!(error = %err, "failed to kill session bridge process");
            return Err(err.into());
        }
        Ok(())
    }

    /// 非阻塞检查子进程是否已退出。
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }
}

impl BridgeOutput {
    /// 读取一行输出，EOF 时返回 `Ok(None)`。
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let bytes = self.stdout.read_line(&mut line).await?;

        if bytes == 0 {
            warn!("session bridge stdout reached EOF");
            return Ok(None);
        }

        let trimmed = line.trim_end().to_string();
        debug!(line = %trimmed, "received line from session bridge");
        Ok(Some(trimmed))
    }
}

pub(crate) fn format_exit_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }

    format!("status {status}")
}
