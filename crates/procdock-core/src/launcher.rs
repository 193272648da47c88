use crate::config::AppDescriptor;
use crate::process::{ProcessHandle, ProcessId};
use crate::stdio::{AppStdErr, AppStdOut, AppStdio};
use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

/// High-level launcher for one app descriptor.
///
/// An implementation is constructed from a single [`AppDescriptor`] and
/// knows how to turn it into a running OS process: it resolves the
/// interpreter/script/args into a command line, applies the working
/// directory and environment overlay, and tracks the spawned pid so
/// `cleanup()` can tear down the whole process tree. Platform crates
/// provide the implementations; the supervisor only sees this trait.
#[async_trait]
pub trait AppProcessManager: Send + Sync {
    /// The type of process handle this launcher produces
    type Handle: ProcessHandle;

    /// Create a launcher bound to one descriptor
    fn new(descriptor: &AppDescriptor) -> Self
    where
        Self: Sized;

    /// Spawn the app's process, forwarding its output to the given sinks
    async fn launch(&self, out: AppStdOut, err: AppStdErr) -> Result<Self::Handle>;

    /// Stop tracking a pid that has already exited on its own
    fn forget(&self, pid: ProcessId);

    /// Terminate every process this launcher still tracks
    async fn cleanup(&self) -> Result<()>;
}

/// Factory trait for creating platform-specific launchers
pub trait AppProcessManagerFactory {
    /// The type of launcher this factory creates
    type Manager: AppProcessManager;

    /// Create a launcher for the given descriptor on the current platform
    fn create(descriptor: &AppDescriptor) -> Self::Manager;

    /// Platform name for logging and debugging
    fn platform_name() -> &'static str;
}

/// Copy a child's piped output to a sink, one line at a time, each line
/// prefixed with the app name. Returns when the child closes the pipe.
pub async fn forward_output<R: AsyncRead + Unpin>(
    label: &str,
    io: R,
    sink: impl Into<AppStdio>,
) -> tokio::io::Result<()> {
    let sink = sink.into();
    let mut lines = FramedRead::new(io, LinesCodec::new());

    while let Some(line) = lines.next().await {
        match line {
            Ok(text) => sink.write_line(label, &text).await?,
            Err(e) => {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_forward_output_prefixes_lines() {
        let (sink_end, mut read_end) = tokio::io::duplex(4096);
        let sink = AppStdOut::new(Box::new(sink_end));

        let input: &[u8] = b"started\nlistening on 8014\n";
        forward_output("chat-backend", input, sink).await.unwrap();

        let expected = "[chat-backend] started\n[chat-backend] listening on 8014\n";
        let mut buf = vec![0u8; expected.len()];
        read_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_forward_output_empty_input() {
        let (sink_end, _read_end) = tokio::io::duplex(64);
        let sink = AppStdErr::new(Box::new(sink_end));

        let input: &[u8] = b"";
        assert!(forward_output("agent-manager", input, sink).await.is_ok());
    }
}
