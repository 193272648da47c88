use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Either of the supervisor's two output sinks
#[derive(Clone, derive_more::From)]
pub enum AppStdio {
    Out(AppStdOut),
    Err(AppStdErr),
}

impl AppStdio {
    fn shared(&self) -> &Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>> {
        match self {
            AppStdio::Out(out) => &out.0,
            AppStdio::Err(err) => &err.0,
        }
    }

    /// Write one forwarded line to the sink, prefixed with the
    /// originating app's name so interleaved output stays attributable
    pub async fn write_line(&self, app_name: &str, text: &str) -> tokio::io::Result<()> {
        let mut writer = self.shared().lock().await;
        writer
            .write_all(format!("[{app_name}] {text}\n").as_bytes())
            .await?;
        writer.flush().await
    }
}

/// Shared sink that child stdout lines are forwarded to
pub struct AppStdOut(Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>>);

impl Clone for AppStdOut {
    fn clone(&self) -> Self {
        AppStdOut(self.0.clone())
    }
}

impl AppStdOut {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> AppStdOut {
        AppStdOut(Arc::new(Mutex::new(t)))
    }

    /// Sink writing to the supervisor's own stdout
    pub fn stdout() -> AppStdOut {
        AppStdOut::new(Box::new(tokio::io::stdout()))
    }
}

/// Shared sink that child stderr lines are forwarded to
pub struct AppStdErr(Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>>);

impl Clone for AppStdErr {
    fn clone(&self) -> Self {
        AppStdErr(self.0.clone())
    }
}

impl AppStdErr {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> AppStdErr {
        AppStdErr(Arc::new(Mutex::new(t)))
    }

    /// Sink writing to the supervisor's own stderr
    pub fn stderr() -> AppStdErr {
        AppStdErr::new(Box::new(tokio::io::stderr()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_line_prefixes_with_app_name() {
        let (sink_end, mut read_end) = tokio::io::duplex(256);
        let sink: AppStdio = AppStdOut::new(Box::new(sink_end)).into();

        sink.write_line("chat-backend", "listening on 8014")
            .await
            .unwrap();

        let expected = "[chat-backend] listening on 8014\n";
        let mut buf = vec![0u8; expected.len()];
        read_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_clones_share_one_sink() {
        let (sink_end, mut read_end) = tokio::io::duplex(256);
        let out = AppStdOut::new(Box::new(sink_end));
        let observer: AppStdio = out.clone().into();
        let original: AppStdio = out.into();

        original.write_line("a", "first").await.unwrap();
        observer.write_line("a", "second").await.unwrap();

        let expected = "[a] first\n[a] second\n";
        let mut buf = vec![0u8; expected.len()];
        read_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }
}
