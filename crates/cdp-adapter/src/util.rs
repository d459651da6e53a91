use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

use crate::error::{AdapterError, AdapterErrorKind};

/// Pull the DevTools websocket URL out of one line of Chromium stderr.
pub fn parse_ws_line(line: &str) -> Option<String> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then(|| ws.to_string())
}

/// Read Chromium stderr until it announces the DevTools websocket URL.
pub async fn extract_ws_url(child: &mut Child, wait: Duration) -> Result<String, AdapterError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        AdapterError::new(AdapterErrorKind::BrowserUnavailable)
            .with_hint("chromium process missing stderr handle")
    })?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string())
            })?;
            if let Some(ws) = parse_ws_line(&line) {
                return Ok(ws);
            }
            if preview.len() < 8 {
                preview.push(line);
            }
        }
        Err(AdapterError::new(AdapterErrorKind::BrowserUnavailable).with_hint(format!(
            "chromium exited before exposing devtools websocket url. stderr preview: {}",
            preview.join(" | ")
        )))
    };

    timeout(wait, reader).await.map_err(|_| {
        AdapterError::new(AdapterErrorKind::BrowserUnavailable)
            .with_hint("timed out waiting for chromium devtools websocket url")
    })?
}

#[cfg(test)]
mod tests {
    use super::parse_ws_line;

    #[test]
    fn finds_websocket_in_banner() {
        let line = "DevTools listening on ws://127.0.0.1:40123/devtools/browser/5b1c-aa";
        assert_eq!(
            parse_ws_line(line).as_deref(),
            Some("ws://127.0.0.1:40123/devtools/browser/5b1c-aa")
        );
        assert_eq!(parse_ws_line("[1234:5678:ERROR] gpu init failed"), None);
        assert_eq!(parse_ws_line("listening on http://localhost"), None);
    }
}
