//! Chromium launch helpers.

use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

use webhelm_core_types::{EngineError, EngineResult};

const STARTUP_DEADLINE: Duration = Duration::from_secs(20);
const STDERR_PREVIEW_LINES: usize = 8;

/// Read a freshly launched Chromium's stderr until it announces its
/// DevTools endpoint. Failing that, the error carries a preview of what
/// the process printed instead.
pub async fn extract_ws_url(child: &mut Child) -> EngineResult<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| EngineError::provider("chromium process has no stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::new();

    let scan = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| EngineError::provider(err.to_string()))?;
            if let Some(url) = devtools_endpoint(&line) {
                return Ok(url.to_string());
            }
            if preview.len() < STDERR_PREVIEW_LINES {
                preview.push(line);
            }
        }
        Err(EngineError::provider(format!(
            "chromium exited before announcing its devtools endpoint: {}",
            preview.join(" | ")
        )))
    };

    match timeout(STARTUP_DEADLINE, scan).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::provider(
            "chromium did not announce a devtools endpoint in time",
        )),
    }
}

/// The endpoint line reads `DevTools listening on ws://host/devtools/browser/<id>`.
fn devtools_endpoint(line: &str) -> Option<&str> {
    let (_, rest) = line.rsplit_once("listening on ")?;
    let candidate = rest.trim();
    (candidate.starts_with("ws") && candidate.contains("devtools/browser")).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_lines_are_recognised() {
        assert_eq!(
            devtools_endpoint("DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc-123"),
            Some("ws://127.0.0.1:9222/devtools/browser/abc-123")
        );
        assert_eq!(devtools_endpoint("[warn] something else entirely"), None);
        assert_eq!(devtools_endpoint("listening on http://not-a-socket"), None);
    }
}
