use crate::container::{ContainerError, LogSource, LogStream};
use futures_util::StreamExt;
use regex::Regex;

/// Re-frames raw log chunks into lines, keeping the line terminator.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every line completed by `chunk`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flushes a trailing line that never got its terminator.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Counts log lines that match a pattern in full.
#[derive(Debug)]
pub struct LogMessageMatcher {
    regex: Regex,
    times: usize,
    seen: usize,
}

impl LogMessageMatcher {
    pub fn new(pattern: &str, times: usize) -> Result<Self, ContainerError> {
        let anchored = format!(r"\A(?:{})\z", pattern);
        let regex = Regex::new(&anchored)
            .map_err(|e| ContainerError::InvalidWaitStrategy(e.to_string()))?;

        Ok(LogMessageMatcher {
            regex,
            times,
            seen: 0,
        })
    }

    pub fn is_satisfied(&self) -> bool {
        self.seen >= self.times
    }

    /// Feeds one line; returns whether the required count has been reached.
    pub fn observe(&mut self, line: &str) -> bool {
        if self.regex.is_match(line) {
            self.seen += 1;
        }
        self.is_satisfied()
    }
}

/// Follows `stream` until `matcher` is satisfied.
///
/// Lines are framed separately for stdout and stderr, so a partial line on one
/// output is never joined with text from the other. Every line seen is
/// recorded through the logging crate at debug level. The caller owns the
/// timeout.
pub async fn wait_for_log_message(
    container_id: &str,
    mut stream: LogStream<'_>,
    mut matcher: LogMessageMatcher,
) -> Result<(), ContainerError> {
    if matcher.is_satisfied() {
        return Ok(());
    }

    let mut stdout = LineSplitter::new();
    let mut stderr = LineSplitter::new();
    while let Some(frame) = stream.next().await {
        let (source, chunk) = frame?;
        let splitter = match source {
            LogSource::StdOut => &mut stdout,
            LogSource::StdErr => &mut stderr,
        };
        for line in splitter.push(&chunk) {
            logging::container_output(container_id, &line);
            if matcher.observe(&line) {
                return Ok(());
            }
        }
    }

    for line in [stdout.finish(), stderr.finish()].into_iter().flatten() {
        logging::container_output(container_id, &line);
        if matcher.observe(&line) {
            return Ok(());
        }
    }

    Err(ContainerError::ContainerExited(format!(
        "log stream ended after {} of {} expected matches",
        matcher.seen, matcher.times
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    const STARTED: &str = r"(?s).*Started\r\n$";

    fn frames(parts: &[(LogSource, &str)]) -> LogStream<'static> {
        let items: Vec<Result<(LogSource, Vec<u8>), ContainerError>> = parts
            .iter()
            .map(|(source, p)| Ok((*source, p.as_bytes().to_vec())))
            .collect();
        stream::iter(items).boxed()
    }

    fn chunks(parts: &[&str]) -> LogStream<'static> {
        let parts: Vec<(LogSource, &str)> = parts.iter().map(|p| (LogSource::StdOut, *p)).collect();
        frames(&parts)
    }

    #[test]
    fn test_splitter_keeps_terminators_across_chunks() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"Start").is_empty());
        assert_eq!(splitter.push(b"ed\r\nnext"), vec!["Started\r\n".to_string()]);
        assert_eq!(splitter.finish(), Some("next".to_string()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_matcher_requires_whole_line() {
        let mut matcher = LogMessageMatcher::new(STARTED, 1).unwrap();
        assert!(!matcher.observe("Started\n"));
        assert!(!matcher.observe("Started\r\ntrailing"));
        assert!(matcher.observe("Emulator Started\r\n"));
    }

    #[test]
    fn test_matcher_counts_occurrences() {
        let mut matcher = LogMessageMatcher::new("ready\n", 2).unwrap();
        assert!(!matcher.observe("ready\n"));
        assert!(!matcher.observe("not yet\n"));
        assert!(matcher.observe("ready\n"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = LogMessageMatcher::new("(unclosed", 1).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidWaitStrategy(_)));
    }

    #[tokio::test]
    async fn test_wait_succeeds_on_split_chunks() {
        let stream = chunks(&["Starting partitions\r\n", "Sta", "rted\r", "\n"]);
        let matcher = LogMessageMatcher::new(STARTED, 1).unwrap();
        assert!(wait_for_log_message("abc", stream, matcher).await.is_ok());
    }

    #[tokio::test]
    async fn test_stderr_does_not_split_a_stdout_line() {
        let stream = frames(&[
            (LogSource::StdOut, "Sta"),
            (LogSource::StdErr, "warn: slow disk\n"),
            (LogSource::StdOut, "rted\r\n"),
        ]);
        let matcher = LogMessageMatcher::new(STARTED, 1).unwrap();
        assert!(wait_for_log_message("abc", stream, matcher).await.is_ok());
    }

    #[tokio::test]
    async fn test_ready_line_on_stderr_is_matched() {
        let stream = frames(&[
            (LogSource::StdOut, "Starting partitions\r\n"),
            (LogSource::StdErr, "Started\r\n"),
        ]);
        let matcher = LogMessageMatcher::new(STARTED, 1).unwrap();
        assert!(wait_for_log_message("abc", stream, matcher).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_fails_when_stream_ends_early() {
        let stream = chunks(&["Starting\r\n", "Shutting down\r\n"]);
        let matcher = LogMessageMatcher::new(STARTED, 1).unwrap();
        let err = wait_for_log_message("abc", stream, matcher).await.unwrap_err();
        assert!(matches!(err, ContainerError::ContainerExited(_)));
    }

    #[tokio::test]
    async fn test_wait_propagates_stream_errors() {
        let items: Vec<Result<(LogSource, Vec<u8>), ContainerError>> =
            vec![Err(ContainerError::LogStream("connection reset".to_string()))];
        let matcher = LogMessageMatcher::new(STARTED, 1).unwrap();
        let err = wait_for_log_message("abc", stream::iter(items).boxed(), matcher)
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::LogStream(_)));
    }
}
