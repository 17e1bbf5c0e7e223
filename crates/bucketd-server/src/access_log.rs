use crate::pipeline::{Interceptor, Reply, RequestInfo};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Writes one line per completed request to an append-only sink:
///
/// `remoteAddr - - [2006-01-02 15:04:05] METHOD status url`
///
/// The line is written after the rest of the pipeline has produced its reply
/// and before the reply reaches the transport.
pub struct AccessLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl AccessLog {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
        }
    }

    /// Open `path` for appending, creating it owner-only if missing.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        Ok(Self::new(options.open(path)?))
    }

    pub fn format_line(req: &RequestInfo, status: u16) -> String {
        format!(
            "{} - - [{}] {} {} {}",
            req.remote_addr,
            req.received_at.format("%Y-%m-%d %H:%M:%S"),
            req.method,
            status,
            req.url
        )
    }
}

impl Interceptor for AccessLog {
    fn after(&self, req: &RequestInfo, reply: &mut Reply) {
        let line = Self::format_line(req, reply.status);
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(sink, "{line}").and_then(|()| sink.flush()) {
            warn!("failed to write access log line: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Outcome;
    use crate::pipeline::{Pipeline, Recovery};
    use chrono::{Local, TimeZone};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn line_format() {
        let mut req = RequestInfo::new("DELETE", "/foo?x=1", "10.0.0.7:41234");
        req.received_at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            AccessLog::format_line(&req, 200),
            "10.0.0.7:41234 - - [2024-03-09 07:05:01] DELETE 200 /foo?x=1"
        );
    }

    #[test]
    fn one_line_per_request_including_faults() {
        let buf = SharedBuf::default();
        let pipeline = Pipeline::new()
            .with(AccessLog::new(buf.clone()))
            .with(Recovery);

        let ok = RequestInfo::new("GET", "/foo", "127.0.0.1:1");
        pipeline.run(&ok, || Reply::outcome(&Outcome::Value("bar".into())));
        let bad = RequestInfo::new("GET", "/bar", "127.0.0.1:2");
        pipeline.run(&bad, || panic!("fault"));
        let missing = RequestInfo::new("PATCH", "/foo", "127.0.0.1:3");
        pipeline.run(&missing, Reply::not_found);

        let contents = buf.contents();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("127.0.0.1:1 - - ["));
        assert!(lines[0].ends_with("] GET 200 /foo"));
        assert!(lines[1].ends_with("] GET 200 /bar"));
        assert!(lines[2].ends_with("] PATCH 404 /foo"));
    }

    #[test]
    fn open_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("access.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "previous line\n").unwrap();

        let log = AccessLog::open(&path).unwrap();
        let req = RequestInfo::new("PUT", "/k", "127.0.0.1:9");
        let mut reply = Reply::outcome(&Outcome::Done);
        log.after(&req, &mut reply);
        drop(log);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "previous line");
        assert!(lines[1].ends_with("] PUT 200 /k"));
    }

    #[cfg(unix)]
    #[test]
    fn open_creates_owner_only_file() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let _log = AccessLog::open(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
