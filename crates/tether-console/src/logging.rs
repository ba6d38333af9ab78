use crate::config::ConsoleConfig;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Keeps the log file handle alive for the life of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<fs::File>>>,
}

impl LogGuard {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

#[derive(Clone)]
struct MultiWriter {
    stdout_enabled: bool,
    file: Option<Arc<Mutex<fs::File>>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stdout_enabled {
            let _ = io::stdout().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stdout_enabled {
            let _ = io::stdout().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

/// Tracing goes to the log file and, when enabled, stdout. With neither,
/// events are discarded so the terminal stays readable.
pub fn init_logging(config: &ConsoleConfig) -> LogGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let guard = open_log_file(&config.log_dir, &config.session_id).unwrap_or_else(|err| {
        eprintln!("tether-console: log file unavailable: {err}");
        LogGuard { file: None }
    });

    let writer = MultiWriter {
        stdout_enabled: config.log_stdout,
        file: guard.file.clone(),
    };
    let make_writer = if writer.stdout_enabled || writer.file.is_some() {
        BoxMakeWriter::new(move || writer.clone())
    } else {
        BoxMakeWriter::new(io::sink)
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    guard
}

fn open_log_file(log_dir: &str, session_id: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!(
        "tether-console-{}.log",
        sanitize_component(session_id)
    ));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
