use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
    sync::Mutex,
};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_DIR: &str = "logs";

/// Install the process-wide subscriber: stderr plus `logs/<component>.log`.
///
/// `RUST_LOG` overrides `default_level`. A log file that cannot be opened
/// degrades to stderr-only output.
pub fn init(component: &str, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, file_error) = match open_log_file(Path::new(LOG_DIR), component) {
        Ok(file) => {
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init();

    if let (Ok(()), Some(e)) = (installed, file_error) {
        tracing::warn!("File logging disabled ({}/{}.log): {}", LOG_DIR, component, e);
    }
}

fn open_log_file(dir: &Path, component: &str) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{component}.log")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_created_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");

        open_log_file(&logs, "server").unwrap();
        open_log_file(&logs, "server").unwrap();

        assert!(logs.join("server.log").is_file());
    }
}
