use std::fs::OpenOptions;
use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::config::Config;

/// Set up the `log` backend.
///
/// `RUST_LOG` wins over the configured level; `--verbose` forces debug.
/// With a `log_file` configured, records go to stderr and are appended to
/// that file.
pub fn init(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.log_level.as_str() };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    if let Some(path) = &config.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee::new(io::stderr(), file))));
    }

    builder.init();
    Ok(())
}

/// Writes everything to two sinks.
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.first.write_all(buf)?;
        self.second.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.first.flush()?;
        self.second.flush()
    }
}
