use std::io::{self, Write};

use env_logger::{Builder, Env, Target};
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
    task::JoinHandle,
};

use crate::{config, core::BalanceResult};

/// Environment variable holding the `env_logger` filter directives.
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

const DEFAULT_FILTER: &str = "info";

/// Log records formatted by env_logger, queued for the file task.
pub struct ChannelWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender.send(buf.to_vec()).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Builder reading its filter from `filter_env`, or `info` when that is unset.
pub fn env_builder(filter_env: &str) -> Builder {
    Builder::from_env(Env::default().filter_or(filter_env, DEFAULT_FILTER))
}

/// env_logger backend that appends to a file from a background task.
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    fn writer(&self) -> ChannelWriter {
        ChannelWriter {
            sender: self.sender.clone(),
        }
    }

    /// Installs env_logger as the global logger, writing into this sink.
    pub fn init_env_logger(&self) {
        env_builder(LOG_FILTER_ENV)
            .target(Target::Pipe(Box::new(self.writer())))
            .init();
    }

    /// Opens the log file and spawns the task draining the channel into it.
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> BalanceResult<JoinHandle<()>> {
        let log_file_path = &self.config.path;

        if let Some(parent) = std::path::Path::new(log_file_path).parent() {
            if !parent.as_os_str().is_empty() && metadata(parent).await.is_err() {
                create_dir_all(parent).await?;
            }
        }

        let file = BufWriter::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(log_file_path)
                .await?,
        );

        Ok(tokio::spawn(self.run(file, shutdown)))
    }

    async fn run(
        mut self,
        mut file: BufWriter<tokio::fs::File>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // the writer half lives in env_logger, drop ours so recv ends with it
        drop(self.sender);

        loop {
            tokio::select! {
                biased;
                // Shutdown signal handling
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Shutdown signal received, stopping write log");
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                eprintln!("Failed to write to log file: {e}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // drain whatever was logged before shutdown
        while let Ok(data) = self.receiver.try_recv() {
            if let Err(e) = file.write_all(&data).await {
                eprintln!("Failed to write to log file: {e}");
            }
        }

        if let Err(e) = file.flush().await {
            eprintln!("Failed to flush log file: {e}");
        }
    }
}
