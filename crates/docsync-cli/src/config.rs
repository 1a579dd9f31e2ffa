//! Tail configuration.

use std::path::PathBuf;

use clap::Parser;

use docsync_core::ObserverConfig;
use docsync_proto::document::DEFAULT_DELETED_FIELD;

/// Default store key for the persisted watermark.
pub const DEFAULT_STORE_KEY: &str = "docsync:lastSync";

/// Default last-updated field.
pub const DEFAULT_FIELD: &str = "updatedAt";

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "docsync_core=info,docsync_cli=info";

/// docsync-tail configuration.
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Path to the sled database holding watermarks.
    pub data_path: PathBuf,

    /// Key the watermark is stored under.
    pub store_key: String,

    /// Observer settings.
    pub observer: ObserverConfig,

    /// JSON-lines file of change batches. `None` reads standard input.
    pub input: Option<PathBuf>,

    /// Clear the stored watermark before connecting.
    pub clear: bool,

    /// Print the stored watermark and exit.
    pub show_watermark: bool,
}

impl TailConfig {
    /// Create a configuration with the given data path.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            store_key: DEFAULT_STORE_KEY.to_string(),
            observer: ObserverConfig::new(DEFAULT_FIELD),
            input: None,
            clear: false,
            show_watermark: false,
        }
    }

    /// Set the store key.
    pub fn with_store_key(mut self, key: impl Into<String>) -> Self {
        self.store_key = key.into();
        self
    }

    /// Set the observer settings.
    pub fn with_observer(mut self, observer: ObserverConfig) -> Self {
        self.observer = observer;
        self
    }

    /// Read batches from a file.
    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Clear the stored watermark before connecting.
    pub fn with_clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

/// Command-line arguments for docsync-tail.
#[derive(Parser, Debug)]
#[command(name = "docsync-tail")]
#[command(version, about = "Replay change batches through a checkpointed observer", long_about = None)]
pub struct Args {
    /// Path to the watermark database directory.
    #[arg(short, long, default_value = "./data")]
    pub data_path: PathBuf,

    /// Key the watermark is stored under.
    #[arg(long, default_value = DEFAULT_STORE_KEY)]
    pub store_key: String,

    /// Document field holding the last-updated timestamp.
    #[arg(short, long, default_value = DEFAULT_FIELD)]
    pub field: String,

    /// Document field holding the soft-delete flag.
    #[arg(long, default_value = DEFAULT_DELETED_FIELD)]
    pub deleted_field: String,

    /// JSON-lines file of change batches (standard input if omitted).
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Clear the stored watermark before connecting.
    #[arg(long)]
    pub clear: bool,

    /// Print the stored watermark and exit.
    #[arg(long)]
    pub show_watermark: bool,
}

impl Args {
    /// Convert command-line arguments to tail configuration.
    pub fn into_config(self) -> TailConfig {
        TailConfig {
            data_path: self.data_path,
            store_key: self.store_key,
            observer: ObserverConfig::new(self.field).with_deleted_field(self.deleted_field),
            input: self.input,
            clear: self.clear,
            show_watermark: self.show_watermark,
        }
    }
}
