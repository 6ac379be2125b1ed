use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "agora", about = "Open group chat room server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the background sweeper until interrupted (the default)
    Serve,

    /// Add a room with the given token
    AddRoom {
        token: String,
        /// Initial room name; defaults to the token
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete the room with the given token, including all of its messages and files
    DeleteRoom {
        token: String,
        /// Don't prompt for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Add session ids as moderators/admins of the rooms given by --rooms
    AddModerators {
        #[arg(required = true)]
        session_ids: Vec<String>,
        /// Room tokens; `+` for global moderators, `*` for every room
        #[arg(long, required = true, num_args = 1..)]
        rooms: Vec<String>,
        #[arg(long)]
        admin: bool,
        /// Make a global moderator publicly visible
        #[arg(long, conflicts_with = "hidden")]
        visible: bool,
        /// Hide a room moderator from the public moderator list
        #[arg(long)]
        hidden: bool,
    },

    /// Remove session ids as moderators/admins of the rooms given by --rooms
    DeleteModerators {
        #[arg(required = true)]
        session_ids: Vec<String>,
        #[arg(long, required = true, num_args = 1..)]
        rooms: Vec<String>,
    },

    /// List rooms and their statistics
    ListRooms,

    /// List global moderators and admins
    ListGlobalMods,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub rooms: RoomsConfig,
    pub files: FilesConfig,
    pub filter: FilterConfig,
    pub sweeper: SweeperConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Public base URL used when building room links
    pub url_base: String,
    /// Server public key, hex encoded
    pub pubkey: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RoomsConfig {
    /// Posts allowed per `rate_limit_interval`; 0 disables rate limiting
    pub rate_limit_size: u32,
    /// Rate limit window in seconds
    pub rate_limit_interval: f64,
    /// Window (seconds) used for the active user count
    pub active_threshold: f64,
    /// Re-key moderation actions onto blinded ids
    pub require_blind_keys: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FilesConfig {
    pub path: Option<PathBuf>,
    /// Lifetime (seconds) of an attachment once it belongs to a post; 0 means forever
    pub default_expiry: f64,
    /// Lifetime (seconds) of a fresh upload that no post has claimed yet
    pub unclaimed_expiry: f64,
    pub filename_max: usize,
    pub filename_keep_prefix: usize,
    pub filename_keep_suffix: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Accept filtered posts but hide them, instead of rejecting
    pub silent: bool,
    pub words: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between sweeps
    pub interval: u64,
    pub message_history_days: f64,
    pub room_activity_days: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url_base: "http://localhost".to_string(),
            pubkey: "00".repeat(32),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            rate_limit_size: 5,
            rate_limit_interval: 16.0,
            active_threshold: 7.0 * 86400.0,
            require_blind_keys: false,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            path: None,
            default_expiry: 15.0 * 86400.0,
            unclaimed_expiry: 3600.0,
            filename_max: 60,
            filename_keep_prefix: 40,
            filename_keep_suffix: 17,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            silent: true,
            words: Vec::new(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: 10,
            message_history_days: 30.0,
            room_activity_days: 60.0,
        }
    }
}

impl FilesConfig {
    /// Expiry timestamp for a post attachment claimed at `now`, or `None` for no expiry.
    pub fn claimed_expiry(&self, now: f64) -> Option<f64> {
        (self.default_expiry > 0.0).then(|| now + self.default_expiry)
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.resolve_paths(&data_dir);
        Ok(config)
    }

    /// Fills in unset paths relative to the data directory.
    pub fn resolve_paths(&mut self, data_dir: &std::path::Path) {
        if self.database.path.is_none() {
            self.database.path = Some(data_dir.join("agora.db"));
        }
        if self.files.path.is_none() {
            self.files.path = Some(data_dir.join("uploads"));
        }
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".agora")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("agora.db"))
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.files
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("uploads"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(config: Option<PathBuf>, data_dir: Option<PathBuf>) -> Cli {
        Cli {
            config,
            data_dir,
            command: None,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.rooms.rate_limit_size, 5);
        assert_eq!(config.rooms.rate_limit_interval, 16.0);
        assert_eq!(config.files.unclaimed_expiry, 3600.0);
        assert_eq!(config.files.default_expiry, 15.0 * 86400.0);
        assert_eq!(config.sweeper.interval, 10);
        assert!(!config.filter.enabled);
        assert!(config.database.path.is_none());
        assert!(config.files.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli(None, Some(PathBuf::from("/tmp/test-agora")));
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-agora"));
    }

    #[test]
    fn data_dir_defaults_to_dot_agora() {
        let dir = Config::data_dir(&cli(None, None));
        assert!(dir.ends_with(".agora"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli(None, Some(tmp.path().to_path_buf()))).unwrap();
        assert_eq!(config.rooms.rate_limit_size, 5);
        assert_eq!(config.db_path(), tmp.path().join("agora.db"));
        assert_eq!(config.uploads_path(), tmp.path().join("uploads"));
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[rooms]
rate_limit_size = 10
rate_limit_interval = 30.0

[filter]
enabled = true
silent = false
words = ["darn"]

[sweeper]
message_history_days = 7.0
"#,
        )
        .unwrap();

        let config = Config::load(&cli(Some(config_path), Some(tmp.path().to_path_buf()))).unwrap();
        assert_eq!(config.rooms.rate_limit_size, 10);
        assert_eq!(config.rooms.rate_limit_interval, 30.0);
        assert!(config.filter.enabled);
        assert!(!config.filter.silent);
        assert_eq!(config.filter.words, vec!["darn".to_string()]);
        assert_eq!(config.sweeper.message_history_days, 7.0);
        // Untouched sections keep their defaults
        assert_eq!(config.sweeper.room_activity_days, 60.0);
        assert_eq!(config.files.filename_max, 60);
    }

    #[test]
    fn zero_default_expiry_means_forever() {
        let mut files = FilesConfig::default();
        assert_eq!(files.claimed_expiry(100.0), Some(100.0 + 15.0 * 86400.0));
        files.default_expiry = 0.0;
        assert_eq!(files.claimed_expiry(100.0), None);
    }
}
