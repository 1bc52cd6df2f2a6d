//! INI file configuration adapter.

use crate::domain::error::SyncError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config.load(path).map_err(|reason| SyncError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, SyncError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| SyncError::ConfigParse {
                file: "<string>".into(),
                reason,
            })?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_sections() {
        let content = r#"
[storage]
stock_path = /var/lib/barsync/stocks.db

[provider]
kind = yahoo
timeout_seconds = 15
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("storage", "stock_path"),
            Some("/var/lib/barsync/stocks.db".to_string())
        );
        assert_eq!(adapter.get_string("provider", "kind"), Some("yahoo".to_string()));
        assert_eq!(adapter.get_int("provider", "timeout_seconds", 30), 15);
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[sync]\nupdate_threshold_days = 5\n").unwrap();
        assert_eq!(adapter.get_string("sync", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_returns_default_for_missing_or_non_numeric() {
        let adapter = FileConfigAdapter::from_string("[storage]\npool_size = abc\n").unwrap();
        assert_eq!(adapter.get_int("storage", "pool_size", 4), 4);
        assert_eq!(adapter.get_int("storage", "missing", 42), 42);
    }

    #[test]
    fn get_double_returns_value_or_default() {
        let adapter =
            FileConfigAdapter::from_string("[sync]\nrate_limit_cooldown_seconds = 1.5\n").unwrap();
        assert_eq!(adapter.get_double("sync", "rate_limit_cooldown_seconds", 2.0), 1.5);
        assert_eq!(adapter.get_double("sync", "token_bucket_rate", 0.5), 0.5);
    }

    #[test]
    fn get_bool_accepts_common_spellings() {
        let adapter = FileConfigAdapter::from_string(
            "[storage]\na = true\nb = yes\nc = 1\nd = off\ne = No\nf = maybe\n",
        )
        .unwrap();
        assert!(adapter.get_bool("storage", "a", false));
        assert!(adapter.get_bool("storage", "b", false));
        assert!(adapter.get_bool("storage", "c", false));
        assert!(!adapter.get_bool("storage", "d", true));
        assert!(!adapter.get_bool("storage", "e", true));
        assert!(adapter.get_bool("storage", "f", true));
    }

    #[test]
    fn get_list_splits_and_trims() {
        let adapter =
            FileConfigAdapter::from_string("[watchlist]\nindices = ^GSPC, ^DJI ,,^IXIC\n").unwrap();
        assert_eq!(
            adapter.get_list("watchlist", "indices"),
            vec!["^GSPC", "^DJI", "^IXIC"]
        );
        assert!(adapter.get_list("watchlist", "futures").is_empty());
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[watchlist]\nfile = /etc/barsync/watch.csv\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("watchlist", "file"),
            Some("/etc/barsync/watch.csv".to_string())
        );
    }

    #[test]
    fn from_file_missing_is_config_parse_error() {
        match FileConfigAdapter::from_file("/nonexistent/path/barsync.ini") {
            Err(SyncError::ConfigParse { file, .. }) => {
                assert_eq!(file, "/nonexistent/path/barsync.ini")
            }
            Err(other) => panic!("expected ConfigParse, got {other}"),
            Ok(_) => panic!("expected error"),
        }
    }
}
