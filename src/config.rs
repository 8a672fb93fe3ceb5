//! 設定
//!
//! 作業ディレクトリの `config.toml` を読み込みます。ファイルが無ければ
//! 既定値で起動します。
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:12345"
//!
//! [cache]
//! entries = 4096
//!
//! [log]
//! path = "proxy.log"
//! ```

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;

fn default_listen() -> String {
    "0.0.0.0:12345".to_string()
}

fn default_cache_entries() -> usize {
    4096
}

fn default_log_path() -> String {
    "proxy.log".to_string()
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerSection {
    /// 待ち受けアドレス
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct CacheSection {
    /// キャッシュのスロット数（固定）
    #[serde(default = "default_cache_entries")]
    pub entries: usize,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LogSection {
    /// トレースログの出力先ファイル
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            cache: CacheSection::default(),
            log: LogSection::default(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            entries: default_cache_entries(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            path: default_log_path(),
        }
    }
}

impl Config {
    /// 設定ファイルを読み込む（無ければ既定値）
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("TOML parse error: {}", e))
        })
    }
}
