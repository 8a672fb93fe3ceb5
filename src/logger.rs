//! 同期化トレースログ
//!
//! 全タスクが共有する行単位の追記ログ。1行の組み立てから書き出しまでを
//! ミューテックスで覆うため、複数トークンからなる行も分断されずに
//! 出力されます。行の形式は `<id または (no-id)>: <LEVEL?> <本文>`。
//! レベルは ERROR / NOTE / なし（リクエストごとのトレース行）の3種です。

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// ID 0 は「ID なし」を表し `(no-id)` と出力される
pub const NO_ID: u64 = 0;

/// ミューテックスで同期された行ログ
pub struct SyncLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl SyncLog {
    /// ログファイルを追記モードで開く
    pub fn to_file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    /// 任意の出力先を使う（テスト用途など）
    pub fn from_writer(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// レベルなしのトレース行
    pub fn trace(&self, id: u64, text: &str) {
        self.write_line(id, None, text);
    }

    /// NOTE 行
    pub fn note(&self, id: u64, text: &str) {
        self.write_line(id, Some("NOTE"), text);
    }

    /// ERROR 行
    pub fn error(&self, id: u64, text: &str) {
        self.write_line(id, Some("ERROR"), text);
    }

    fn write_line(&self, id: u64, level: Option<&str>, text: &str) {
        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // ログはベストエフォート。書き込み失敗でプロキシは止めない
        let _ = write_line_to(&mut **sink, id, level, text);
    }
}

fn write_line_to(
    sink: &mut dyn Write,
    id: u64,
    level: Option<&str>,
    text: &str,
) -> io::Result<()> {
    if id == NO_ID {
        sink.write_all(b"(no-id)")?;
    } else {
        let mut buf = itoa::Buffer::new();
        sink.write_all(buf.format(id).as_bytes())?;
    }
    sink.write_all(b": ")?;
    if let Some(level) = level {
        sink.write_all(level.as_bytes())?;
        sink.write_all(b" ")?;
    }
    sink.write_all(text.as_bytes())?;
    sink.write_all(b"\n")?;
    sink.flush()
}
