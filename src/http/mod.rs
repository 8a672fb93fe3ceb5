//! HTTP/1.x メッセージ処理
//!
//! URL 分解、メッセージモデル、インクリメンタルパーサー、
//! キャッシュ制御ヘッダーの評価を提供します。

mod cache_info;
mod message;
mod parser;
mod source;
mod url;

pub use cache_info::{
    format_http_date, format_trace_time, parse_http_date, RequestCacheInfo, ResponseCacheInfo,
};
pub use message::{canonicalize_key, Header, HttpMessage};
pub use parser::{BodyFormat, HttpParser, State, Step};
pub use source::ByteSource;
pub use url::{HttpUrl, Protocol};

use std::fmt;

/// パース失敗を表すエラー
///
/// 現在のメッセージに対して致命的であり、接続側で
/// クライアント側なら 400、オリジン側なら 502 に変換されます。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError {
    reason: &'static str,
}

impl ParseError {
    pub(crate) fn new(reason: &'static str) -> Self {
        Self { reason }
    }

    /// 失敗理由を取得
    #[inline]
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason)
    }
}

impl std::error::Error for ParseError {}
