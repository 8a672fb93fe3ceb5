//! キャッシュ制御ヘッダーの評価
//!
//! パース済みメッセージのヘッダーから、RFC 7234 4.2 の鮮度計算に
//! 必要な情報と RFC 7232 のバリデータを抽出します。
//! 個々のフィールドのパース失敗は「存在しない」扱いで黙って捨てます。

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use super::message::HttpMessage;
use super::ParseError;

/// IMF-fixdate（`%a, %d %b %Y %H:%M:%S GMT`）
static HTTP_DATE_FORMAT: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// トレースログ用の `%c` 相当形式（`Wed Feb 28 20:51:55 2018`）
static TRACE_TIME_FORMAT: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
);

/// IMF-fixdate 文字列を UTC 時刻として解釈
pub fn parse_http_date(s: &str) -> Result<OffsetDateTime, ParseError> {
    PrimitiveDateTime::parse(s.trim(), HTTP_DATE_FORMAT)
        .map(|dt| dt.assume_utc())
        .map_err(|_| ParseError::new("invalid date format"))
}

/// 時刻を IMF-fixdate 文字列にする（ヘッダー値用）
pub fn format_http_date(t: OffsetDateTime) -> String {
    t.format(HTTP_DATE_FORMAT).unwrap_or_default()
}

/// 時刻をトレースログ用の形式にする
pub fn format_trace_time(t: OffsetDateTime) -> String {
    t.format(TRACE_TIME_FORMAT).unwrap_or_default()
}

/// delta-seconds（非負整数の秒数）をパース
///
/// u32 に収まらない値はパース失敗としてディレクティブごと捨てます。
fn parse_delta_seconds(s: &str) -> Result<Duration, ParseError> {
    let value: u32 = s
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid delta-seconds"))?;
    Ok(Duration::seconds(i64::from(value)))
}

/// レスポンスのキャッシュ関連情報（RFC 7234 4.2）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCacheInfo {
    /// Date ヘッダーの値
    pub date_value: OffsetDateTime,
    /// リクエストを送信した時刻
    pub request_time: OffsetDateTime,
    /// レスポンスを受信した時刻
    pub response_time: OffsetDateTime,
    /// Last-Modified ヘッダー（存在すれば）
    pub last_modified: Option<OffsetDateTime>,
    /// 受信時点での推定経過時間（RFC 7234 4.2.3）
    pub corrected_initial_age: Duration,
    /// 鮮度寿命（RFC 7234 4.2.1）
    pub freshness_lifetime: Duration,
    /// Etag ヘッダー（RFC 7232 2.3、無ければ空文字列）
    pub etag: String,
    /// Cache-Control: no-cache — 検証なしで保存レスポンスを返してはならない
    pub no_cache: bool,
    /// Cache-Control: no-store — レスポンスを保存してはならない
    pub no_store: bool,
    /// Cache-Control: private
    pub private: bool,
}

impl ResponseCacheInfo {
    /// レスポンスメッセージのヘッダーから情報を抽出する
    ///
    /// Date ヘッダーが無い（またはパースできない）場合は計算が
    /// 成立しないため None を返します。
    pub fn from_message(
        message: &HttpMessage,
        request_time: OffsetDateTime,
        response_time: OffsetDateTime,
    ) -> Option<Self> {
        Self::from_message_at(message, request_time, response_time, OffsetDateTime::now_utc())
    }

    fn from_message_at(
        message: &HttpMessage,
        request_time: OffsetDateTime,
        response_time: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Option<Self> {
        let mut age_value = Duration::ZERO;
        let mut cache_control = String::new();
        let mut date_value = None;
        let mut expires = None;
        let mut last_modified = None;
        let mut etag = String::new();

        for h in &message.headers {
            match h.key.as_str() {
                "Age" => {
                    if let Ok(age) = parse_delta_seconds(&h.value) {
                        age_value = age;
                    }
                }
                "Cache-Control" => cache_control = h.value.clone(),
                "Date" => {
                    if let Ok(date) = parse_http_date(&h.value) {
                        date_value = Some(date);
                    }
                }
                "Etag" => etag = h.value.clone(),
                "Expires" => {
                    if let Ok(date) = parse_http_date(&h.value) {
                        expires = Some(date);
                    }
                }
                "Last-Modified" => {
                    if let Ok(date) = parse_http_date(&h.value) {
                        last_modified = Some(date);
                    }
                }
                _ => {}
            }
        }

        let date_value = date_value?;

        // RFC 7234 4.2.3
        let apparent_age = if response_time > date_value {
            response_time - date_value
        } else {
            Duration::ZERO
        };
        let response_delay = response_time - request_time;
        let corrected_age_value = age_value + response_delay;

        let mut info = Self {
            date_value,
            request_time,
            response_time,
            last_modified,
            corrected_initial_age: apparent_age.max(corrected_age_value),
            freshness_lifetime: Duration::ZERO,
            etag,
            no_cache: false,
            no_store: false,
            private: false,
        };
        info.apply_cache_control(&cache_control, expires, now);
        Some(info)
    }

    /// Cache-Control 行を解釈して鮮度寿命とフラグを確定する
    fn apply_cache_control(
        &mut self,
        cache_control: &str,
        expires: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) {
        let mut max_age = None;
        let mut s_maxage = None;

        for field in cache_control.split(',') {
            let field = field.trim();
            if field == "no-cache" {
                self.no_cache = true;
            } else if field == "no-store" {
                self.no_store = true;
            } else if field == "private" {
                self.private = true;
            } else if let Some(rest) = field.strip_prefix("max-age=") {
                if let Ok(age) = parse_delta_seconds(rest) {
                    max_age = Some(age);
                }
            } else if let Some(rest) = field.strip_prefix("s-maxage=") {
                if let Ok(age) = parse_delta_seconds(rest) {
                    s_maxage = Some(age);
                }
            }
        }

        // RFC 7234 4.2.1: s-maxage > max-age > Expires-Date > 発見的手法
        if let Some(age) = s_maxage {
            self.freshness_lifetime = age;
        } else if let Some(age) = max_age {
            self.freshness_lifetime = age;
        } else if let Some(expires) = expires {
            self.freshness_lifetime = expires - self.date_value;
        } else if let Some(last_modified) = self.last_modified {
            self.freshness_lifetime = (now - last_modified) / 10;
        }
    }

    /// 保存レスポンスの現在経過時間（RFC 7234 4.2.3）
    pub fn current_age(&self) -> Duration {
        self.current_age_at(OffsetDateTime::now_utc())
    }

    pub(crate) fn current_age_at(&self, now: OffsetDateTime) -> Duration {
        let resident_time = now - self.response_time;
        self.corrected_initial_age + resident_time
    }

    /// 鮮度寿命を使い切ったか
    pub fn expired(&self) -> bool {
        self.current_age() >= self.freshness_lifetime
    }
}

/// リクエスト側のキャッシュ関連情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCacheInfo {
    /// If-Modified-Since ヘッダー（存在すれば）
    pub if_modified_since: Option<OffsetDateTime>,
    /// If-None-Match ヘッダー（無ければ空文字列）
    pub if_none_match: String,
    /// Cache-Control: no-cache
    pub no_cache: bool,
}

impl RequestCacheInfo {
    /// リクエストメッセージのヘッダーから情報を抽出する
    pub fn from_message(message: &HttpMessage) -> Self {
        let mut info = Self::default();
        for h in &message.headers {
            match h.key.as_str() {
                "Cache-Control" => {
                    for field in h.value.split(',') {
                        if field.trim() == "no-cache" {
                            info.no_cache = true;
                        }
                    }
                }
                "If-Modified-Since" => {
                    if let Ok(date) = parse_http_date(&h.value) {
                        info.if_modified_since = Some(date);
                    }
                }
                "If-None-Match" => info.if_none_match = h.value.clone(),
                _ => {}
            }
        }
        info
    }
}
