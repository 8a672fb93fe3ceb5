//! URL 分解
//!
//! `http[s]://host[:port]/path` 形式のリクエストURIをフィールドに分解します。

use std::fmt;

use super::ParseError;

/// URL に指定されたプロトコル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// プロトコル指定なし、または未知のプロトコル
    None,
    Http,
    Https,
}

/// 分解済み URL
///
/// ポート省略時は HTTP なら 80、それ以外は 443 を補います
/// （CONNECT の `host:port` 形式はスキームを持たないため None 扱い）。
/// パス省略時は "/" を補います。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpUrl {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl HttpUrl {
    /// URL 文字列を分解
    ///
    /// プレフィックス（大文字小文字を区別しない）の後、最初の `:` または
    /// `/` までがホスト。`:` なら次の `/` までがポート。どちらも無ければ
    /// 残り全体がホストです。ポートが数値として不正な場合のみ失敗します。
    pub fn parse(url: &str) -> Result<Self, ParseError> {
        let (protocol, rest) = if url.len() >= 7 && url[..7].eq_ignore_ascii_case("http://") {
            (Protocol::Http, &url[7..])
        } else if url.len() >= 8 && url[..8].eq_ignore_ascii_case("https://") {
            (Protocol::Https, &url[8..])
        } else {
            (Protocol::None, url)
        };

        let default_port = match protocol {
            Protocol::Http => 80,
            _ => 443,
        };

        let (host, port, path) = match rest.find([':', '/']) {
            Some(pos) if rest.as_bytes()[pos] == b':' => {
                let host = &rest[..pos];
                match rest[pos + 1..].find('/') {
                    Some(slash) => {
                        let port = parse_port(&rest[pos + 1..pos + 1 + slash])?;
                        (host, port, &rest[pos + 1 + slash..])
                    }
                    None => {
                        let port = parse_port(&rest[pos + 1..])?;
                        (host, port, "/")
                    }
                }
            }
            Some(pos) => (&rest[..pos], default_port, &rest[pos..]),
            None => (rest, default_port, "/"),
        };

        Ok(Self {
            protocol,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

fn parse_port(s: &str) -> Result<u16, ParseError> {
    s.parse().map_err(|_| ParseError::new("invalid port number"))
}

impl fmt::Display for HttpUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Http => write!(f, "http://")?,
            Protocol::Https => write!(f, "https://")?,
            Protocol::None => {}
        }
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}
