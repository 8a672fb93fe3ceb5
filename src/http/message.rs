//! HTTP メッセージモデル
//!
//! スタートライン3要素、順序を保持するヘッダー列、ボディのバイト列を
//! 保持します。ヘッダーキーは正規化された形で格納されます。

/// ヘッダー1行分のキーと値
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

/// HTTP メッセージ
///
/// ヘッダーはワイヤ上の順序を保持し、同一キーの重複を許します。
/// ボディはバイナリセーフなバイト列です。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMessage {
    pub start_line: [String; 3],
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全フィールドを空にする
    pub fn clear(&mut self) {
        for field in &mut self.start_line {
            field.clear();
        }
        self.headers.clear();
        self.body.clear();
    }

    /// スタートラインを空白区切りの1行として取得（ログ用）
    pub fn start_line_str(&self) -> String {
        format!(
            "{} {} {}",
            self.start_line[0], self.start_line[1], self.start_line[2]
        )
    }

    /// 正規化済みキーで最初に一致したヘッダー値を取得
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_str())
    }

    /// ヘッダーを置換（存在しなければ末尾に追加）
    pub fn replace_header(&mut self, key: &str, value: &str) {
        for h in &mut self.headers {
            if h.key == key {
                h.value = value.to_string();
                return;
            }
        }
        self.headers.push(Header {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// 指定キーのヘッダーをすべて削除
    pub fn remove_headers(&mut self, keys: &[&str]) {
        self.headers.retain(|h| !keys.contains(&h.key.as_str()));
    }

    /// ワイヤ形式に直列化
    ///
    /// スタートライン + CRLF、各ヘッダー行 + CRLF、空行、ボディの順。
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(self.start_line[0].as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.start_line[1].as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.start_line[2].as_bytes());
        out.extend_from_slice(b"\r\n");
        for h in &self.headers {
            out.extend_from_slice(h.key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(h.value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// ヘッダーキーを正規化
///
/// 英字の連続ごとに先頭を大文字、残りを小文字にします。
/// 大文字小文字を区別しない等価比較を、正規化済みキーの
/// 単純比較で済ませるためのものです。
pub fn canonicalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut first = true;
    for ch in key.chars() {
        if ch.is_ascii_alphabetic() {
            if first {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch.to_ascii_lowercase());
            }
            first = false;
        } else {
            out.push(ch);
            first = true;
        }
    }
    out
}
