//! インクリメンタル HTTP パーサー
//!
//! START → HEADER → BODY → ACCEPT のステートマシンで、行または
//! バイト単位の入力から1メッセージを組み立てます。ボディのフレーミングは
//! Content-Length / chunked / EOF 終端（PLAIN）の3種を判別します。
//!
//! chunked ボディはデコードせず、チャンクヘッダー行を含むフレーミングを
//! そのままボディへ蓄積します。プロキシはメッセージを再直列化して
//! 転送するため、受信した形のまま保持する必要があります。

use super::message::{canonicalize_key, Header, HttpMessage};
use super::source::ByteSource;
use super::ParseError;

/// パーサーの状態
///
/// エラーなく入力を消費する限り、状態は START, HEADER, BODY, ACCEPT の
/// 順にのみ進みます（ボディ無しメッセージは HEADER から ACCEPT へ直行）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Start,
    Header,
    Body,
    Accept,
}

/// ボディのフレーミング形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// フレーミングなし（EOF まで読む）
    Plain,
    /// Content-Length 指定
    Length,
    /// Transfer-Encoding: chunked
    Chunked,
}

/// `parse_step` 1回の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// 1論理単位を消費した
    Advanced,
    /// 入力が不足している
    NeedMore,
}

/// インクリメンタルパーサー
///
/// 1つの HttpMessage を所有し、その生存期間中これに結び付きます。
/// `reset()` でメッセージを空にして初期状態へ戻ります。
#[derive(Debug)]
pub struct HttpParser {
    message: HttpMessage,
    state: State,
    format: BodyFormat,
    /// Content-Length の値。chunked ではチャンク残りバイト数としても使う
    content_length: usize,
    saw_chunked: bool,
    conflicting_framing: bool,
}

impl HttpParser {
    pub fn new() -> Self {
        Self {
            message: HttpMessage::new(),
            state: State::Start,
            format: BodyFormat::Plain,
            content_length: 0,
            saw_chunked: false,
            conflicting_framing: false,
        }
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    #[inline]
    pub fn format(&self) -> BodyFormat {
        self.format
    }

    #[inline]
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Content-Length と Transfer-Encoding: chunked が同時に現れたか
    ///
    /// HTTP としては不正な組み合わせで、chunked を優先します。
    /// 接続側が警告を出せるようフラグで通知します。
    #[inline]
    pub fn conflicting_framing(&self) -> bool {
        self.conflicting_framing
    }

    #[inline]
    pub fn message(&self) -> &HttpMessage {
        &self.message
    }

    #[inline]
    pub fn message_mut(&mut self) -> &mut HttpMessage {
        &mut self.message
    }

    /// メッセージを取り出す（パーサー側は空になる）
    pub fn into_message(self) -> HttpMessage {
        self.message
    }

    /// メッセージを空にして初期状態へ戻す
    pub fn reset(&mut self) {
        self.message.clear();
        self.state = State::Start;
        self.format = BodyFormat::Plain;
        self.content_length = 0;
        self.saw_chunked = false;
        self.conflicting_framing = false;
    }

    /// 入力から1論理単位を消費する
    ///
    /// スタートライン・ヘッダー行では1行、ボディではフレーミングに
    /// 応じたバイト列を消費します。入力不足なら `Step::NeedMore` を
    /// 返すので、呼び出し側はソケットから追加読み込みして再実行します。
    pub fn parse_step(&mut self, src: &mut ByteSource) -> Result<Step, ParseError> {
        match self.state {
            State::Start => self.put_start_line(src),
            State::Header => self.put_header(src),
            State::Body => self.put_content(src),
            State::Accept => Ok(Step::Advanced),
        }
    }

    /// ACCEPT に達するか入力が尽きるまで parse_step を繰り返す
    ///
    /// 主にテストと、メモリ上の完全なメッセージの解析に使います。
    pub fn parse(&mut self, src: &mut ByteSource) -> Result<(), ParseError> {
        while self.state != State::Accept {
            match self.parse_step(src)? {
                Step::Advanced => {}
                Step::NeedMore => break,
            }
        }
        Ok(())
    }

    fn put_start_line(&mut self, src: &mut ByteSource) -> Result<Step, ParseError> {
        let line = match src.next_line() {
            Some(line) => line,
            None => return Ok(Step::NeedMore),
        };
        let line = as_text(&line)?;

        // 最初の2つの空白で3分割。第3フィールドは空白を含み得るため
        // ("Not Found" など)、それ以上の分割はしない。
        let first = line.find(' ').ok_or(ParseError::new("invalid start line"))?;
        let second = line[first + 1..]
            .find(' ')
            .map(|i| first + 1 + i)
            .ok_or(ParseError::new("invalid start line"))?;
        self.message.start_line[0] = line[..first].to_string();
        self.message.start_line[1] = line[first + 1..second].to_string();
        self.message.start_line[2] = line[second + 1..].trim_end_matches('\r').to_string();
        self.state = State::Header;
        Ok(Step::Advanced)
    }

    fn put_header(&mut self, src: &mut ByteSource) -> Result<Step, ParseError> {
        let line = match src.next_line() {
            Some(line) => line,
            None => return Ok(Step::NeedMore),
        };
        if line.is_empty() || line == b"\r" {
            self.state = if self.has_body()? {
                State::Body
            } else {
                State::Accept
            };
            return Ok(Step::Advanced);
        }
        let line = as_text(&line)?;

        // RFC 7230 3.2.4: コロンの前に空白があってはならない
        let pos = line
            .find([':', ' '])
            .ok_or(ParseError::new("header line without colon"))?;
        if line.as_bytes()[pos] == b' ' {
            return Err(ParseError::new("space before header colon"));
        }
        let key = canonicalize_key(&line[..pos]);
        let value = line[pos + 1..].trim_matches([' ', '\t', '\r']).to_string();

        if key == "Content-Length" {
            if let Ok(n) = value.parse::<usize>() {
                if self.saw_chunked {
                    self.conflicting_framing = true;
                } else {
                    self.content_length = n;
                    self.format = BodyFormat::Length;
                    self.message.body.reserve(n);
                }
            }
        } else if key == "Transfer-Encoding" && value.contains("chunked") {
            if self.format == BodyFormat::Length {
                self.conflicting_framing = true;
            }
            self.saw_chunked = true;
            self.format = BodyFormat::Chunked;
            // chunked ではチャンク残量カウンタとして使うため 0 から始める
            self.content_length = 0;
        }

        self.message.headers.push(Header { key, value });
        Ok(Step::Advanced)
    }

    fn put_content(&mut self, src: &mut ByteSource) -> Result<Step, ParseError> {
        match self.format {
            BodyFormat::Plain => {
                if !src.is_empty() {
                    let bytes = src.take_all();
                    self.message.body.extend_from_slice(bytes);
                    Ok(Step::Advanced)
                } else if src.is_eof() {
                    self.state = State::Accept;
                    Ok(Step::Advanced)
                } else {
                    Ok(Step::NeedMore)
                }
            }
            BodyFormat::Length => {
                if self.content_length == 0 {
                    self.state = State::Accept;
                    return Ok(Step::Advanced);
                }
                if src.is_empty() {
                    return Ok(Step::NeedMore);
                }
                let taken = src.take_up_to(self.content_length);
                self.content_length -= taken.len();
                self.message.body.extend_from_slice(taken);
                if self.content_length == 0 {
                    self.state = State::Accept;
                }
                Ok(Step::Advanced)
            }
            BodyFormat::Chunked => self.put_chunk(src),
        }
    }

    /// chunked ボディの1単位を消費
    ///
    /// `content_length == 0` のときはチャンクヘッダー行を読み、
    /// 行そのもの + `\n` をボディへ追記してから 16 進サイズを解釈します。
    /// サイズ 0 で ACCEPT、それ以外は末尾 CRLF を含めた
    /// `size + 2` バイトをデータとして追記します。
    fn put_chunk(&mut self, src: &mut ByteSource) -> Result<Step, ParseError> {
        if self.content_length == 0 {
            let line = match src.next_line() {
                Some(line) => line,
                None => return Ok(Step::NeedMore),
            };
            self.message.body.extend_from_slice(&line);
            self.message.body.push(b'\n');
            let size = parse_chunk_size(&line)?;
            if size == 0 {
                self.state = State::Accept;
            } else {
                self.content_length = size + 2;
            }
            Ok(Step::Advanced)
        } else {
            if src.is_empty() {
                return Ok(Step::NeedMore);
            }
            let taken = src.take_up_to(self.content_length);
            self.content_length -= taken.len();
            self.message.body.extend_from_slice(taken);
            Ok(Step::Advanced)
        }
    }

    /// メッセージがボディを持つか
    ///
    /// スタートラインの第1フィールドが HTTP バージョンならレスポンス:
    /// ステータス 1xx, 204, 304 以外はボディあり。
    /// それ以外はリクエスト: フレーミングヘッダーが示した場合のみ。
    fn has_body(&self) -> Result<bool, ParseError> {
        let first = &self.message.start_line[0];
        if first == "HTTP/1.0" || first == "HTTP/1.1" {
            let status = &self.message.start_line[1];
            if status.len() != 3 {
                return Err(ParseError::new("invalid status code"));
            }
            Ok(!(status.starts_with('1') || status == "204" || status == "304"))
        } else {
            Ok((self.format == BodyFormat::Length && self.content_length > 0)
                || self.format == BodyFormat::Chunked)
        }
    }
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

fn as_text(line: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(line).map_err(|_| ParseError::new("invalid byte in header"))
}

/// チャンクヘッダー行の先頭から 16 進サイズを読む
///
/// 最初の非 16 進文字で読み取りを打ち切るため、`;` 以降の
/// チャンク拡張は無視されます。
fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let mut size: usize = 0;
    let mut digits = 0;
    for &byte in line {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => break,
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(usize::from(digit)))
            .ok_or(ParseError::new("invalid chunk size"))?;
        digits += 1;
    }
    if digits == 0 {
        return Err(ParseError::new("invalid chunk size"));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(bytes: &[u8], eof: bool) -> ByteSource {
        let mut src = ByteSource::new();
        src.extend(bytes);
        if eof {
            src.set_eof();
        }
        src
    }

    fn parse_all(bytes: &[u8]) -> HttpParser {
        let mut src = source(bytes, true);
        let mut parser = HttpParser::new();
        parser.parse(&mut src).unwrap();
        parser
    }

    #[test]
    fn test_response_with_content_length() {
        let parser = parse_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n1234567890");
        assert_eq!(parser.state(), State::Accept);
        let msg = parser.message();
        assert_eq!(msg.start_line[0], "HTTP/1.1");
        assert_eq!(msg.start_line[1], "200");
        assert_eq!(msg.start_line[2], "OK");
        assert_eq!(msg.headers.len(), 1);
        assert_eq!(msg.headers[0].key, "Content-Length");
        assert_eq!(msg.headers[0].value, "10");
        assert_eq!(msg.body, b"1234567890");
    }

    #[test]
    fn test_request_without_body() {
        let parser = parse_all(b"GET http://origin/x HTTP/1.1\r\nHost: origin\r\n\r\n");
        assert_eq!(parser.state(), State::Accept);
        assert_eq!(parser.message().start_line[1], "http://origin/x");
        assert!(parser.message().body.is_empty());
    }

    #[test]
    fn test_reason_phrase_with_space() {
        // 第3フィールドは空白を含んでよい
        let parser = parse_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(parser.message().start_line[2], "Not Found");
        assert_eq!(parser.state(), State::Accept);
    }

    #[test]
    fn test_header_keys_canonicalized() {
        let parser = parse_all(b"HTTP/1.1 204 No Content\r\ncONTENT-lENGTH: 0\r\nETAG: \"x\"\r\n\r\n");
        assert_eq!(parser.message().headers[0].key, "Content-Length");
        assert_eq!(parser.message().headers[1].key, "Etag");
    }

    #[test]
    fn test_duplicate_headers_kept_in_order() {
        let parser =
            parse_all(b"GET / HTTP/1.1\r\nVia: a\r\nVia: b\r\n\r\n");
        let keys: Vec<_> = parser.message().headers.iter().map(|h| h.value.clone()).collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn test_value_whitespace_trimmed() {
        let parser = parse_all(b"GET / HTTP/1.1\r\nHost:   example.com \t\r\n\r\n");
        assert_eq!(parser.message().header("Host"), Some("example.com"));
    }

    #[test]
    fn test_start_line_too_few_fields() {
        let mut src = source(b"GARBAGE\r\n\r\n", true);
        let mut parser = HttpParser::new();
        assert!(parser.parse(&mut src).is_err());
    }

    #[test]
    fn test_space_before_colon_rejected() {
        let mut src = source(b"GET / HTTP/1.1\r\nHost : example.com\r\n\r\n", true);
        let mut parser = HttpParser::new();
        assert!(parser.parse(&mut src).is_err());
    }

    #[test]
    fn test_header_without_colon_rejected() {
        let mut src = source(b"GET / HTTP/1.1\r\nnonsense\r\n\r\n", true);
        let mut parser = HttpParser::new();
        assert!(parser.parse(&mut src).is_err());
    }

    #[test]
    fn test_content_length_zero_accepts_at_header_end() {
        let parser = parse_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(parser.state(), State::Accept);
        assert!(parser.message().body.is_empty());
    }

    #[test]
    fn test_status_body_rules() {
        // 1xx, 204, 304 はボディなし、200 はあり
        for (head, has_body) in [
            ("HTTP/1.1 199 Whatever", false),
            ("HTTP/1.1 204 No Content", false),
            ("HTTP/1.1 304 Not Modified", false),
            ("HTTP/1.1 200 OK", true),
        ] {
            let raw = format!("{}\r\n\r\nrest", head);
            let mut src = source(raw.as_bytes(), true);
            let mut parser = HttpParser::new();
            parser.parse(&mut src).unwrap();
            assert_eq!(parser.state(), State::Accept, "{}", head);
            assert_eq!(!parser.message().body.is_empty(), has_body, "{}", head);
        }
    }

    #[test]
    fn test_invalid_status_code_rejected() {
        let mut src = source(b"HTTP/1.1 20 OK\r\n\r\n", true);
        let mut parser = HttpParser::new();
        assert!(parser.parse(&mut src).is_err());
    }

    #[test]
    fn test_plain_body_reads_to_eof() {
        let parser = parse_all(b"HTTP/1.1 200 OK\r\n\r\nsome plain body");
        assert_eq!(parser.state(), State::Accept);
        assert_eq!(parser.format(), BodyFormat::Plain);
        assert_eq!(parser.message().body, b"some plain body");
    }

    #[test]
    fn test_chunked_body_kept_verbatim() {
        // チャンクフレーミングはデコードせずそのまま蓄積される
        let parser = parse_all(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        assert_eq!(parser.state(), State::Accept);
        assert_eq!(parser.format(), BodyFormat::Chunked);
        assert_eq!(parser.message().body, b"5\r\nhello\r\n0\r\n");
    }

    #[test]
    fn test_chunked_single_zero_chunk() {
        let parser = parse_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n");
        assert_eq!(parser.state(), State::Accept);
        assert_eq!(parser.message().body, b"0\r\n");
    }

    #[test]
    fn test_chunk_extension_ignored() {
        let parser = parse_all(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n0\r\n\r\n",
        );
        assert_eq!(parser.state(), State::Accept);
        assert_eq!(parser.message().body, b"5;ext=1\r\nhello\r\n0\r\n");
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let mut src = source(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n",
            true,
        );
        let mut parser = HttpParser::new();
        assert!(parser.parse(&mut src).is_err());
    }

    #[test]
    fn test_chunked_wins_over_content_length() {
        for raw in [
            // どちらの順でも chunked が勝つ
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n".as_slice(),
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Length: 5\r\n\r\n0\r\n\r\n".as_slice(),
        ] {
            let mut src = source(raw, true);
            let mut parser = HttpParser::new();
            parser.parse(&mut src).unwrap();
            assert_eq!(parser.format(), BodyFormat::Chunked);
            assert!(parser.conflicting_framing());
            assert_eq!(parser.state(), State::Accept);
        }
    }

    #[test]
    fn test_request_with_content_length_body() {
        let parser = parse_all(b"POST /submit HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody");
        assert_eq!(parser.state(), State::Accept);
        assert_eq!(parser.message().body, b"body");
    }

    #[test]
    fn test_incremental_feeding() {
        // 途中まで与えて NeedMore、続きを与えて完了
        let mut src = ByteSource::new();
        let mut parser = HttpParser::new();
        src.extend(b"HTTP/1.1 200 OK\r\nContent-Le");
        parser.parse(&mut src).unwrap();
        assert_eq!(parser.state(), State::Header);
        src.extend(b"ngth: 3\r\n\r\nab");
        parser.parse(&mut src).unwrap();
        assert_eq!(parser.state(), State::Body);
        src.extend(b"c");
        parser.parse(&mut src).unwrap();
        assert_eq!(parser.state(), State::Accept);
        assert_eq!(parser.message().body, b"abc");
    }

    #[test]
    fn test_states_advance_monotonically() {
        let mut src = source(
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc",
            true,
        );
        let mut parser = HttpParser::new();
        let mut last = parser.state();
        while parser.state() != State::Accept {
            parser.parse_step(&mut src).unwrap();
            assert!(parser.state() >= last);
            last = parser.state();
        }
    }

    #[test]
    fn test_reset_clears_message() {
        let mut parser = parse_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc");
        parser.reset();
        assert_eq!(parser.state(), State::Start);
        assert_eq!(parser.format(), BodyFormat::Plain);
        assert_eq!(parser.content_length(), 0);
        assert!(parser.message().start_line.iter().all(|s| s.is_empty()));
        assert!(parser.message().headers.is_empty());
        assert!(parser.message().body.is_empty());
    }

    #[test]
    fn test_serialize_reparse_roundtrip() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\nDate: Wed, 28 Feb 2018 20:51:55 GMT\r\nContent-Length: 3\r\n\r\nabc";
        let first = parse_all(raw);
        let serialized = first.message().to_bytes();
        let second = parse_all(&serialized);
        assert_eq!(first.message(), second.message());
        assert_eq!(serialized, raw);
    }

    #[test]
    fn test_truncated_length_body_stays_in_body_state() {
        let mut src = source(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc", true);
        let mut parser = HttpParser::new();
        parser.parse(&mut src).unwrap();
        assert_eq!(parser.state(), State::Body);
        assert_eq!(parser.message().body, b"abc");
    }
}
