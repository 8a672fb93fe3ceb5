//! 接続処理
//!
//! クライアント側半接続・オリジン側半接続・CONNECT トンネルと、
//! その共通部（メッセージ読み込みループ、定型応答）をまとめます。

pub mod client;
pub mod remote;
pub mod tunnel;

use std::io;

use monoio::io::{AsyncReadRent, AsyncWriteRentExt};
use monoio::net::TcpStream;

use crate::http::{ByteSource, HttpParser, ParseError, State, Step};

// 定型応答
pub(crate) static HTTP_200_OK: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";
pub(crate) static HTTP_400_INVALID_REQUEST: &[u8] =
    b"HTTP/1.1 400 Invalid Request\r\nContent-Length: 0\r\n\r\n";
pub(crate) static HTTP_502_BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n";

/// ソケット読み込みの単位
const READ_BUF_SIZE: usize = 16 * 1024;

/// メッセージ読み込みの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// ACCEPT まで到達した
    Complete,
    /// LENGTH / CHUNKED ボディの途中で EOF になった
    Truncated,
}

/// メッセージ読み込みの失敗
#[derive(Debug)]
pub(crate) enum ReadError {
    /// メッセージ完成前に接続が閉じた
    Closed,
    Parse(ParseError),
    Io(io::Error),
}

/// ソケットから1メッセージを読み込む
///
/// パーサーが `NeedMore` を返すたびにソケットから追加読み込みします。
/// PLAIN ボディは EOF が正常終了なので `Complete` になり、
/// LENGTH / CHUNKED の途中 EOF は `Truncated` として呼び出し側の
/// 判断に委ねます。
pub(crate) async fn read_message(
    stream: &mut TcpStream,
    src: &mut ByteSource,
    parser: &mut HttpParser,
) -> Result<ReadOutcome, ReadError> {
    loop {
        match parser.parse_step(src) {
            Ok(Step::Advanced) => {
                if parser.state() == State::Accept {
                    return Ok(ReadOutcome::Complete);
                }
            }
            Ok(Step::NeedMore) => {
                if src.is_eof() {
                    return if parser.state() == State::Body {
                        Ok(ReadOutcome::Truncated)
                    } else {
                        Err(ReadError::Closed)
                    };
                }
                let buf = vec![0u8; READ_BUF_SIZE];
                let (res, buf) = stream.read(buf).await;
                match res {
                    Ok(0) => src.set_eof(),
                    Ok(n) => src.extend(&buf[..n]),
                    Err(e) => return Err(ReadError::Io(e)),
                }
            }
            Err(e) => return Err(ReadError::Parse(e)),
        }
    }
}

/// バイト列をすべて書き出す
pub(crate) async fn write_all(stream: &mut TcpStream, data: Vec<u8>) -> io::Result<()> {
    let (res, _buf) = stream.write_all(data).await;
    res.map(|_| ())
}

/// HTTP/1.0 または HTTP/1.1 か
pub(crate) fn is_http1(protocol: &str) -> bool {
    protocol == "HTTP/1.0" || protocol == "HTTP/1.1"
}
