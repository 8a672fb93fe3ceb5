//! クライアント側半接続
//!
//! 接続を受け付け、リクエストをパースし、キャッシュを照会して、
//! キャッシュ応答・オリジン転送・CONNECT トンネルのいずれかに
//! 振り分けます。1接続で複数リクエストを順に処理でき（keep-alive）、
//! リクエストごとに新しい ID が割り当てられます。

use std::net::SocketAddr;
use std::sync::Arc;

use monoio::net::TcpStream;
use time::OffsetDateTime;

use crate::cache::CacheItem;
use crate::http::{
    format_http_date, format_trace_time, ByteSource, HttpParser, RequestCacheInfo,
};
use crate::server::ProxyShared;

use super::remote::{self, RemoteOutcome};
use super::{
    is_http1, read_message, tunnel, write_all, ReadError, ReadOutcome, HTTP_400_INVALID_REQUEST,
};

/// 1クライアント接続を処理する
pub async fn handle_client(mut stream: TcpStream, peer: SocketAddr, shared: Arc<ProxyShared>) {
    let mut src = ByteSource::new();
    let mut parser = HttpParser::new();

    loop {
        parser.reset();
        let id = shared.new_id();

        match read_message(&mut stream, &mut src, &mut parser).await {
            Ok(ReadOutcome::Complete) => {}
            Ok(ReadOutcome::Truncated) | Err(ReadError::Closed) => {
                shared.log.note(id, "connection closed");
                return;
            }
            Err(ReadError::Parse(e)) => {
                shared.log.error(id, e.reason());
                let _ = write_all(&mut stream, HTTP_400_INVALID_REQUEST.to_vec()).await;
                return;
            }
            Err(ReadError::Io(e)) => {
                shared.log.error(id, &e.to_string());
                return;
            }
        }

        if parser.conflicting_framing() {
            shared.log.note(
                id,
                "both Content-Length and Transfer-Encoding present, assuming chunked",
            );
        }

        // リクエストの第3フィールドがプロトコル
        if !is_http1(&parser.message().start_line[2]) {
            shared.log.error(id, "unsupported protocol");
            let _ = write_all(&mut stream, HTTP_400_INVALID_REQUEST.to_vec()).await;
            return;
        }

        shared.log.trace(
            id,
            &format!(
                "\"{}\" from {} @ {}",
                parser.message().start_line_str(),
                peer.ip(),
                format_trace_time(OffsetDateTime::now_utc())
            ),
        );

        let tunneling = parser.message().start_line[0] == "CONNECT";
        let request_info = RequestCacheInfo::from_message(parser.message());

        let mut cached = None;
        if parser.message().start_line[0] == "GET" {
            let url = &parser.message().start_line[1];
            let accessor = shared.cache.accessor(url);
            let (slot_key, value) = accessor.get();
            if slot_key != url || value.is_none() {
                shared.log.trace(id, "not in cache");
            } else {
                cached = value;
            }
        }

        if let Some(item) = cached.take() {
            if check_cached(&item, &request_info, id, &shared) {
                shared.log.trace(
                    id,
                    &format!("Responding \"{}\"", item.message.start_line_str()),
                );
                if let Err(e) = write_all(&mut stream, item.message.to_bytes()).await {
                    shared.log.error(id, &e.to_string());
                    return;
                }
                continue;
            }
            // 再検証: キャッシュのバリデータを付けてオリジンへ
            let message = parser.message_mut();
            if let Some(last_modified) = item.info.last_modified {
                message.replace_header("If-Modified-Since", &format_http_date(last_modified));
            }
            if !item.info.etag.is_empty() {
                message.replace_header("If-None-Match", &item.info.etag);
            }
        } else if !tunneling {
            // ブラウザ由来のバリデータは転送しない。キャッシュに無い
            // ものに対して 304 を受け取っても返しようがない。
            parser
                .message_mut()
                .remove_headers(&["If-Modified-Since", "If-None-Match"]);
        }

        match remote::run(&mut stream, parser.message_mut(), id, &shared).await {
            Ok(RemoteOutcome::Responded) => continue,
            Ok(RemoteOutcome::Closed) => return,
            Ok(RemoteOutcome::Tunneled(remote_stream)) => {
                tunnel::run(stream, remote_stream, id, &shared).await;
                return;
            }
            Err(e) => {
                // クライアントへの書き込み失敗
                shared.log.error(id, &e.to_string());
                return;
            }
        }
    }
}

/// キャッシュ済みレスポンスがそのまま使えるか判定する
///
/// `no-cache`（リクエスト側・レスポンス側いずれか）または期限切れなら
/// false を返し、呼び出し側が再検証リクエストを送ります。
fn check_cached(
    item: &CacheItem,
    request_info: &RequestCacheInfo,
    id: u64,
    shared: &ProxyShared,
) -> bool {
    if request_info.no_cache || item.info.no_cache {
        shared.log.trace(id, "in cache, requires validation");
        return false;
    }
    let current_age = item.info.current_age();
    let lifetime = item.info.freshness_lifetime;
    if current_age >= lifetime {
        let expire_time = OffsetDateTime::now_utc() - current_age + lifetime;
        shared.log.trace(
            id,
            &format!("in cache, but expired at {}", format_trace_time(expire_time)),
        );
        return false;
    }
    shared.log.trace(id, "in cache, valid");
    true
}
