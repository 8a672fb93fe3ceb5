//! オリジン側半接続
//!
//! リクエストURIを分解してオリジンへ接続し、リクエストを転送、
//! レスポンスを読み取ってクライアントへ書き戻します。そのうえで
//! キャッシュ可否を判定し、格納まで行います。CONNECT の場合は
//! 接続確立後にソケットをトンネルへ引き渡します。

use std::io;
use std::sync::Arc;

use monoio::net::TcpStream;
use time::OffsetDateTime;

use crate::cache::CacheItem;
use crate::http::{
    format_trace_time, ByteSource, HttpMessage, HttpParser, HttpUrl, ResponseCacheInfo,
};
use crate::server::ProxyShared;

use super::{
    is_http1, read_message, write_all, ReadError, ReadOutcome, HTTP_200_OK, HTTP_502_BAD_GATEWAY,
};

/// キャッシュに入れるボディサイズの上限（これを超えると保存しない）
const MAX_CACHEABLE_BODY_SIZE: usize = 2 * 1024 * 1024;

/// オリジン側処理の結果
pub enum RemoteOutcome {
    /// 応答を書き終えた。クライアント接続は次のリクエストを待ってよい
    Responded,
    /// 502 を応答した。クライアント接続も閉じる
    Closed,
    /// CONNECT が成立した。両ソケットをトンネルへ
    Tunneled(TcpStream),
}

/// 1リクエスト分のオリジン側処理を実行する
///
/// 戻り値の `Err` はクライアントソケットへの書き込み失敗で、
/// 呼び出し側が接続を閉じます。
pub async fn run(
    client: &mut TcpStream,
    request: &mut HttpMessage,
    id: u64,
    shared: &Arc<ProxyShared>,
) -> io::Result<RemoteOutcome> {
    // リクエストURIを分解し、オリジンへは origin-form で転送する
    let request_url = request.start_line[1].clone();
    let url = match HttpUrl::parse(&request_url) {
        Ok(url) => url,
        Err(e) => {
            shared.log.error(id, e.reason());
            return respond_502(client, shared, id).await;
        }
    };
    request.start_line[1] = url.path.clone();
    let request_host = url.host.clone();

    let addr = format!("{}:{}", url.host, url.port);
    let remote = match TcpStream::connect(&addr).await {
        Ok(stream) => {
            let _ = stream.set_nodelay(true);
            stream
        }
        Err(e) => {
            shared
                .log
                .error(id, &format!("cannot connect to {}: {}", addr, e));
            return respond_502(client, shared, id).await;
        }
    };

    if request.start_line[0] == "CONNECT" {
        shared.log.trace(id, "Responding \"HTTP/1.1 200 OK\"");
        write_all(client, HTTP_200_OK.to_vec()).await?;
        return Ok(RemoteOutcome::Tunneled(remote));
    }

    fetch(client, remote, request, &request_url, &request_host, id, shared).await
}

/// リクエストを転送してレスポンスを中継し、キャッシュ格納まで行う
async fn fetch(
    client: &mut TcpStream,
    mut remote: TcpStream,
    request: &mut HttpMessage,
    request_url: &str,
    request_host: &str,
    id: u64,
    shared: &Arc<ProxyShared>,
) -> io::Result<RemoteOutcome> {
    let request_time = OffsetDateTime::now_utc();
    shared.log.trace(
        id,
        &format!(
            "Requesting \"{}\" from {}",
            request.start_line_str(),
            request_host
        ),
    );
    if let Err(e) = write_all(&mut remote, request.to_bytes()).await {
        shared.log.error(id, &e.to_string());
        return respond_502(client, shared, id).await;
    }

    let mut src = ByteSource::new();
    let mut parser = HttpParser::new();
    match read_message(&mut remote, &mut src, &mut parser).await {
        Ok(ReadOutcome::Complete) => {}
        Ok(ReadOutcome::Truncated) => {
            // LENGTH / CHUNKED ボディ途中の EOF。不完全なまま届ける
            shared.log.error(id, "truncated response body");
        }
        Err(ReadError::Closed) => {
            shared.log.error(id, "incomplete response.");
            return respond_502(client, shared, id).await;
        }
        Err(ReadError::Parse(e)) => {
            shared.log.error(id, e.reason());
            return respond_502(client, shared, id).await;
        }
        Err(ReadError::Io(e)) => {
            shared.log.error(id, &e.to_string());
            return respond_502(client, shared, id).await;
        }
    }

    if parser.conflicting_framing() {
        shared.log.note(
            id,
            "both Content-Length and Transfer-Encoding present, assuming chunked",
        );
    }

    // レスポンスの第1フィールドがプロトコル
    if !is_http1(&parser.message().start_line[0]) {
        shared.log.error(id, "unsupported protocol");
        return respond_502(client, shared, id).await;
    }

    let response_time = OffsetDateTime::now_utc();
    shared.log.trace(
        id,
        &format!(
            "Received \"{}\" from {}",
            parser.message().start_line_str(),
            request_host
        ),
    );

    shared.log.trace(
        id,
        &format!("Responding \"{}\"", parser.message().start_line_str()),
    );
    write_all(client, parser.message().to_bytes()).await?;

    let method = request.start_line[0].clone();
    let status = parser.message().start_line[1].clone();
    let response = parser.into_message();
    if let Some(info) = check_cacheable(&method, &status, &response, request_time, response_time, id, shared)
    {
        store_cache(request_url, &status, response, info, response_time, id, shared);
    }

    Ok(RemoteOutcome::Responded)
}

async fn respond_502(
    client: &mut TcpStream,
    shared: &Arc<ProxyShared>,
    id: u64,
) -> io::Result<RemoteOutcome> {
    shared
        .log
        .trace(id, "Responding \"HTTP/1.1 502 Bad Gateway\"");
    write_all(client, HTTP_502_BAD_GATEWAY.to_vec()).await?;
    Ok(RemoteOutcome::Closed)
}

/// レスポンスが保存対象か判定する
///
/// 条件: リクエストが GET、ステータスが 200 または 304、ボディが
/// 上限以下、Date ヘッダーが存在し評価に成功、no-store / private が
/// 立っていない。満たさない場合は理由をログに残します。
fn check_cacheable(
    method: &str,
    status: &str,
    response: &HttpMessage,
    request_time: OffsetDateTime,
    response_time: OffsetDateTime,
    id: u64,
    shared: &ProxyShared,
) -> Option<ResponseCacheInfo> {
    if method != "GET" {
        shared.log.trace(
            id,
            &format!("not cachable because request method is {}", method),
        );
        return None;
    }
    if status != "200" && status != "304" {
        shared.log.trace(
            id,
            &format!("not cachable because status code is {}", status),
        );
        return None;
    }
    if response.body.len() > MAX_CACHEABLE_BODY_SIZE {
        shared.log.trace(
            id,
            &format!(
                "not cachable because body size is larger than {}",
                MAX_CACHEABLE_BODY_SIZE
            ),
        );
        return None;
    }
    let info = match ResponseCacheInfo::from_message(response, request_time, response_time) {
        Some(info) => info,
        None => {
            shared.log.trace(
                id,
                "not cachable because the response does not have a Date field",
            );
            return None;
        }
    };
    if info.no_store || info.private {
        shared.log.trace(
            id,
            "not cachable because no-store and/or private is set in Cache-Control",
        );
        return None;
    }
    Some(info)
}

/// レスポンスをキャッシュへ格納する
///
/// 200 はスロットを丸ごと上書き。304 はスロットのキーが一致する
/// 場合のみ、保存済みボディを残してヘッダーと鮮度情報を差し替えます
/// （スロットが別 URL に奪われていたら格納しない）。
fn store_cache(
    request_url: &str,
    status: &str,
    response: HttpMessage,
    info: ResponseCacheInfo,
    response_time: OffsetDateTime,
    id: u64,
    shared: &ProxyShared,
) {
    let stored = {
        let mut accessor = shared.cache.accessor(request_url);
        if status == "200" {
            accessor.set(Arc::new(CacheItem {
                message: response,
                info: info.clone(),
            }));
            true
        } else {
            let (slot_key, value) = accessor.get();
            let key_matches = slot_key == request_url;
            match value {
                Some(previous) if key_matches => {
                    // 304 のヘッダーで丸ごと差し替える（マージしない）
                    let message = HttpMessage {
                        start_line: previous.message.start_line.clone(),
                        headers: response.headers,
                        body: previous.message.body.clone(),
                    };
                    accessor.set(Arc::new(CacheItem {
                        message,
                        info: info.clone(),
                    }));
                    true
                }
                _ => false,
            }
        }
    };

    if !stored {
        shared.log.trace(
            id,
            "not cachable because the response is 304 and previous cache does not exist",
        );
        return;
    }

    if info.no_cache {
        shared.log.trace(id, "cached, but requires re-validation");
    } else {
        let expire = response_time + info.freshness_lifetime;
        shared.log.trace(
            id,
            &format!("cached, expires at {}", format_trace_time(expire)),
        );
    }
}
