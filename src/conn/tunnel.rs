//! CONNECT トンネル
//!
//! クライアントとオリジンの両ソケットを引き取り、双方向に不透明な
//! バイト列を中継します。ペイロードの解釈もログ出力も行いません。
//! どちらかの方向でエラーまたは EOF が起きた時点で両ソケットを閉じ、
//! もう片方の進行中の操作はドロップで取り消されます。

use std::sync::Arc;

use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, Splitable};
use monoio::net::TcpStream;

use crate::server::ProxyShared;

const TUNNEL_BUF_SIZE: usize = 16 * 1024;

/// 確立済みのトンネルを閉塞まで運転する
pub async fn run(client: TcpStream, remote: TcpStream, id: u64, shared: &Arc<ProxyShared>) {
    shared.log.note(id, "Tunnel established");

    let (client_read, client_write) = client.into_split();
    let (remote_read, remote_write) = remote.into_split();

    // 先に終わった方向に合わせて全ハーフをドロップし、両方向を閉じる
    monoio::select! {
        _ = relay(client_read, remote_write) => {}
        _ = relay(remote_read, client_write) => {}
    }

    shared.log.trace(id, "Tunnel closed");
}

/// 片方向の中継ループ
///
/// 読み込めたバイトをそのまま書き切り、読み込みを再装填します。
async fn relay<R, W>(mut from: R, mut to: W)
where
    R: AsyncReadRent,
    W: AsyncWriteRent,
{
    let mut buf = vec![0u8; TUNNEL_BUF_SIZE];
    loop {
        let (res, read_buf) = from.read(buf).await;
        let n = match res {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let mut data = read_buf;
        data.truncate(n);
        let (res, written) = to.write_all(data).await;
        if res.is_err() {
            return;
        }
        buf = written;
        buf.clear();
        buf.resize(TUNNEL_BUF_SIZE, 0);
    }
}
