//! テスト用共通ヘルパーモジュール
//!
//! 統合テストで使用するモックオリジンサーバーとプロキシ起動補助を
//! 提供します。すべて std::net のブロッキングソケットとスレッドで
//! 動作し、外部環境を必要としません。

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

use kiri::config::Config;
use kiri::logger::SyncLog;
use kiri::server::{ProxyShared, Server};

/// ftlog をプロセスごとに1回だけ初期化する
///
/// ガードをドロップするとロガーが停止してしまうため forget する。
pub fn init_test_logging() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        if let Ok(guard) = ftlog::Builder::new().try_init() {
            std::mem::forget(guard);
        }
    });
}

/// 動的に空きポートを取得
pub fn get_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// 受信したバイトをそのまま返すエコーサーバー（CONNECT トンネル検証用）
pub struct EchoServer {
    addr: SocketAddr,
}

impl EchoServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
        Self { addr }
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }
}

/// リクエストヘッダーを見てレスポンスを組み立てるモックオリジン
///
/// 1接続1リクエストで応答後に接続を閉じます。受けたリクエスト数を
/// 数えるので、プロキシがキャッシュから応答したかを検証できます。
pub struct OriginServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl OriginServer {
    pub fn start<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let responder = Arc::new(responder);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                hits_clone.fetch_add(1, Ordering::SeqCst);
                let responder = responder.clone();
                thread::spawn(move || {
                    if let Ok(head) = read_until_blank_line(&mut stream) {
                        let response = responder(&head);
                        let _ = stream.write_all(&response);
                    }
                });
            }
        });
        Self { addr, hits }
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// これまでに受けたリクエスト数
    pub fn request_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn read_until_blank_line(stream: &mut TcpStream) -> io::Result<String> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// トレースログの内容をテストから参照するための共有バッファ
#[derive(Clone, Default)]
pub struct SharedLogBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedLogBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// バックグラウンドで動作中のプロキシ
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shared: Arc<ProxyShared>,
    log: SharedLogBuf,
}

impl TestProxy {
    /// プロキシを起動し、接続可能になるまで待つ
    pub fn start(cache_entries: usize) -> Self {
        init_test_logging();
        let port = get_available_port();
        let mut config = Config::default();
        config.server.listen = format!("127.0.0.1:{}", port);
        config.cache.entries = cache_entries;

        let log = SharedLogBuf::default();
        let server = Server::new(&config, SyncLog::from_writer(Box::new(log.clone()))).unwrap();
        let shared = server.shared();
        thread::spawn(move || server.run());

        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        for _ in 0..100 {
            if TcpStream::connect(addr).is_ok() {
                return Self { addr, shared, log };
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("proxy did not start listening on {}", addr);
    }

    pub fn log_contents(&self) -> String {
        String::from_utf8_lossy(&self.log.0.lock().unwrap()).into_owned()
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shared.request_shutdown();
    }
}

/// プロキシへ1リクエストを送り、レスポンス全体を読み取る
///
/// レスポンスは Content-Length で終端判定します（無ければヘッダーのみ）。
pub fn send_request(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(raw).unwrap();
    read_response(&mut stream)
}

/// 接続済みストリームから1レスポンスを読み取る
pub fn read_response(stream: &mut TcpStream) -> Vec<u8> {
    let mut response = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = response.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return response,
            Ok(n) => response.extend_from_slice(&buf[..n]),
        }
    };

    let head = String::from_utf8_lossy(&response[..header_end]).into_owned();
    // 1xx / 204 / 304 は Content-Length があってもボディを持たない
    let status = head.split_whitespace().nth(1).unwrap_or("");
    let bodyless = status.starts_with('1') || status == "204" || status == "304";
    let content_length = if bodyless {
        0
    } else {
        head.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0)
    };

    while response.len() < header_end + content_length {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
        }
    }
    response
}
