//! サーバー本体
//!
//! 固定4本のワーカースレッドを起動し、各スレッドが自分の monoio
//! ランタイムと SO_REUSEPORT リスナーを持って accept ループを回します。
//! accept には1秒のタイムアウトを掛け、シャットダウンフラグを
//! 定期的に確認します。
//!
//! キャッシュ・トレースログ・ID カウンタは [`ProxyShared`] にまとめ、
//! `Arc` で全タスクへ配ります（プロセスグローバルにはしない）。

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ftlog::{error, info};
use monoio::net::{ListenerConfig, TcpListener};
use monoio::time::timeout;
use monoio::RuntimeBuilder;

use crate::cache::Cache;
use crate::config::Config;
use crate::conn::client::handle_client;
use crate::logger::{SyncLog, NO_ID};

/// ワーカースレッド数
pub const WORKER_THREADS: usize = 4;

/// 全タスクが共有する状態
///
/// キャッシュはスロット単位のロック、ログは行単位のロック、
/// ID カウンタとシャットダウンフラグはアトミックで保護されます。
/// これ以外にタスク間で共有される状態はありません。
pub struct ProxyShared {
    pub cache: Cache,
    pub log: SyncLog,
    id_counter: AtomicU64,
    shutdown: AtomicBool,
}

impl ProxyShared {
    pub fn new(cache: Cache, log: SyncLog) -> Self {
        Self {
            cache,
            log,
            id_counter: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// リクエスト ID を採番する（0 は「ID なし」の予約値なので 1 始まり）
    pub fn new_id(&self) -> u64 {
        self.id_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// グレースフルシャットダウンを要求する
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// プロキシサーバー
pub struct Server {
    listen_addr: SocketAddr,
    shared: Arc<ProxyShared>,
}

impl Server {
    pub fn new(config: &Config, log: SyncLog) -> io::Result<Self> {
        let listen_addr = config.server.listen.parse::<SocketAddr>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid listen address {}: {}", config.server.listen, e),
            )
        })?;
        let cache = Cache::new(config.cache.entries);
        Ok(Self {
            listen_addr,
            shared: Arc::new(ProxyShared::new(cache, log)),
        })
    }

    pub fn shared(&self) -> Arc<ProxyShared> {
        self.shared.clone()
    }

    /// ワーカーを起動し、シャットダウンまでブロックする
    pub fn run(&self) {
        self.shared.log.note(NO_ID, "server started");

        let mut handles = Vec::with_capacity(WORKER_THREADS);
        for thread_id in 0..WORKER_THREADS {
            let addr = self.listen_addr;
            let shared = self.shared.clone();
            handles.push(thread::spawn(move || worker(thread_id, addr, shared)));
        }
        for handle in handles {
            let _ = handle.join();
        }

        self.shared.log.note(NO_ID, "server exited");
    }
}

fn worker(thread_id: usize, addr: SocketAddr, shared: Arc<ProxyShared>) {
    let mut rt = RuntimeBuilder::<monoio::FusionDriver>::new()
        .enable_timer()
        .build()
        .expect("Failed to create runtime");
    rt.block_on(async move {
        let listener = match create_listener(addr) {
            Ok(listener) => listener,
            Err(e) => {
                error!("[Thread {}] Bind error: {}", thread_id, e);
                return;
            }
        };

        info!("[Thread {}] Worker started", thread_id);

        loop {
            if shared.is_shutdown() {
                info!("[Thread {}] Shutting down...", thread_id);
                break;
            }

            // タイムアウト付き accept（シャットダウンフラグ確認のため）
            let accept_result = timeout(Duration::from_secs(1), listener.accept()).await;

            let (stream, peer_addr) = match accept_result {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    error!("[Thread {}] Accept error: {}", thread_id, e);
                    continue;
                }
                Err(_) => continue,
            };

            let _ = stream.set_nodelay(true);

            let shared = shared.clone();
            monoio::spawn(async move {
                handle_client(stream, peer_addr, shared).await;
            });
        }

        info!("[Thread {}] Worker stopped", thread_id);
    });
}

fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let config = ListenerConfig::default().reuse_port(true).backlog(1024);
    TcpListener::bind_with_config(addr, &config)
}
