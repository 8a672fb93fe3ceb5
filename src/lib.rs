//! # kiri
//!
//! キャッシュ機能付き CONNECT 対応 HTTP/1.x フォワードプロキシ。
//!
//! クライアントからの TCP 接続を受け付け、HTTP リクエストをパースし、
//! GET はインメモリレスポンスキャッシュ（RFC 7234 準拠の鮮度判定）から
//! 応答、それ以外はオリジンサーバへ転送します。`CONNECT` メソッドに
//! 対しては `200 OK` 応答後に双方向のバイトトンネルを確立します。
//!
//! ## アーキテクチャ
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Server (4 worker threads, monoio runtime)   │
//! │  ├─ conn::client  クライアント側半接続        │
//! │  ├─ conn::remote  オリジン側半接続            │
//! │  ├─ conn::tunnel  CONNECT トンネル            │
//! │  ├─ cache         スロット分割キャッシュ      │
//! │  └─ logger        同期化トレースログ          │
//! └──────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod conn;
pub mod http;
pub mod logger;
pub mod server;
