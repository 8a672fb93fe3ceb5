//! レスポンスキャッシュ
//!
//! 固定長のダイレクトマップ方式。スロットごとにミューテックスを持ち、
//! グローバルロックなしで全ワーカースレッドから共有されます。
//! スロット衝突時は書き込みが先住エントリを上書きし、読み出しは
//! キー不一致としてミス扱いになります。TTL はキャッシュ自体には無く、
//! 鮮度は読み出し側が [`ResponseCacheInfo`] で判定します。

use std::sync::{Arc, Mutex, MutexGuard};

use xxhash_rust::xxh3::xxh3_64;

use crate::http::{HttpMessage, ResponseCacheInfo};

/// キャッシュに保存される1エントリ
///
/// `Arc` で共有され、更新はスロット単位の差し替えで行います
/// （共有ポインタ越しの書き換えはしない）。
#[derive(Debug)]
pub struct CacheItem {
    pub message: HttpMessage,
    pub info: ResponseCacheInfo,
}

#[derive(Debug, Default)]
struct Slot {
    key: String,
    value: Option<Arc<CacheItem>>,
}

/// スロット分割キャッシュ
#[derive(Debug)]
pub struct Cache {
    slots: Vec<Mutex<Slot>>,
}

impl Cache {
    /// スロット数を指定して構築（以後固定）
    pub fn new(entries: usize) -> Self {
        let entries = entries.max(1);
        let mut slots = Vec::with_capacity(entries);
        slots.resize_with(entries, Mutex::default);
        Self { slots }
    }

    /// キーに対応するスロットをロックしてアクセサを得る
    ///
    /// ロックはアクセサのドロップで解放されます。1スロットに対する
    /// 操作は常に直列化され、別スロット同士は並行に進みます。
    pub fn accessor<'a>(&'a self, key: &'a str) -> Accessor<'a> {
        let index = (xxh3_64(key.as_bytes()) % self.slots.len() as u64) as usize;
        let guard = self.slots[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Accessor { guard, key }
    }
}

/// 1スロットをロックした状態のアクセサ
pub struct Accessor<'a> {
    guard: MutexGuard<'a, Slot>,
    key: &'a str,
}

impl Accessor<'_> {
    /// スロットの現在のキーと値を取得
    ///
    /// ダイレクトマップのため、返ったキーがアクセサのキーと一致して
    /// 初めてヒットです。不一致は別 URL との衝突を意味します。
    pub fn get(&self) -> (&str, Option<Arc<CacheItem>>) {
        (&self.guard.key, self.guard.value.clone())
    }

    /// スロットのキーと値を上書き
    pub fn set(&mut self, value: Arc<CacheItem>) {
        self.guard.key = self.key.to_string();
        self.guard.value = Some(value);
    }
}
