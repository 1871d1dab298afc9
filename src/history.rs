//! コマンド履歴の管理。
//!
//! 受理したコマンド行をインメモリのリングバッファに保持する。
//! 永続化はしない（シェル終了とともに消える）。
//!
//! - 最大エントリ数: 1000（超過時は古いエントリから削除）
//! - 空行は追加しない
//! - 直前と同一のコマンドは追加しない（連続重複排除）
//!
//! `history` ビルトインが 1 始まりの番号付きで一覧表示する。

/// コマンド履歴。
pub struct History {
    /// 履歴エントリのリスト（古い順）。
    entries: Vec<String>,
    /// 保持する最大エントリ数。
    max_size: usize,
}

impl History {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_size: 1000,
        }
    }

    /// エントリを追加する。空行・直前との重複はスキップ。
    pub fn add(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if self.entries.last().map_or(false, |last| last == line) {
            return;
        }
        self.entries.push(line.to_string());
        if self.entries.len() > self.max_size {
            self.entries.remove(0);
        }
    }

    /// 全エントリのイテレータ（古い順）。
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
