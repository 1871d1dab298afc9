//! 実行ファイル解決: コマンド名から実行すべき絶対/相対パスを決定する。
//!
//! - 名前に `/` を含む場合はそのパス自身を検証する
//! - 含まない場合は `PATH`（`:` 区切り、順序どおり）を走査し、
//!   最初に見つかった実行可能な通常ファイルを返す
//! - `PATH` が空・未設定なら見つからない
//!
//! 解決は状態を一切変更しない。「見つからない」(→ 127) と
//! 「見つかったが実行できない」(→ 126) を区別して返す。

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// 解決の失敗理由。終了ステータスへの対応は [`crate::spawn::SpawnError`] が持つ。
#[derive(Debug, PartialEq)]
pub enum ResolveError {
    /// コマンドが見つからない（exit 127 相当）。
    NotFound,
    /// パスは存在するが実行可能な通常ファイルではない（exit 126 相当）。
    NotExecutable,
}

/// コマンド名を実行ファイルのパスに解決する。
pub fn resolve(name: &str) -> Result<String, ResolveError> {
    if name.contains('/') {
        // 明示パス: PATH 検索はしない
        return match fs::metadata(name) {
            Ok(meta) if is_executable_file(&meta) => Ok(name.to_string()),
            Ok(_) => Err(ResolveError::NotExecutable),
            Err(_) => Err(ResolveError::NotFound),
        };
    }

    let path = env::var("PATH").unwrap_or_default();
    search_dirs(path.split(':'), name)
}

/// ディレクトリ列を順に走査し、最初の実行可能エントリを返す。
fn search_dirs<'a>(
    dirs: impl Iterator<Item = &'a str>,
    name: &str,
) -> Result<String, ResolveError> {
    for dir in dirs {
        if dir.is_empty() {
            continue;
        }
        let candidate = Path::new(dir).join(name);
        if let Ok(meta) = fs::metadata(&candidate) {
            if is_executable_file(&meta) {
                return Ok(candidate.to_string_lossy().into_owned());
            }
        }
    }
    Err(ResolveError::NotFound)
}

/// 通常ファイルかつ実行ビットが立っているか。
fn is_executable_file(meta: &fs::Metadata) -> bool {
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

// ── Tests ───────────────────────────────────────────────────────────
