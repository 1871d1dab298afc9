//! シェルのグローバル状態を保持するモジュール。
//!
//! [`Shell`] はプロセスにつき 1 つだけ存在し、REPL ループ全体で共有される。
//! ジョブテーブルの唯一の所有者でもある。環境変数はプロセス環境
//! （`std::env`）そのものを正とし、シャドウテーブルは持たない。
//! `export` / `cd` の変更が子プロセスへそのまま継承される。

use std::env;
use std::ffi::CStr;

use crate::history::History;
use crate::job::JobTable;

/// シェルの実行状態。REPLループ全体で共有される。
pub struct Shell {
    /// カレントディレクトリ。`cd` が更新し、`pwd` とプロンプトが参照する。
    pub cwd: String,
    /// ホームディレクトリ。引数なし `cd` の行き先。
    pub home: String,
    /// プロンプト表示用のユーザ名。
    pub user: String,
    /// プロンプト表示用のホスト名。
    pub host: String,
    /// 直前のコマンドの終了ステータス。プロンプト表示や `exit` のデフォルト値に使う。
    pub last_status: i32,
    /// `exit` ビルトインで true にセットされ、REPLループを終了させる。
    pub should_exit: bool,
    /// コマンド履歴（インメモリのリングバッファ）。
    pub history: History,
    /// ジョブテーブル。
    pub jobs: JobTable,
    /// シェル自身のプロセスグループ ID。ターミナルを取り戻すときに使う。
    pub shell_pgid: libc::pid_t,
    /// 制御ターミナルの fd（stdin）。
    pub terminal_fd: i32,
    /// SIGCHLD ルータの self-pipe 読み取り側。プロンプト境界で drain する。
    pub notify_fd: i32,
}

impl Shell {
    /// 環境から初期状態を収集して `Shell` を構築する。
    ///
    /// - `cwd`: `getcwd` 相当（失敗時は `/`）
    /// - `home`: `$HOME`、なければ `getpwuid` のホーム
    /// - `user`: `$USER` → `$LOGNAME` → `getpwuid` → `"user"`
    /// - `host`: `gethostname`、失敗時は `"helix"`
    pub fn new(notify_fd: i32) -> Self {
        let cwd = env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/".to_string());

        let home = env::var("HOME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(passwd_home)
            .unwrap_or_else(|| "/".to_string());

        let user = env::var("USER")
            .ok()
            .or_else(|| env::var("LOGNAME").ok())
            .filter(|u| !u.is_empty())
            .or_else(passwd_name)
            .unwrap_or_else(|| "user".to_string());

        Self {
            cwd,
            home,
            user,
            host: hostname().unwrap_or_else(|| "helix".to_string()),
            last_status: 0,
            should_exit: false,
            history: History::new(),
            jobs: JobTable::new(),
            shell_pgid: unsafe { libc::getpid() },
            terminal_fd: libc::STDIN_FILENO,
            notify_fd,
        }
    }
}

/// `gethostname` のラッパー。
fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return None;
    }
    buf[buf.len() - 1] = 0;
    let cstr = unsafe { CStr::from_ptr(buf.as_ptr() as *const libc::c_char) };
    let name = cstr.to_string_lossy().into_owned();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// `getpwuid` からユーザ名を引く。
fn passwd_name() -> Option<String> {
    unsafe {
        let pw = libc::getpwuid(libc::getuid());
        if pw.is_null() || (*pw).pw_name.is_null() {
            return None;
        }
        Some(CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned())
    }
}

/// `getpwuid` からホームディレクトリを引く。`$HOME` 未設定時のフォールバック。
fn passwd_home() -> Option<String> {
    unsafe {
        let pw = libc::getpwuid(libc::getuid());
        if pw.is_null() || (*pw).pw_dir.is_null() {
            return None;
        }
        Some(CStr::from_ptr((*pw).pw_dir).to_string_lossy().into_owned())
    }
}
