//! シグナルルータ: 子プロセスの状態変化通知と、シェル自身のシグナル設定。
//!
//! ## SIGCHLD → self-pipe
//!
//! SIGCHLD ハンドラの中で許される処理は self-pipe への 1 バイト書き込みだけ。
//! I/O もアロケーションもロック取得もしない。reap（`waitpid` ループ）と
//! ジョブテーブルの更新は、REPL がプロンプト境界で [`drain`] を呼んだ後に
//! [`crate::job::reap_jobs`] で行う。テーブルを触るコンテキストが REPL 側の
//! 1 つに限定されるため、フィールドが壊れることもジョブを二重に reap する
//! こともない。
//!
//! パイプの両端は `O_NONBLOCK` + `FD_CLOEXEC`。パイプが満杯でもハンドラの
//! `write` は失敗するだけで通知は失われない（既に読み取り待ちのバイトがある）。
//!
//! ## シェル自身のシグナル設定
//!
//! シェルは SIGINT / SIGTSTP / SIGTTOU / SIGTTIN を無視する。子プロセスは
//! spawn 時（[`crate::spawn`] の sigdefault、fork 子の [`reset_child_signals`]）
//! に SIG_DFL へ戻される。ターミナル起因のシグナルはカーネルがフォアグラウンド
//! グループへ直接配送するので、シェル自身には届かない。

use std::io;
use std::sync::atomic::{AtomicI32, Ordering};

/// self-pipe の書き込み側 fd。ハンドラから参照するためプロセスグローバル。
/// 未初期化は -1。
static NOTIFY_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

/// SIGCHLD ハンドラ。self-pipe に 1 バイト書くだけ。
///
/// async-signal-safe な操作（atomic load と `write(2)`）のみ。
extern "C" fn on_sigchld(_sig: libc::c_int) {
    let fd = NOTIFY_WRITE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, b"!".as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// SIGCHLD ルータを初期化し、self-pipe の読み取り側 fd を返す。
///
/// プロセスにつき 1 回だけ呼ぶ。失敗はシェル起動を中断すべき事象なので
/// `io::Error` で返す。
pub fn install_sigchld_router() -> io::Result<i32> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    for fd in fds {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }

    NOTIFY_WRITE_FD.store(fds[1], Ordering::Relaxed);

    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        let handler: extern "C" fn(libc::c_int) = on_sigchld;
        sa.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        // SA_RESTART: フォアグラウンド待機中の waitpid を EINTR で中断させない
        sa.sa_flags = libc::SA_RESTART;
        if libc::sigaction(libc::SIGCHLD, &sa, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(fds[0])
}

/// self-pipe に溜まった通知バイトを読み捨てる。プロンプト境界で呼ぶ。
///
/// 戻り値: 通知が 1 件以上あったか。
pub fn drain(notify_fd: i32) -> bool {
    let mut seen = false;
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe {
            libc::read(notify_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        };
        if n <= 0 {
            break;
        }
        seen = true;
    }
    seen
}

/// シェル本体のシグナル設定: ターミナル起因のシグナルを無視する。
pub fn ignore_job_control_signals() {
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
        libc::signal(libc::SIGTSTP, libc::SIG_IGN);
        libc::signal(libc::SIGTTOU, libc::SIG_IGN);
        libc::signal(libc::SIGTTIN, libc::SIG_IGN);
    }
}

/// fork した子プロセス側でジョブ制御シグナルを SIG_DFL に戻す。
///
/// ビルトインをサブシェル実行する fork 経路で呼ぶ（exec 経路は
/// `posix_spawn` の sigdefault が同じことをする）。
pub fn reset_child_signals() {
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
        libc::signal(libc::SIGTSTP, libc::SIG_DFL);
        libc::signal(libc::SIGTTOU, libc::SIG_DFL);
        libc::signal(libc::SIGTTIN, libc::SIG_DFL);
        libc::signal(libc::SIGCHLD, libc::SIG_DFL);
    }
}

// ── Tests ───────────────────────────────────────────────────────────
