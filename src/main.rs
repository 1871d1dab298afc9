//! helix — 対話型 Unix シェル
//!
//! REPLループ: ジョブ通知 → プロンプト表示 → 入力読み取り → パース → 実行 → ループ
//!
//! 機能:
//! - 構文解析: パイプライン、リダイレクト、クォート、エスケープ、`&`（[`parser`]）
//! - 変数展開: `$VAR` / `${VAR}`（[`expand`]）
//! - コマンド実行: パイプライン接続、プロセスグループ管理、ターミナル制御（[`executor`]）
//! - ビルトイン: `cd`, `pwd`, `exit`, `history`, `export`, `jobs`, `fg`, `bg`（[`builtins`]）
//! - ジョブコントロール: バックグラウンド実行 (`&`)、Ctrl+Z サスペンド、`fg`/`bg` 復帰（[`job`]）

mod builtins;
mod executor;
mod expand;
mod history;
mod job;
mod parser;
mod prompt;
mod resolve;
mod shell;
mod signal;
mod spawn;

use std::io::{self, BufRead, Write};

use shell::Shell;

fn main() {
    // シグナル設定: シェル自体は SIGINT/SIGTSTP/SIGTTOU/SIGTTIN を無視する。
    // 子プロセスは spawn 時に SIG_DFL にリセットされる。
    signal::ignore_job_control_signals();

    // SIGCHLD ルータ: ハンドラは self-pipe に 1 バイト書くだけ。
    // reap はプロンプト境界でこちら側が行う
    let notify_fd = match signal::install_sigchld_router() {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("helix: signal setup failed: {}", e);
            std::process::exit(1);
        }
    };

    // シェルを自身のプロセスグループリーダーにし、ターミナルを掌握する。
    unsafe {
        let shell_pid = libc::getpid();
        libc::setpgid(shell_pid, shell_pid);
        libc::tcsetpgrp(libc::STDIN_FILENO, shell_pid);
    }

    let mut shell = Shell::new(notify_fd);

    // 非対話（パイプ入力）時はプロンプトを出さない
    let interactive = unsafe { libc::isatty(libc::STDIN_FILENO) } == 1;

    // stdin/stdoutのロックを保持し、毎回のmutexロックオーバーヘッドを回避
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdin = stdin.lock();
    let mut stdout = stdout.lock();
    let mut line = String::new();

    loop {
        // プロンプト境界: SIGCHLD 通知を drain し、バックグラウンドジョブを
        // reap して完了通知を出力する
        signal::drain(shell.notify_fd);
        job::reap_jobs(&mut shell.jobs);
        job::notify_and_clean(&mut shell.jobs);

        if interactive {
            let p = prompt::render(
                &shell.cwd,
                &shell.home,
                shell.last_status,
                &shell.user,
                &shell.host,
            );
            let _ = write!(stdout, "{}", p);
            let _ = stdout.flush();
        }

        // バッファを再利用して読み取り（アロケーション回避）
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                // EOF (Ctrl+D): 改行を出力して正常終了
                if interactive {
                    let _ = writeln!(stdout);
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                // ターミナル入力が壊れた場合は続行できない
                eprintln!("helix: read error: {}", e);
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            // 空行は何もしない（last_status も変えない）
            continue;
        }
        shell.history.add(trimmed);

        // cmd_text はジョブテーブルの表示用コマンド文字列として execute に渡す
        let cmd_text = trimmed.to_string();
        match parser::parse(&line) {
            Ok(Some(pipeline)) => {
                shell.last_status = executor::execute(&mut shell, &pipeline, &cmd_text);
            }
            Ok(None) => continue,
            Err(e) => {
                eprintln!("helix: {}", e);
                shell.last_status = 2;
                continue;
            }
        }

        if shell.should_exit {
            break;
        }
    }

    std::process::exit(shell.last_status);
}
