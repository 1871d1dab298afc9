//! ビルトインコマンドの実装。
//!
//! ビルトインはシェル自身の状態（カレントディレクトリ、環境、ジョブテーブル、
//! 終了フラグ）を変更するため、原則としてシェルプロセス内で直接実行される。
//! パイプラインの一部やバックグラウンドに置かれた場合は executor が
//! サブシェル（fork した子）で実行し、シェル状態への影響を遮断する。
//!
//! `try_exec()` が `Some(status)` を返せばビルトインとして処理済み、
//! `None` なら外部コマンドとして executor に委ねる。通常出力は引数の
//! `Write` に書く（REPL は stdout を、テストはバッファを渡す）。
//! エラーはすべて stderr へ `helix: <builtin>: ...` 形式で出す。

use std::env;
use std::io::Write;

use crate::job::{self, JobStatus};
use crate::shell::Shell;

/// ビルトイン名の一覧。ディスパッチ判定と executor のサブシェル判定で共有する。
const BUILTINS: &[&str] = &["cd", "pwd", "exit", "history", "export", "jobs", "fg", "bg"];

/// `name` がビルトインかどうか。
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// ビルトインコマンドの実行を試みる。
///
/// 戻り値:
/// - `Some(status)` — ビルトインとして実行済み
/// - `None` — 該当するビルトインなし（外部コマンドとして実行すべき）
pub fn try_exec(shell: &mut Shell, args: &[&str], out: &mut impl Write) -> Option<i32> {
    match args[0] {
        "cd" => Some(builtin_cd(shell, args, out)),
        "pwd" => Some(builtin_pwd(shell, out)),
        "exit" => Some(builtin_exit(shell, args)),
        "history" => Some(builtin_history(shell, out)),
        "export" => Some(builtin_export(args, out)),
        "jobs" => Some(builtin_jobs(shell, out)),
        "fg" => Some(builtin_fg(shell, args, out)),
        "bg" => Some(builtin_bg(shell, args, out)),
        _ => None,
    }
}

// ── ディレクトリ ────────────────────────────────────────────────────

/// `cd [dir]` — カレントディレクトリを変更する。
///
/// - 引数なし → ホームディレクトリへ
/// - `cd -` → `$OLDPWD` へ移動し、移動先を表示。`OLDPWD` 未設定ならエラーで状態を変えない
/// - 成功時は `cwd` / `PWD` / `OLDPWD` を更新する
fn builtin_cd(shell: &mut Shell, args: &[&str], out: &mut impl Write) -> i32 {
    let dash = args.len() > 1 && args[1] == "-";
    let target = if dash {
        match env::var("OLDPWD") {
            Ok(old) if !old.is_empty() => old,
            _ => {
                eprintln!("helix: cd: OLDPWD not set");
                return 1;
            }
        }
    } else if args.len() > 1 {
        args[1].to_string()
    } else {
        shell.home.clone()
    };

    let old_cwd = shell.cwd.clone();

    if let Err(e) = env::set_current_dir(&target) {
        eprintln!("helix: cd: {}: {}", target, e);
        return 1;
    }

    // シンボリックリンク解決後の実パスを保持する
    shell.cwd = env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or(target);
    env::set_var("OLDPWD", &old_cwd);
    env::set_var("PWD", &shell.cwd);

    if dash {
        let _ = writeln!(out, "{}", shell.cwd);
    }
    0
}

/// `pwd` — カレントディレクトリを表示する。
fn builtin_pwd(shell: &Shell, out: &mut impl Write) -> i32 {
    let _ = writeln!(out, "{}", shell.cwd);
    0
}

// ── 終了 ────────────────────────────────────────────────────────────

/// `exit [N]` — シェルを終了する。
///
/// N が数値ならそのコードで終了、省略時は直前のステータスで終了。
/// N が数値でなければエラーを表示し、シェルは終了しない。
fn builtin_exit(shell: &mut Shell, args: &[&str]) -> i32 {
    if args.len() > 1 {
        match args[1].parse::<i32>() {
            Ok(code) => {
                shell.should_exit = true;
                code
            }
            Err(_) => {
                eprintln!("helix: exit: {}: numeric argument required", args[1]);
                1
            }
        }
    } else {
        shell.should_exit = true;
        shell.last_status
    }
}

// ── 履歴 ────────────────────────────────────────────────────────────

/// `history` — 履歴を 1 始まりの番号付きで表示する。番号は右寄せ 4 桁。
fn builtin_history(shell: &Shell, out: &mut impl Write) -> i32 {
    for (i, entry) in shell.history.iter().enumerate() {
        let _ = writeln!(out, "{:>4}  {}", i + 1, entry);
    }
    0
}

// ── 環境変数 ────────────────────────────────────────────────────────

/// `export NAME=VALUE ...` — 環境変数を設定する。
///
/// 引数なしの場合は全環境変数を `export NAME=VALUE` 形式で一覧表示する。
/// `=` を含まない引数は書式エラー。
fn builtin_export(args: &[&str], out: &mut impl Write) -> i32 {
    if args.len() < 2 {
        let mut vars: Vec<(String, String)> = env::vars().collect();
        vars.sort();
        for (name, value) in vars {
            let _ = writeln!(out, "export {}={}", name, value);
        }
        return 0;
    }

    for arg in &args[1..] {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                env::set_var(name, value);
            }
            _ => {
                eprintln!("helix: export: invalid format. Use: export VAR=VALUE");
                return 1;
            }
        }
    }
    0
}

// ── ジョブ制御 ──────────────────────────────────────────────────────

/// `jobs` — ジョブテーブルを `[id] Status command` 形式で表示する。
fn builtin_jobs(shell: &Shell, out: &mut impl Write) -> i32 {
    for j in shell.jobs.iter() {
        let _ = writeln!(out, "[{}] {} {}", j.id, j.status().as_str(), j.command);
    }
    0
}

/// `fg` / `bg` の引数からジョブ ID を取り出す。失敗時はエラー表示済み。
fn parse_job_id(name: &str, args: &[&str]) -> Option<usize> {
    if args.len() < 2 {
        eprintln!("helix: {}: job specification missing", name);
        return None;
    }
    match args[1].parse::<usize>() {
        Ok(id) => Some(id),
        Err(_) => {
            eprintln!("helix: {}: {}: no such job", name, args[1]);
            None
        }
    }
}

/// `fg id` — ジョブをフォアグラウンドに移す。
///
/// ターミナルをジョブのプロセスグループへ渡し、停止中なら SIGCONT を
/// グループ宛てに送ってから、フォアグラウンドパイプラインと同じ方法で
/// 待機する。完了したらテーブルから削除、再停止したら Stopped のまま残す。
/// 待機後は必ずターミナルをシェルへ戻す。
fn builtin_fg(shell: &mut Shell, args: &[&str], out: &mut impl Write) -> i32 {
    let id = match parse_job_id("fg", args) {
        Some(id) => id,
        None => return 1,
    };

    let (pgid, was_stopped, pids, command) = match shell.jobs.get(id) {
        Some(j) => (
            j.pgid,
            matches!(j.status(), JobStatus::Stopped),
            j.live_pids(),
            j.command.clone(),
        ),
        None => {
            eprintln!("helix: fg: {}: no such job", id);
            return 1;
        }
    };

    // 全プロセスが終了済み（通知前に fg された）ならその結果を引き取るだけ
    if pids.is_empty() {
        let status = match shell.jobs.get(id).map(|j| j.status()) {
            Some(JobStatus::Done(code)) | Some(JobStatus::Terminated(code)) => code,
            _ => 0,
        };
        shell.jobs.remove(id);
        return status;
    }

    let _ = writeln!(out, "{}", command);
    let _ = out.flush();

    job::give_terminal_to(shell.terminal_fd, pgid);

    if was_stopped {
        unsafe {
            libc::kill(-pgid, libc::SIGCONT);
        }
        if let Some(j) = shell.jobs.get_mut(id) {
            for p in &mut j.processes {
                p.stopped = false;
            }
        }
    }

    let (status, stopped) = job::wait_for_fg(&mut shell.jobs, pgid, &pids);

    job::take_terminal_back(shell.terminal_fd, shell.shell_pgid);

    if stopped {
        eprintln!("\n[{}]+  Stopped   {}", id, command);
    } else {
        shell.jobs.remove(id);
    }

    status
}

/// `bg id` — 停止中のジョブへ SIGCONT を送り、バックグラウンドで再開する。待機はしない。
fn builtin_bg(shell: &mut Shell, args: &[&str], out: &mut impl Write) -> i32 {
    let id = match parse_job_id("bg", args) {
        Some(id) => id,
        None => return 1,
    };

    match shell.jobs.get_mut(id) {
        Some(j) => {
            unsafe {
                libc::kill(-j.pgid, libc::SIGCONT);
            }
            for p in &mut j.processes {
                p.stopped = false;
            }
            let _ = writeln!(out, "[{}] {} &", j.id, j.command);
            0
        }
        None => {
            eprintln!("helix: bg: {}: no such job", id);
            1
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(shell: &mut Shell, args: &[&str]) -> (i32, String) {
        let mut buf = Vec::new();
        let status = try_exec(shell, args, &mut buf).expect("builtin");
        (status, String::from_utf8(buf).unwrap())
    }

    #[test]
    fn builtin_set_is_closed() {
        for name in ["cd", "pwd", "exit", "history", "export", "jobs", "fg", "bg"] {
            assert!(is_builtin(name));
        }
        assert!(!is_builtin("ls"));
        assert!(!is_builtin("echo"));
    }

    #[test]
    fn unknown_command_is_none() {
        let mut shell = Shell::new(-1);
        let mut buf = Vec::new();
        assert!(try_exec(&mut shell, &["ls"], &mut buf).is_none());
    }

    #[test]
    fn exit_without_arg_uses_last_status() {
        let mut shell = Shell::new(-1);
        shell.last_status = 3;
        let (status, _) = run(&mut shell, &["exit"]);
        assert_eq!(status, 3);
        assert!(shell.should_exit);
    }

    #[test]
    fn exit_with_numeric_arg() {
        let mut shell = Shell::new(-1);
        let (status, _) = run(&mut shell, &["exit", "42"]);
        assert_eq!(status, 42);
        assert!(shell.should_exit);
    }

    #[test]
    fn exit_with_bad_arg_does_not_exit() {
        let mut shell = Shell::new(-1);
        let (status, _) = run(&mut shell, &["exit", "abc"]);
        assert_eq!(status, 1);
        assert!(!shell.should_exit);
    }

    #[test]
    fn pwd_prints_cwd() {
        let mut shell = Shell::new(-1);
        shell.cwd = "/some/dir".to_string();
        let (status, out) = run(&mut shell, &["pwd"]);
        assert_eq!(status, 0);
        assert_eq!(out, "/some/dir\n");
    }

    #[test]
    fn history_prints_numbered_entries() {
        let mut shell = Shell::new(-1);
        shell.history.add("echo one");
        shell.history.add("echo two");
        let (status, out) = run(&mut shell, &["history"]);
        assert_eq!(status, 0);
        assert_eq!(out, "   1  echo one\n   2  echo two\n");
    }

    #[test]
    fn export_sets_and_lists() {
        let mut shell = Shell::new(-1);
        let (status, _) = run(&mut shell, &["export", "HELIX_TEST_EXPORT=ok"]);
        assert_eq!(status, 0);
        assert_eq!(env::var("HELIX_TEST_EXPORT").unwrap(), "ok");

        let (status, out) = run(&mut shell, &["export"]);
        assert_eq!(status, 0);
        assert!(out.contains("export HELIX_TEST_EXPORT=ok"));
        env::remove_var("HELIX_TEST_EXPORT");
    }

    #[test]
    fn export_rejects_malformed_arg() {
        let mut shell = Shell::new(-1);
        let (status, _) = run(&mut shell, &["export", "NOEQUALS"]);
        assert_eq!(status, 1);
        let (status, _) = run(&mut shell, &["export", "=value"]);
        assert_eq!(status, 1);
    }

    #[test]
    fn jobs_empty_table_prints_nothing() {
        let mut shell = Shell::new(-1);
        let (status, out) = run(&mut shell, &["jobs"]);
        assert_eq!(status, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn jobs_lists_running_entry() {
        let mut shell = Shell::new(-1);
        shell.jobs.insert(4242, "sleep 10".to_string(), vec![4242]);
        let (_, out) = run(&mut shell, &["jobs"]);
        assert_eq!(out, "[1] Running sleep 10\n");
    }

    #[test]
    fn fg_and_bg_require_job_id() {
        let mut shell = Shell::new(-1);
        assert_eq!(run(&mut shell, &["fg"]).0, 1);
        assert_eq!(run(&mut shell, &["bg"]).0, 1);
        assert_eq!(run(&mut shell, &["fg", "zzz"]).0, 1);
        assert_eq!(run(&mut shell, &["fg", "7"]).0, 1);
        assert_eq!(run(&mut shell, &["bg", "7"]).0, 1);
    }

    // cd 系はプロセス全体の cwd / OLDPWD を触るため 1 テストに直列化する
    #[test]
    fn cd_sequence_updates_state() {
        let mut shell = Shell::new(-1);
        let original = env::current_dir().unwrap();
        let start = shell.cwd.clone();

        // OLDPWD 未設定での cd - はエラーで状態を変えない
        let saved_oldpwd = env::var("OLDPWD").ok();
        env::remove_var("OLDPWD");
        let (status, out) = run(&mut shell, &["cd", "-"]);
        assert_eq!(status, 1);
        assert_eq!(shell.cwd, start);
        assert!(out.is_empty());
        if let Some(v) = saved_oldpwd {
            env::set_var("OLDPWD", v);
        }

        // cd /tmp 相当の移動先として temp_dir を使う
        let tmp = env::temp_dir();
        let (status, _) = run(&mut shell, &["cd", tmp.to_str().unwrap()]);
        assert_eq!(status, 0);
        assert_ne!(shell.cwd, start);
        assert_eq!(env::var("OLDPWD").unwrap(), start);
        assert_eq!(env::var("PWD").unwrap(), shell.cwd);

        // cd - で元の場所に戻り、移動先が表示される
        let (status, out) = run(&mut shell, &["cd", "-"]);
        assert_eq!(status, 0);
        assert_eq!(shell.cwd, start);
        assert_eq!(out.trim_end(), start);

        let (status, _) = run(&mut shell, &["cd", "/no/such/dir/helix"]);
        assert_eq!(status, 1);
        assert_eq!(shell.cwd, start); // 失敗時は状態を変えない

        env::set_current_dir(original).unwrap();
    }
}
