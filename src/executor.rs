//! コマンド実行: ビルトイン判定、変数展開、fd 計画、パイプライン接続、
//! プロセスグループ管理、フォアグラウンド待機とバックグラウンド登録。
//!
//! ## ディスパッチ
//!
//! - 単一ステージ・非 background でビルトイン → 親プロセスで直接実行
//!   （[`run_parent_builtin`]。リダイレクトは [`RedirectGuard`] で
//!   シェル自身の標準 fd を一時的に差し替える）
//! - それ以外 → 統一 spawn パス（[`execute_job`]）
//!   - 外部コマンド: [`crate::resolve`] で絶対パスに解決してから
//!     [`crate::spawn`]（`posix_spawn`）で起動
//!   - ビルトインステージ: fork した子（サブシェル）で実行し、
//!     シェル状態への影響を遮断する（`cd x | cat` で cwd が動かない）
//!
//! ## fd の規律
//!
//! - ファイルリダイレクトはパイプ接続より優先される。押し退けられた
//!   パイプ端も子プロセス側で必ず close される
//! - リダイレクト先は親プロセスで開き、spawn 直後に親側で close する
//! - パイプ端は消費したステージの spawn 直後に親側で close し、
//!   全ステージ起動後に親はパイプ fd を 1 つも保持しない
//!   （下流が EOF を検出できなくなるため、これを破るとデッドロックする）
//!
//! ## プロセスグループ
//!
//! パイプラインの全ステージは先頭の子の PID をリーダーとする 1 つの
//! グループに入る。親・子の双方が `setpgid` を呼び、どちらが先に
//! 走ってもグループ宛てシグナルが取りこぼされないようにする。

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::IntoRawFd;

use crate::builtins;
use crate::expand;
use crate::job;
use crate::parser::{Command, Pipeline, Word};
use crate::resolve::{self, ResolveError};
use crate::shell::Shell;
use crate::signal;
use crate::spawn::{self, SpawnError};

// ── 変数展開 ────────────────────────────────────────────────────────

/// 1 単語を展開する。シングルクォート由来（`literal`）の単語はそのまま。
fn expand_word(w: &Word) -> String {
    if w.literal {
        w.text.clone()
    } else {
        expand::expand(&w.text)
    }
}

/// argv 全体を展開する。展開は単語単位で、空白での再分割はしない。
fn expand_argv(argv: &[Word]) -> Vec<String> {
    argv.iter().map(expand_word).collect()
}

// ── fd 計画 ─────────────────────────────────────────────────────────

/// リダイレクト先の fd 情報。[`open_redirect_fds`] が返す。
///
/// 開いた fd は呼び出し側（spawn 後の親プロセス）で close する責任がある。
struct RedirectFds {
    stdin_fd: Option<i32>,
    stdout_fd: Option<i32>,
    stderr_fd: Option<i32>,
}

impl RedirectFds {
    /// 保持している fd をすべて close する。
    fn close_all(&self) {
        for fd in [self.stdin_fd, self.stdout_fd, self.stderr_fd].into_iter().flatten() {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

/// リダイレクト先ファイルを親プロセスで開き、raw fd を返す。
///
/// - `<` は読み取り専用
/// - `>` / `2>` は write + create + truncate
/// - `>>` / `2>>` は write + create + append
/// - 新規ファイルのモードは 0644（umask 適用前）
///
/// オープン失敗時は `helix: <file>: <原因>` を stderr に出して `Err(1)` を
/// 返す。その時点までに開いた fd は close 済み。
fn open_redirect_fds(cmd: &Command) -> Result<RedirectFds, i32> {
    let mut fds = RedirectFds { stdin_fd: None, stdout_fd: None, stderr_fd: None };

    let fail = |fds: &RedirectFds, target: &str, e: io::Error| -> i32 {
        eprintln!("helix: {}: {}", target, e);
        fds.close_all();
        1
    };

    if let Some(word) = &cmd.stdin_file {
        let target = expand_word(word);
        match File::open(&target) {
            Ok(f) => fds.stdin_fd = Some(f.into_raw_fd()),
            Err(e) => return Err(fail(&fds, &target, e)),
        }
    }

    if let Some(word) = &cmd.stdout_file {
        let target = expand_word(word);
        match open_for_write(&target, cmd.stdout_append) {
            Ok(f) => fds.stdout_fd = Some(f.into_raw_fd()),
            Err(e) => return Err(fail(&fds, &target, e)),
        }
    }

    if let Some(word) = &cmd.stderr_file {
        let target = expand_word(word);
        match open_for_write(&target, cmd.stderr_append) {
            Ok(f) => fds.stderr_fd = Some(f.into_raw_fd()),
            Err(e) => return Err(fail(&fds, &target, e)),
        }
    }

    Ok(fds)
}

/// `>` / `>>` 系の書き込みオープン。
fn open_for_write(target: &str, append: bool) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).mode(0o644);
    if append {
        opts.append(true);
    } else {
        opts.truncate(true);
    }
    opts.open(target)
}

// ── 親プロセスで実行するビルトイン ──────────────────────────────────

/// ビルトインのリダイレクトを親プロセス自身に適用する RAII ガード。
///
/// 対象の標準 fd を `dup` で退避してから `dup2` で差し替え、Drop で復元する。
/// ガードが生きている間、シェルの stdout/stderr/stdin はリダイレクト先を指す。
struct RedirectGuard {
    /// (差し替えた標準 fd, 退避コピー)
    saved: Vec<(i32, i32)>,
}

impl RedirectGuard {
    fn apply(cmd: &Command) -> Result<Self, i32> {
        let fds = open_redirect_fds(cmd)?;
        let mut guard = Self { saved: Vec::new() };
        for (fd, std_fd) in [
            (fds.stdin_fd, libc::STDIN_FILENO),
            (fds.stdout_fd, libc::STDOUT_FILENO),
            (fds.stderr_fd, libc::STDERR_FILENO),
        ] {
            if let Some(fd) = fd {
                unsafe {
                    let backup = libc::dup(std_fd);
                    guard.saved.push((std_fd, backup));
                    libc::dup2(fd, std_fd);
                    libc::close(fd);
                }
            }
        }
        Ok(guard)
    }
}

impl Drop for RedirectGuard {
    fn drop(&mut self) {
        // 復元前にバッファを吐き出す（stdout の中身をリダイレクト先に残す）
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        for &(std_fd, backup) in self.saved.iter().rev() {
            if backup >= 0 {
                unsafe {
                    libc::dup2(backup, std_fd);
                    libc::close(backup);
                }
            }
        }
    }
}

/// 単一ビルトインを fork なしで実行する。
fn run_parent_builtin(shell: &mut Shell, cmd: &Command, argv: &[String]) -> i32 {
    let args: Vec<&str> = argv.iter().map(|s| s.as_str()).collect();
    let _guard = match RedirectGuard::apply(cmd) {
        Ok(g) => g,
        Err(status) => return status,
    };
    let status = builtins::try_exec(shell, &args, &mut io::stdout()).unwrap_or(1);
    let _ = io::stdout().flush();
    status
}

// ── エントリポイント ────────────────────────────────────────────────

/// パイプラインを実行し、終了ステータスを返す。
///
/// `cmd_text` は元のコマンド文字列で、ジョブテーブルの表示用に使用される。
pub fn execute(shell: &mut Shell, pipeline: &Pipeline, cmd_text: &str) -> i32 {
    // バックグラウンドジョブの状態を新しくしてから実行する
    job::reap_jobs(&mut shell.jobs);

    // 単一ビルトイン（非 background）→ fork なしの高速パス。
    // パイプラインや `&` 付きのビルトインはサブシェルで実行される
    if pipeline.commands.len() == 1 && !pipeline.background {
        let cmd = &pipeline.commands[0];
        let argv = expand_argv(&cmd.argv);
        if builtins::is_builtin(&argv[0]) {
            return run_parent_builtin(shell, cmd, &argv);
        }
    }

    execute_job(shell, pipeline, cmd_text)
}

// ── 統一 spawn パス ─────────────────────────────────────────────────

/// argv[0] を実行ファイルの絶対パスに解決する。失敗は spawn と同じエラー型で返す。
fn resolve_argv0(name: &str) -> Result<String, SpawnError> {
    match resolve::resolve(name) {
        Ok(path) => Ok(path),
        Err(ResolveError::NotFound) => Err(SpawnError::not_found(name)),
        Err(ResolveError::NotExecutable) => Err(SpawnError::not_executable(name)),
    }
}

/// ビルトインをサブシェル（fork した子）として起動する。
///
/// 子はパイプラインのプロセスグループへ参加し、ジョブ制御シグナルを
/// デフォルトへ戻し、fd を配線してからビルトインを実行して exit する。
/// dup2 失敗時は診断を出して exit(1)。
fn spawn_builtin_stage(
    shell: &mut Shell,
    argv: &[String],
    pgid: libc::pid_t,
    stdin_fd: Option<i32>,
    stdout_fd: Option<i32>,
    stderr_fd: Option<i32>,
    fds_to_close: &[i32],
) -> Result<libc::pid_t, SpawnError> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(SpawnError {
            errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
            command: argv[0].clone(),
        });
    }

    if pid != 0 {
        return Ok(pid);
    }

    // ── ここから子プロセス ──
    unsafe {
        libc::setpgid(0, pgid);
    }
    signal::reset_child_signals();

    for (fd, std_fd) in [
        (stdin_fd, libc::STDIN_FILENO),
        (stdout_fd, libc::STDOUT_FILENO),
        (stderr_fd, libc::STDERR_FILENO),
    ] {
        if let Some(fd) = fd {
            if unsafe { libc::dup2(fd, std_fd) } == -1 {
                eprintln!("helix: dup2: {}", io::Error::last_os_error());
                std::process::exit(1);
            }
        }
    }
    // 配線済みのソース fd と残りのパイプ端を閉じる
    for fd in [stdin_fd, stdout_fd, stderr_fd].into_iter().flatten() {
        if fd > 2 {
            unsafe {
                libc::close(fd);
            }
        }
    }
    for &fd in fds_to_close {
        if fd > 2 {
            unsafe {
                libc::close(fd);
            }
        }
    }

    let args: Vec<&str> = argv.iter().map(|s| s.as_str()).collect();
    let status = builtins::try_exec(shell, &args, &mut io::stdout()).unwrap_or(1);
    let _ = io::stdout().flush();
    std::process::exit(status);
}

/// パイプライン（単一 or 複数コマンド）を子プロセス群として実行する。
///
/// 処理の流れ:
/// 1. N-1 個のパイプを作成（8 段以下はスタック配列、超過時はヒープ）
/// 2. 各ステージの fd を計画し、ビルトインは fork、外部コマンドは
///    解決 + `posix_spawn` で起動。起動に失敗したステージは飛ばし、
///    残りのステージはそのまま実行する（パイプ端は閉じるので下流は EOF を見る）
/// 3. 親側でも `setpgid` を呼び、レースコンディションを防止
/// 4. background → ジョブテーブルに追加し `[N] pgid` を表示
///    foreground → `tcsetpgrp` でターミナルを渡し、`wait_for_fg` で待機。
///    停止検出時はジョブテーブルに Stopped として登録
fn execute_job(shell: &mut Shell, pipeline: &Pipeline, cmd_text: &str) -> i32 {
    let n = pipeline.commands.len();

    // ── パイプ作成（8 段以下はスタック配列、超過時はヒープフォールバック）──
    let mut pipe_stack: [[i32; 2]; 7] = [[-1; 2]; 7];
    let pipe_count = n.saturating_sub(1);
    let mut pipe_heap: Vec<[i32; 2]> = Vec::new();

    let pipes: &mut [[i32; 2]] = if pipe_count <= 7 {
        &mut pipe_stack[..pipe_count]
    } else {
        pipe_heap.resize(pipe_count, [-1; 2]);
        &mut pipe_heap
    };

    for p in pipes.iter_mut() {
        if unsafe { libc::pipe(p.as_mut_ptr()) } != 0 {
            eprintln!("helix: pipe: {}", io::Error::last_os_error());
            // 既に作成済みのパイプを close してパイプラインを中止
            for created in pipes.iter() {
                for &fd in created {
                    if fd >= 0 {
                        unsafe {
                            libc::close(fd);
                        }
                    }
                }
            }
            return 1;
        }
    }

    let mut pids: Vec<libc::pid_t> = Vec::with_capacity(n);
    let mut pgid: libc::pid_t = 0;
    // 最終ステージが起動に失敗した場合のステータス（パイプラインの結果を支配する）
    let mut final_stage_error: Option<i32> = None;

    for i in 0..n {
        let cmd = &pipeline.commands[i];
        let argv = expand_argv(&cmd.argv);

        // パイプ端の割り当て
        let mut stdin_fd = if i > 0 { Some(pipes[i - 1][0]) } else { None };
        let mut stdout_fd = if i < n - 1 { Some(pipes[i][1]) } else { None };

        // リダイレクトの fd を開き、パイプより優先して適用する
        let stage_result: Result<libc::pid_t, i32> = match open_redirect_fds(cmd) {
            Err(status) => Err(status),
            Ok(redir) => {
                if redir.stdin_fd.is_some() {
                    stdin_fd = redir.stdin_fd;
                }
                if redir.stdout_fd.is_some() {
                    stdout_fd = redir.stdout_fd;
                }
                let stderr_fd = redir.stderr_fd;

                // 子プロセスで close すべき fd: 使用しない全パイプ端。
                // ファイルに押し退けられたパイプ端もここに入る
                let mut close_fds: Vec<i32> = Vec::new();
                for p in pipes.iter() {
                    for &fd in p {
                        if fd >= 0 && stdin_fd != Some(fd) && stdout_fd != Some(fd) {
                            close_fds.push(fd);
                        }
                    }
                }

                let spawned = if builtins::is_builtin(&argv[0]) {
                    spawn_builtin_stage(
                        shell, &argv, pgid, stdin_fd, stdout_fd, stderr_fd, &close_fds,
                    )
                } else {
                    resolve_argv0(&argv[0]).and_then(|path| {
                        let mut args: Vec<&str> = Vec::with_capacity(argv.len());
                        args.push(&path);
                        args.extend(argv.iter().skip(1).map(|s| s.as_str()));
                        spawn::spawn(&args, pgid, stdin_fd, stdout_fd, stderr_fd, &close_fds)
                    })
                };

                // リダイレクト用に開いた fd は親ではもう不要
                redir.close_all();

                match spawned {
                    Ok(pid) => Ok(pid),
                    Err(e) => {
                        eprintln!("{}", e);
                        Err(e.exit_status())
                    }
                }
            }
        };

        match stage_result {
            Ok(child_pid) => {
                // 親側でもプロセスグループを設定（レースコンディション防止）
                if pgid == 0 {
                    pgid = child_pid;
                }
                unsafe {
                    libc::setpgid(child_pid, pgid);
                }
                pids.push(child_pid);
            }
            Err(status) => {
                if i == n - 1 {
                    final_stage_error = Some(status);
                }
            }
        }

        // 消費したパイプ端を親側で close（ステージの成否によらず）
        if i > 0 && pipes[i - 1][0] >= 0 {
            unsafe {
                libc::close(pipes[i - 1][0]);
            }
            pipes[i - 1][0] = -1;
        }
        if i < n - 1 && pipes[i][1] >= 0 {
            unsafe {
                libc::close(pipes[i][1]);
            }
            pipes[i][1] = -1;
        }
    }

    // 未消費のパイプ端を close。この時点で親はパイプ fd を 1 つも持たない
    for p in pipes.iter_mut() {
        for fd in p.iter_mut() {
            if *fd >= 0 {
                unsafe {
                    libc::close(*fd);
                }
                *fd = -1;
            }
        }
    }

    if pids.is_empty() {
        // どのステージも起動できなかった
        return final_stage_error.unwrap_or(1);
    }

    // コマンドテキストから末尾の & を除去した表示用文字列
    let display_cmd = cmd_text.strip_suffix('&').unwrap_or(cmd_text).trim();

    if pipeline.background {
        // バックグラウンド: ジョブテーブルに追加して即座に戻る
        let job_id = shell
            .jobs
            .insert(pgid, display_cmd.to_string(), pids.clone());
        eprintln!("[{}] {}", job_id, pgid);
        0
    } else {
        // フォアグラウンド: ターミナル制御を渡して待機
        job::give_terminal_to(shell.terminal_fd, pgid);

        let (status, stopped) = job::wait_for_fg(&mut shell.jobs, pgid, &pids);

        // ターミナルをシェルに戻す
        job::take_terminal_back(shell.terminal_fd, shell.shell_pgid);

        if stopped {
            // Ctrl+Z で停止: ジョブテーブルに Stopped として登録
            let job_id = shell
                .jobs
                .insert(pgid, display_cmd.to_string(), pids.clone());
            if let Some(job) = shell.jobs.get_mut(job_id) {
                for proc in &mut job.processes {
                    proc.stopped = true;
                }
            }
            eprintln!("\n[{}]+  Stopped   {}", job_id, display_cmd);
            return status;
        }

        final_stage_error.unwrap_or(status)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
