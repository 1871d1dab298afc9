//! ジョブテーブルとジョブ制御ヘルパー。
//!
//! フォアグラウンド待機 ([`wait_for_fg`])、バックグラウンド reap ([`reap_jobs`])、
//! 完了通知 ([`notify_and_clean`])、ターミナル制御 ([`give_terminal_to`] / [`take_terminal_back`])
//! を提供する。executor と builtins の両方から利用し、循環依存を回避する。
//!
//! テーブルの変更はすべて REPL スレッド側で行う。SIGCHLD ハンドラは
//! [`crate::signal`] の self-pipe に 1 バイト書くだけで、reap はプロンプト
//! 境界でこのモジュールの [`reap_jobs`] が引き受ける。ジョブが二重に
//! reap されることはない。

use libc::pid_t;

// ── データ構造 ───────────────────────────────────────────────────────

/// ジョブ内の個別プロセス。パイプライン中の各コマンドに対応する。
pub struct JobProcess {
    /// プロセス ID。
    pub pid: pid_t,
    /// 正常終了またはシグナルで終了した場合に `true`。
    pub completed: bool,
    /// SIGTSTP 等で停止中の場合に `true`。
    pub stopped: bool,
    /// `waitpid` が返した raw status（`WIFEXITED` / `WIFSIGNALED` 等で解釈）。
    pub status: i32,
}

/// ジョブの集約状態。個別プロセスの状態から導出される。
#[derive(Debug, PartialEq)]
pub enum JobStatus {
    /// 少なくとも1つのプロセスが実行中で、停止プロセスがない。
    Running,
    /// 少なくとも1つのプロセスが停止中（SIGTSTP 等）。
    Stopped,
    /// 全プロセスが完了し、最終ステージが正常終了。引数はその終了ステータス。
    Done(i32),
    /// 全プロセスが完了し、最終ステージがシグナルで終了。引数は 128 + シグナル番号。
    Terminated(i32),
}

impl JobStatus {
    /// `jobs` ビルトインと完了通知の表示名。
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::Done(_) => "Done",
            JobStatus::Terminated(_) => "Terminated",
        }
    }
}

/// ジョブ。パイプラインのプロセスグループに対応する。
///
/// バックグラウンド実行（`&`）または Ctrl+Z による停止でジョブテーブルに登録される。
/// `jobs` / `fg` / `bg` ビルトインからジョブ ID で参照される。
pub struct Job {
    /// `[N]` 形式で表示されるジョブ番号。最小未使用 ID が割り当てられる。
    pub id: usize,
    /// プロセスグループ ID。`kill(-pgid, sig)` や `waitpid(-pgid, ...)` で使用。
    pub pgid: pid_t,
    /// 表示用コマンド文字列（ユーザ入力から `&` を除いたもの）。
    pub command: String,
    /// パイプライン内の各プロセス。
    pub processes: Vec<JobProcess>,
    /// 完了通知をユーザに表示済みかどうか。`true` なら次回の [`JobTable::remove_finished`] で削除。
    pub notified: bool,
}

impl Job {
    /// ジョブの現在のステータスを返す。
    ///
    /// 判定優先度: Stopped > Done/Terminated > Running。
    /// - いずれかのプロセスが停止中 → [`JobStatus::Stopped`]
    /// - 全プロセスが完了 → 最終ステージの raw status から
    ///   [`JobStatus::Done`] / [`JobStatus::Terminated`] を導出
    /// - それ以外 → [`JobStatus::Running`]
    pub fn status(&self) -> JobStatus {
        if self.processes.iter().any(|p| p.stopped) {
            return JobStatus::Stopped;
        }
        if self.processes.iter().all(|p| p.completed) {
            // パイプラインの終了ステータスは最終ステージのもの
            let last = match self.processes.last() {
                Some(p) => p,
                None => return JobStatus::Done(0),
            };
            if libc::WIFSIGNALED(last.status) {
                return JobStatus::Terminated(128 + libc::WTERMSIG(last.status));
            }
            let code = if libc::WIFEXITED(last.status) {
                libc::WEXITSTATUS(last.status)
            } else {
                1
            };
            return JobStatus::Done(code);
        }
        JobStatus::Running
    }

    /// まだ完了していないプロセスの PID 一覧。`fg` の再待機に使う。
    pub fn live_pids(&self) -> Vec<pid_t> {
        self.processes
            .iter()
            .filter(|p| !p.completed)
            .map(|p| p.pid)
            .collect()
    }
}

// ── JobTable ─────────────────────────────────────────────────────────

/// ジョブテーブル。ジョブの追加・検索・状態更新・削除を管理する。
///
/// [`Shell`](crate::shell::Shell) が所有し、executor と builtins の両方からアクセスされる。
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// ジョブを追加し、割り当てた ID を返す。
    ///
    /// ID は最小未使用の正整数。完了通知済みのジョブは削除されているため、
    /// 通知前に同じ ID が再利用されることはない。
    pub fn insert(&mut self, pgid: pid_t, cmd: String, pids: Vec<pid_t>) -> usize {
        let mut id = 1;
        while self.jobs.iter().any(|j| j.id == id) {
            id += 1;
        }

        let processes = pids
            .into_iter()
            .map(|pid| JobProcess {
                pid,
                completed: false,
                stopped: false,
                status: 0,
            })
            .collect();

        self.jobs.push(Job {
            id,
            pgid,
            command: cmd,
            processes,
            notified: false,
        });

        id
    }

    /// ID でジョブを検索する。
    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// ID でジョブを検索する（可変参照）。
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    /// ID のジョブをテーブルから削除する。`fg` で完了を看取った後に使う。
    pub fn remove(&mut self, id: usize) {
        self.jobs.retain(|j| j.id != id);
    }

    /// `waitpid` の結果でプロセスの状態を更新する。
    ///
    /// `WIFSTOPPED` なら停止、それ以外（正常終了・シグナル終了）なら完了としてマークする。
    /// 該当 PID がテーブルに存在しない場合は何もしない。
    pub fn mark_pid(&mut self, pid: pid_t, raw_status: i32) {
        for job in &mut self.jobs {
            for proc in &mut job.processes {
                if proc.pid == pid {
                    proc.status = raw_status;
                    if libc::WIFSTOPPED(raw_status) {
                        proc.stopped = true;
                        proc.completed = false;
                    } else {
                        proc.completed = true;
                        proc.stopped = false;
                    }
                    return;
                }
            }
        }
    }

    /// 通知済みの Done / Terminated ジョブを削除する。
    pub fn remove_finished(&mut self) {
        self.jobs.retain(|j| {
            !(j.notified
                && matches!(j.status(), JobStatus::Done(_) | JobStatus::Terminated(_)))
        });
    }

    /// 全ジョブのイテレータ。
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }
}

// ── 待機ヘルパー ─────────────────────────────────────────────────────

/// フォアグラウンドのプロセスグループを待機する。
///
/// `waitpid(-pgid, WUNTRACED)` をループし、`pids` のプロセスがすべて
/// 完了するか、いずれかが停止するまでブロックする。reap した状態は
/// ジョブテーブルにも反映する（`fg` で再開したジョブの更新用。
/// 新規フォアグラウンドパイプラインはテーブルに存在しないため、
/// ローカルの記録だけで判定する）。
///
/// パイプラインの終了ステータスは `pids` の最終要素（= 最終ステージ）の
/// raw status から導出する。途中のステージが先に失敗・シグナル終了しても
/// 最終ステージの結果が優先される。
///
/// 戻り値: `(終了ステータス, 停止したか)`。
/// 停止時のステータスは 128 + 停止シグナル番号（SIGTSTP なら 148）。
pub fn wait_for_fg(jobs: &mut JobTable, pgid: pid_t, pids: &[pid_t]) -> (i32, bool) {
    let mut raw: Vec<Option<i32>> = vec![None; pids.len()];

    loop {
        let mut raw_status: i32 = 0;
        let pid = unsafe { libc::waitpid(-pgid, &mut raw_status, libc::WUNTRACED) };

        if pid <= 0 {
            // ECHILD 等。ここまでに記録した結果で判定する
            break;
        }

        jobs.mark_pid(pid, raw_status);

        if libc::WIFSTOPPED(raw_status) {
            // グループ全体が停止扱い。残りのプロセスも同じシグナルを受けている
            return (128 + libc::WSTOPSIG(raw_status), true);
        }

        if let Some(slot) = pids.iter().position(|&p| p == pid) {
            raw[slot] = Some(raw_status);
        }

        if raw.iter().all(|s| s.is_some()) {
            break;
        }
    }

    let status = match raw.last().copied().flatten() {
        Some(s) => {
            if libc::WIFEXITED(s) {
                libc::WEXITSTATUS(s)
            } else if libc::WIFSIGNALED(s) {
                128 + libc::WTERMSIG(s)
            } else {
                1
            }
        }
        // 最終ステージを reap できなかった（spawn 失敗等で存在しない）
        None => 1,
    };

    (status, false)
}

/// 非ブロッキングでバックグラウンドジョブを reap する。
///
/// `waitpid(-1, WNOHANG | WUNTRACED)` を reap できるプロセスがなくなるまで繰り返し、
/// 各プロセスの状態をジョブテーブルに反映する。プロンプト表示前と `execute()` 冒頭で呼ばれる。
pub fn reap_jobs(jobs: &mut JobTable) {
    loop {
        let mut raw_status: i32 = 0;
        let pid = unsafe {
            libc::waitpid(-1, &mut raw_status, libc::WNOHANG | libc::WUNTRACED)
        };

        if pid <= 0 {
            break;
        }

        jobs.mark_pid(pid, raw_status);
    }
}

/// 完了したジョブの通知を stderr に出力し、テーブルから削除する。
///
/// `[N]   Done   command` / `[N]   Terminated   command` 形式で表示後、
/// `notified` フラグを立てて [`JobTable::remove_finished`] で削除する。
/// プロンプト表示前に呼ばれ、bash と同様のタイミングでユーザに完了を通知する。
/// ジョブ ID はこの削除が済むまで再利用されない。
pub fn notify_and_clean(jobs: &mut JobTable) {
    for job in &mut jobs.jobs {
        let status = job.status();
        if matches!(status, JobStatus::Done(_) | JobStatus::Terminated(_)) && !job.notified {
            eprintln!("[{}]   {}   {}", job.id, status.as_str(), job.command);
            job.notified = true;
        }
    }
    jobs.remove_finished();
}

// ── ターミナル制御ヘルパー ───────────────────────────────────────────

/// `tcsetpgrp` でターミナルのフォアグラウンドプロセスグループを `pgid` に設定する。
///
/// フォアグラウンドジョブの実行前、および `fg` ビルトインから呼ばれる。
/// シェルが SIGTTOU を無視しているため、バックグラウンドからの呼び出しでもブロックしない。
/// stdin がターミナルでない場合は失敗するが、その場合フォアグラウンド
/// グループの概念自体がないので無視してよい。
pub fn give_terminal_to(terminal_fd: i32, pgid: pid_t) {
    unsafe {
        libc::tcsetpgrp(terminal_fd, pgid);
    }
}

/// `tcsetpgrp` でターミナルのフォアグラウンドプロセスグループをシェルに戻す。
///
/// フォアグラウンドジョブの完了後・停止後に呼ばれ、シェルがターミナル入力を再び受け取れるようにする。
pub fn take_terminal_back(terminal_fd: i32, shell_pgid: pid_t) {
    unsafe {
        libc::tcsetpgrp(terminal_fd, shell_pgid);
    }
}

// ── Tests ───────────────────────────────────────────────────────────
