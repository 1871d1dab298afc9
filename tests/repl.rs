//! エンドツーエンドテスト: ビルドしたシェル本体をパイプ越しに駆動する。
//!
//! stdin が tty でないためプロンプトは出力されず、stdout にはコマンドの
//! 出力だけが現れる。ジョブ通知・診断はすべて stderr に出る。
//! シェルは EOF で直前の終了ステータスを持って終了するので、
//! プロセスの exit code で `last_status` を観測できる。

use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

/// シェルに `input` を流し込み、(stdout, stderr, exit code) を返す。
fn run_shell(input: &str) -> (String, String, i32) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_helix"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn helix");

    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.as_bytes())
        .expect("write input");

    let out = child.wait_with_output().expect("wait");
    (
        String::from_utf8_lossy(&out.stdout).into_owned(),
        String::from_utf8_lossy(&out.stderr).into_owned(),
        out.status.code().unwrap_or(-1),
    )
}

fn tmp_path(tag: &str) -> String {
    std::env::temp_dir()
        .join(format!("helix_repl_{}_{}", tag, std::process::id()))
        .to_string_lossy()
        .into_owned()
}

// ── S1: 単純コマンド ──

#[test]
fn echo_hello_world() {
    let (stdout, _, code) = run_shell("echo hello world\n");
    assert_eq!(stdout, "hello world\n");
    assert_eq!(code, 0);
}

// ── S2: リダイレクト + 追記 ──

#[test]
fn redirect_then_append() {
    let f = tmp_path("append");
    let script = format!("echo a > {f}\necho b >> {f}\ncat {f}\n");
    let (stdout, _, code) = run_shell(&script);
    assert_eq!(stdout, "a\nb\n");
    assert_eq!(code, 0);
    let _ = std::fs::remove_file(&f);
}

#[test]
fn redirect_truncates_existing_file() {
    let f = tmp_path("trunc");
    let script = format!("echo long line here > {f}\necho x > {f}\ncat {f}\n");
    let (stdout, _, _) = run_shell(&script);
    assert_eq!(stdout, "x\n");
    let _ = std::fs::remove_file(&f);
}

// ── S3: パイプライン ──

#[test]
fn pipeline_word_count() {
    let (stdout, _, code) = run_shell("echo one two three | wc -w\n");
    assert_eq!(stdout.trim(), "3");
    assert_eq!(code, 0);
}

#[test]
fn three_stage_pipeline() {
    let (stdout, _, _) = run_shell("printf 'b\\na\\nc\\n' | sort | head -1\n");
    assert_eq!(stdout, "a\n");
}

// ── S4: コマンド未発見 → 127 ──

#[test]
fn command_not_found_is_127() {
    let (stdout, stderr, code) =
        run_shell("definitely_not_a_real_command_xyz\nexit\n");
    assert_eq!(stdout, "");
    assert!(stderr.contains("definitely_not_a_real_command_xyz"));
    assert!(stderr.contains("command not found"));
    // `exit` は last_status をそのまま使う
    assert_eq!(code, 127);
}

#[test]
fn not_executable_is_126() {
    let f = tmp_path("noexec");
    std::fs::write(&f, "not a program\n").unwrap();
    let (_, stderr, code) = run_shell(&format!("{f}\nexit\n"));
    assert!(stderr.contains("permission denied"));
    assert_eq!(code, 126);
    let _ = std::fs::remove_file(&f);
}

// ── S5: バックグラウンド + jobs + 完了通知 ──

#[test]
fn background_job_lifecycle() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_helix"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn helix");

    let mut stdin = child.stdin.take().expect("stdin");
    stdin.write_all(b"sleep 0.3 &\njobs\n").unwrap();
    stdin.flush().unwrap();

    // ジョブが完了してから次のプロンプト境界を踏ませる
    thread::sleep(Duration::from_millis(800));
    stdin.write_all(b"jobs\n").unwrap();
    drop(stdin);

    let out = child.wait_with_output().expect("wait");
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);

    // 投入時に `[1] <pgid>` が 1 行出る
    assert!(stderr.lines().any(|l| {
        l.starts_with("[1] ") && l[4..].trim().parse::<i32>().is_ok()
    }), "submission line missing: {stderr}");

    // 1 回目の jobs は Running を表示
    assert!(stdout.contains("[1] Running sleep 0.3"), "stdout: {stdout}");

    // 完了通知はちょうど 1 回、投入行より後に出る
    assert!(stderr.contains("Done"), "stderr: {stderr}");
    assert!(stderr.find("[1] ").unwrap() < stderr.find("Done").unwrap());
    assert_eq!(stderr.matches("Done").count(), 1);

    // 2 回目の jobs は空（テーブルから削除済み）
    let after = &stdout[stdout.find("Running").unwrap()..];
    assert!(!after["Running".len()..].contains("[1]"), "stdout: {stdout}");
}

// ── S6: クォート ──

#[test]
fn quoting_preserves_inner_whitespace() {
    let (stdout, _, code) = run_shell("echo \"a   b\" 'c   d'\n");
    assert_eq!(stdout, "a   b c   d\n");
    assert_eq!(code, 0);
}

// ── S7: ファイルリダイレクトはパイプより優先 ──

#[test]
fn file_redirect_wins_over_pipe() {
    let f = tmp_path("priority");
    let script = format!("echo piped | cat > {f}\ncat {f}\n");
    let (stdout, _, code) = run_shell(&script);
    // 1 行目の出力はファイルに行き、stdout には 2 行目の cat だけが出る
    assert_eq!(stdout, "piped\n");
    assert_eq!(code, 0);
    let _ = std::fs::remove_file(&f);
}

// ── S8: 変数展開 ──

#[test]
fn variable_expansion() {
    let (stdout, _, _) = run_shell("export X=42\necho $X ${X}x\n");
    assert_eq!(stdout, "42 42x\n");
}

#[test]
fn single_quotes_suppress_expansion() {
    let (stdout, _, _) = run_shell("export Y=42\necho '$Y' \"$Y\"\n");
    assert_eq!(stdout, "$Y 42\n");
}

#[test]
fn unknown_variable_expands_to_empty() {
    let (stdout, _, _) = run_shell("echo a$HELIX_NO_SUCH_VAR_XYZ b\n");
    assert_eq!(stdout, "a b\n");
}

// ── 境界: 空行・構文エラー ──

#[test]
fn empty_line_keeps_last_status() {
    // 127 → 空行 → exit: 空行が last_status を変えないこと
    let (_, _, code) = run_shell("definitely_not_a_real_command_xyz\n\n   \nexit\n");
    assert_eq!(code, 127);
}

#[test]
fn unterminated_quote_is_syntax_error() {
    let (stdout, stderr, code) = run_shell("echo 'unterminated\nexit\n");
    assert_eq!(stdout, "");
    assert!(stderr.contains("unexpected EOF"));
    assert_eq!(code, 2);
}

#[test]
fn trailing_garbage_after_background_is_error() {
    let (_, stderr, code) = run_shell("echo a & echo b\nexit\n");
    assert!(stderr.contains("syntax error"));
    assert_eq!(code, 2);
}

// ── 境界: 64 段パイプライン（パイプ close 規律の検証） ──

#[test]
fn pipeline_of_64_stages_completes() {
    let mut line = String::from("echo deep");
    for _ in 0..63 {
        line.push_str(" | cat");
    }
    line.push('\n');
    let (stdout, _, code) = run_shell(&line);
    assert_eq!(stdout, "deep\n");
    assert_eq!(code, 0);
}

// ── 終了ステータス ──

#[test]
fn exit_with_code() {
    let (_, _, code) = run_shell("exit 7\n");
    assert_eq!(code, 7);
}

#[test]
fn exit_with_bad_arg_does_not_exit() {
    let (stdout, stderr, code) = run_shell("exit abc\necho still here\nexit\n");
    assert!(stderr.contains("numeric argument required"));
    // シェルは終了せず後続の echo が実行される
    assert_eq!(stdout, "still here\n");
    assert_eq!(code, 0);
}

#[test]
fn pipeline_status_is_last_stage() {
    // 前段が失敗しても最終ステージのステータスが勝つ
    let (_, _, code) = run_shell("definitely_not_a_real_command_xyz | cat\nexit\n");
    assert_eq!(code, 0);

    // 最終ステージの失敗はそのまま見える
    let (_, _, code) = run_shell("echo hi | definitely_not_a_real_command_xyz\nexit\n");
    assert_eq!(code, 127);
}

// ── ビルトイン ──

#[test]
fn cd_roundtrip_returns_to_origin() {
    let (stdout, _, code) = run_shell("pwd\ncd /\ncd -\npwd\n");
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(code, 0);
    assert_eq!(lines.len(), 3); // pwd, cd - の表示, pwd
    assert_eq!(lines[0], lines[1]);
    assert_eq!(lines[0], lines[2]);
}

#[test]
fn cd_in_pipeline_runs_in_subshell() {
    let (stdout, _, _) = run_shell("pwd\ncd / | cat\npwd\n");
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    // サブシェルで実行された cd はシェルの cwd を変えない
    assert_eq!(lines[0], lines[1]);
}

#[test]
fn export_roundtrip_lists_variable() {
    let (stdout, _, _) = run_shell("export HELIX_E2E_A=1\nexport\n");
    assert!(stdout.contains("export HELIX_E2E_A=1"));
}

#[test]
fn history_lists_entered_commands() {
    let (stdout, _, _) = run_shell("echo one\nhistory\n");
    assert!(stdout.contains("   1  echo one"));
    assert!(stdout.contains("   2  history"));
}

#[test]
fn builtin_output_redirect() {
    let f = tmp_path("pwdout");
    let (stdout, _, _) = run_shell(&format!("pwd > {f}\ncat {f}\n"));
    // pwd の出力はファイルに行き、cat がそれを映す
    assert_eq!(stdout.lines().count(), 1);
    let _ = std::fs::remove_file(&f);
}

#[test]
fn fg_without_jobs_is_error() {
    let (_, stderr, code) = run_shell("fg 1\nexit\n");
    assert!(stderr.contains("no such job"));
    assert_eq!(code, 1);
}

// ── stderr リダイレクト ──

#[test]
fn stderr_redirect_captures_diagnostics() {
    let f = tmp_path("errfile");
    let script = format!("ls /no/such/dir/helix 2> {f}\ncat {f}\n");
    let (stdout, stderr, _) = run_shell(&script);
    // ls の診断はファイル側に入り、シェルの stderr には出ない
    assert!(stdout.contains("No such file") || stdout.contains("no such"), "stdout: {stdout}");
    assert!(!stderr.contains("No such file"), "stderr: {stderr}");
    let _ = std::fs::remove_file(&f);
}
