//! プロンプト描画。
//!
//! シェル状態（cwd / home / 直前のステータス / ユーザ / ホスト）から
//! プロンプト文字列を組み立てる。描画は決して失敗しない。情報が欠けて
//! いても素の ASCII プロンプト（[`FALLBACK`]）に縮退するだけで、
//! REPL を止めることはない。
//!
//! ## 構成要素
//!
//! - ステータスアイコン: 直前の終了ステータスが 0 なら緑の `✓`、非 0 なら赤の `✗`
//! - `user@host`（シアン太字）
//! - カレントディレクトリ（青）: ホーム配下は `~` 置換、長すぎるパスは中央を省略
//! - git ブランチ: cwd 直下に `.git` があれば `HEAD` から読む（黄色）
//! - 2 行目にプロンプト文字 `❯`

use std::fs;
use std::path::Path;

/// 情報が取れないときの素のプロンプト。
pub const FALLBACK: &str = "$ ";

// ── ANSI カラー ─────────────────────────────────────────────────────

mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BRIGHT_BLUE: &str = "\x1b[94m";
    pub const BRIGHT_CYAN: &str = "\x1b[96m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_BLACK: &str = "\x1b[90m";
}

/// プロンプト文字列を生成する。
pub fn render(cwd: &str, home: &str, last_status: i32, user: &str, host: &str) -> String {
    if cwd.is_empty() || user.is_empty() {
        return FALLBACK.to_string();
    }

    let icon = if last_status == 0 {
        format!("{}✓{}", colors::GREEN, colors::RESET)
    } else {
        format!("{}✗{}", colors::RED, colors::RESET)
    };

    let user_host = format!(
        "{}{}{}@{}{}",
        colors::BRIGHT_CYAN,
        colors::BOLD,
        user,
        host,
        colors::RESET,
    );

    let dir = format!(
        "{}{}{}",
        colors::BRIGHT_BLUE,
        shorten_path(cwd, home),
        colors::RESET,
    );

    let git = match git_branch(cwd) {
        Some(branch) => format!(
            " {}on{} {}{}{}",
            colors::BRIGHT_BLACK,
            colors::RESET,
            colors::YELLOW,
            branch,
            colors::RESET,
        ),
        None => String::new(),
    };

    format!(
        "{} {} {}{}\n{}❯{} ",
        icon,
        user_host,
        dir,
        git,
        colors::BRIGHT_GREEN,
        colors::RESET,
    )
}

/// パス表示の短縮。
///
/// ホーム配下は `~` 置換し、40 文字を超えるパスは先頭セグメントと
/// 末尾 20 文字を残して中央を `...` で省略する。
fn shorten_path(path: &str, home: &str) -> String {
    let mut display = if !home.is_empty() && path.starts_with(home) {
        format!("~{}", &path[home.len()..])
    } else {
        path.to_string()
    };

    if display.chars().count() > 40 {
        let chars: Vec<char> = display.chars().collect();
        if let Some(slash_pos) = chars.iter().skip(1).position(|&c| c == '/') {
            let slash_pos = slash_pos + 1;
            if slash_pos < chars.len().saturating_sub(20) {
                let head: String = chars[..=slash_pos].iter().collect();
                let tail: String = chars[chars.len() - 20..].iter().collect();
                display = format!("{}...{}", head, tail);
            }
        }
    }

    display
}

/// cwd 直下の `.git/HEAD` から現在のブランチ名を読む。
///
/// `ref: refs/heads/<branch>` 形式ならブランチ名、detached HEAD なら
/// コミットハッシュ先頭 7 文字を返す。git リポジトリでなければ `None`。
fn git_branch(cwd: &str) -> Option<String> {
    let git_dir = Path::new(cwd).join(".git");
    if !git_dir.is_dir() {
        return None;
    }

    let head = fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let line = head.lines().next()?;

    if let Some(branch) = line.strip_prefix("ref: refs/heads/") {
        return Some(branch.to_string());
    }
    if line.len() >= 7 {
        return Some(line[..7].to_string());
    }
    None
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_user_host_and_prompt_char() {
        let p = render("/work/helix", "/home/dev", 0, "dev", "box");
        assert!(p.contains("dev@box"));
        assert!(p.contains("/work/helix"));
        assert!(p.contains('✓'));
        assert!(p.contains('❯'));
    }

    #[test]
    fn render_shows_failure_icon() {
        let p = render("/work", "/home/dev", 1, "dev", "box");
        assert!(p.contains('✗'));
        assert!(!p.contains('✓'));
    }

    #[test]
    fn render_falls_back_on_missing_info() {
        assert_eq!(render("", "/home/dev", 0, "dev", "box"), FALLBACK);
        assert_eq!(render("/work", "/home/dev", 0, "", "box"), FALLBACK);
    }

    #[test]
    fn shorten_replaces_home_with_tilde() {
        assert_eq!(shorten_path("/home/dev/src", "/home/dev"), "~/src");
        assert_eq!(shorten_path("/home/dev", "/home/dev"), "~");
        assert_eq!(shorten_path("/etc", "/home/dev"), "/etc");
    }

    #[test]
    fn shorten_elides_long_paths() {
        let long = "/very/long/path/with/many/nested/components/inside/project";
        let short = shorten_path(long, "/home/dev");
        assert!(short.chars().count() < long.chars().count());
        assert!(short.contains("..."));
        assert!(short.ends_with("project"));
    }

    #[test]
    fn git_branch_reads_head_ref() {
        let dir = std::env::temp_dir().join(format!("helix_prompt_{}", std::process::id()));
        let git = dir.join(".git");
        fs::create_dir_all(&git).unwrap();
        fs::write(git.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        assert_eq!(git_branch(dir.to_str().unwrap()), Some("main".to_string()));

        fs::write(git.join("HEAD"), "0123456789abcdef\n").unwrap();
        assert_eq!(git_branch(dir.to_str().unwrap()), Some("0123456".to_string()));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn git_branch_none_outside_repo() {
        assert_eq!(git_branch("/"), None);
    }
}
