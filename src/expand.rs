//! 環境変数展開: `$NAME` / `${NAME}` をプロセス環境の値に置き換える。
//!
//! - `$NAME` — 名前は `[A-Za-z_][A-Za-z0-9_]*`（最長一致）
//! - `${NAME}` — 閉じブレースまでのすべてが名前
//! - 未定義の変数は空文字列に展開される
//! - 再帰展開はしない（展開結果に含まれる `$` はそのまま）
//! - 展開結果を空白で再分割しない
//!
//! シングルクォート由来の単語（[`crate::parser::Word::literal`]）には
//! 呼び出し側（executor）が展開を適用しない。

use std::env;

/// 文字列中の変数参照をすべて展開して返す。
pub fn expand(input: &str) -> String {
    if !input.contains('$') {
        return input.to_string();
    }

    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut result = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        if bytes[i] == b'$' && i + 1 < len {
            if bytes[i + 1] == b'{' {
                // ${NAME} — 閉じブレースがなければリテラルのまま
                if let Some(end) = input[i + 2..].find('}') {
                    let name = &input[i + 2..i + 2 + end];
                    result.push_str(&lookup(name));
                    i += 2 + end + 1;
                    continue;
                }
                result.push('$');
                i += 1;
            } else if is_name_start(bytes[i + 1]) {
                // $NAME — 名前文字が続く限り読む
                let start = i + 1;
                let mut end = start + 1;
                while end < len && is_name_char(bytes[end]) {
                    end += 1;
                }
                result.push_str(&lookup(&input[start..end]));
                i = end;
            } else {
                // `$5` や `$ ` など、名前が続かない `$` はリテラル
                result.push('$');
                i += 1;
            }
        } else {
            // UTF-8 のマルチバイト文字をまたがないよう char 単位で進める
            let ch = input[i..].chars().next().unwrap_or('$');
            result.push(ch);
            i += ch.len_utf8();
        }
    }

    result
}

/// 変数値の取得。未定義は空文字列。
fn lookup(name: &str) -> String {
    env::var(name).unwrap_or_default()
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_dollar_passthrough() {
        assert_eq!(expand("hello"), "hello");
        assert_eq!(expand(""), "");
    }

    #[test]
    fn simple_var() {
        env::set_var("HELIX_TEST_SIMPLE", "42");
        assert_eq!(expand("$HELIX_TEST_SIMPLE"), "42");
        env::remove_var("HELIX_TEST_SIMPLE");
    }

    #[test]
    fn braced_var() {
        env::set_var("HELIX_TEST_BRACED", "42");
        assert_eq!(expand("${HELIX_TEST_BRACED}x"), "42x");
        env::remove_var("HELIX_TEST_BRACED");
    }

    #[test]
    fn unknown_var_is_empty() {
        assert_eq!(expand("a$HELIX_TEST_NO_SUCH_VAR_b"), "a");
        assert_eq!(expand("a${HELIX_TEST_NO_SUCH_VAR}b"), "ab");
    }

    #[test]
    fn name_is_greedy() {
        env::set_var("HELIX_TEST_GREEDY", "v");
        // `$HELIX_TEST_GREEDYx` は変数 HELIX_TEST_GREEDYx（未定義）への参照
        assert_eq!(expand("$HELIX_TEST_GREEDYx"), "");
        assert_eq!(expand("${HELIX_TEST_GREEDY}x"), "vx");
        env::remove_var("HELIX_TEST_GREEDY");
    }

    #[test]
    fn dollar_without_name_is_literal() {
        assert_eq!(expand("$"), "$");
        assert_eq!(expand("$5"), "$5");
        assert_eq!(expand("a$ b"), "a$ b");
    }

    #[test]
    fn unclosed_brace_is_literal() {
        assert_eq!(expand("${OOPS"), "${OOPS");
    }

    #[test]
    fn no_recursive_expansion() {
        env::set_var("HELIX_TEST_OUTER", "$HELIX_TEST_INNER");
        env::set_var("HELIX_TEST_INNER", "nope");
        assert_eq!(expand("$HELIX_TEST_OUTER"), "$HELIX_TEST_INNER");
        env::remove_var("HELIX_TEST_OUTER");
        env::remove_var("HELIX_TEST_INNER");
    }

    #[test]
    fn multiple_refs_in_one_word() {
        env::set_var("HELIX_TEST_A", "1");
        env::set_var("HELIX_TEST_B", "2");
        assert_eq!(expand("$HELIX_TEST_A-${HELIX_TEST_B}"), "1-2");
        env::remove_var("HELIX_TEST_A");
        env::remove_var("HELIX_TEST_B");
    }
}
