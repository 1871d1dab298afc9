//! トークナイザ + パーサー: 入力文字列からパイプライン AST を構築する。
//!
//! 3 状態（`Normal` / `InDouble` / `InSingle`）のステートマシンでトークン列を
//! 生成し、ループベースのパーサーで [`Pipeline`] AST に変換する。
//!
//! ## 対応構文
//!
//! - パイプライン: `cmd1 | cmd2 | cmd3`
//! - リダイレクト: `<`, `>`, `>>`, `2>`, `2>>`
//! - バックグラウンド: 末尾の `&`
//! - クォート: シングル (`'...'`) / ダブル (`"..."`)、エスケープ (`\x`)
//! - `;` は行末としてのみ受理（複文は未対応）
//!
//! ## トークナイザの規約
//!
//! - 演算子は最長一致（`2>>` > `>>` > `2>` > 1 文字）で、単語の途中でも
//!   認識される（`ls>out` → `ls`, `>`, `out`）。
//! - `2>` / `2>>` は `2` の直後に `>` が続く場合のみ演算子。それ以外の `2` は
//!   通常の文字（`echo 2 3` の `2` は引数）。
//! - シングルクォートを含んだ単語は [`Word::literal`] が立ち、後段の変数展開
//!   （[`crate::expand`]）が抑止される。
//! - トークナイザ自体は失敗しない。閉じられていないクォートはベストエフォート
//!   のトークン列と一緒に報告され、パーサーが構文エラーとして棄却する。

use std::fmt;
use std::mem;

// ── AST ─────────────────────────────────────────────────────────────

/// パイプラインで接続されたコマンド列。`cmd1 | cmd2 | cmd3` → 3要素。
#[derive(Debug, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    /// 末尾に `&` が付いていたか。
    pub background: bool,
}

/// 単一コマンド。引数リストとリダイレクト指定を持つ。
///
/// 同種のリダイレクトが複数指定された場合は最後の指定が有効（bash 互換）。
#[derive(Debug, Default, PartialEq)]
pub struct Command {
    pub argv: Vec<Word>,
    /// `<` — stdin をファイルから読み取り。
    pub stdin_file: Option<Word>,
    /// `>` / `>>` — stdout の書き込み先。
    pub stdout_file: Option<Word>,
    /// `stdout_file` 使用時、`>>`（追記）なら `true`。
    pub stdout_append: bool,
    /// `2>` / `2>>` — stderr の書き込み先。
    pub stderr_file: Option<Word>,
    /// `stderr_file` 使用時、`2>>`（追記）なら `true`。
    pub stderr_append: bool,
}

impl Command {
    fn has_redirect(&self) -> bool {
        self.stdin_file.is_some() || self.stdout_file.is_some() || self.stderr_file.is_some()
    }
}

/// 1 単語。クォート除去・エスケープ解決済みのテキストを持つ。
///
/// `literal` はトークナイザが付けるフラグで、単語がシングルクォート区間を
/// 含んでいた場合に立つ。立っている単語は変数展開されない。
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub literal: bool,
}

impl Word {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), literal: false }
    }
}

// ── Error ───────────────────────────────────────────────────────────

/// パース時に発生しうるエラー。
#[derive(Debug, PartialEq)]
pub enum ParseError {
    /// クォートが閉じられていない。引数は開始クォート文字（`'` or `"`）。
    UnterminatedQuote(char),
    /// リダイレクト演算子の後にターゲットファイル名がない。
    MissingRedirectTarget,
    /// パイプラインのステージにコマンドがない（`| ls`, `ls |`, `> f` 等）。
    EmptyPipelineSegment,
    /// `&` の後に余分なトークンがある（`ls & pwd` 等）。
    UnexpectedAfterBackground,
    /// 行末に余分なトークンがある（`ls ; pwd` 等）。
    UnexpectedToken(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedQuote(c) => {
                write!(f, "unexpected EOF while looking for matching `{c}`")
            }
            Self::MissingRedirectTarget => write!(f, "syntax error: missing redirect target"),
            Self::EmptyPipelineSegment => write!(f, "syntax error near unexpected token `|`"),
            Self::UnexpectedAfterBackground => {
                write!(f, "syntax error: unexpected token after `&`")
            }
            Self::UnexpectedToken(t) => write!(f, "syntax error near unexpected token `{t}`"),
        }
    }
}

// ── Tokenizer (crate-private) ───────────────────────────────────────

/// トークナイザが生成する内部トークン型。
#[derive(Debug, PartialEq)]
enum Token {
    Word(Word),
    Pipe,
    RedirectIn,
    RedirectOut,
    RedirectOutAppend,
    RedirectErr,
    RedirectErrAppend,
    Background,
    Semicolon,
    End,
}

impl Token {
    /// エラーメッセージ表示用の字句。
    fn lexeme(&self) -> &str {
        match self {
            Token::Word(w) => &w.text,
            Token::Pipe => "|",
            Token::RedirectIn => "<",
            Token::RedirectOut => ">",
            Token::RedirectOutAppend => ">>",
            Token::RedirectErr => "2>",
            Token::RedirectErrAppend => "2>>",
            Token::Background => "&",
            Token::Semicolon => ";",
            Token::End => "newline",
        }
    }
}

/// トークナイズ結果。`unclosed` は閉じられなかったクォート文字。
struct Tokenized {
    tokens: Vec<Token>,
    unclosed: Option<char>,
}

/// ステートマシンの状態。
enum State {
    Normal,
    InDouble,
    InSingle,
}

/// 位置 `i` から演算子の最長一致を試みる。ヒットすればトークンと消費文字数。
fn match_operator(chars: &[char], i: usize) -> Option<(Token, usize)> {
    match chars[i] {
        '2' if chars.get(i + 1) == Some(&'>') => {
            if chars.get(i + 2) == Some(&'>') {
                Some((Token::RedirectErrAppend, 3))
            } else {
                Some((Token::RedirectErr, 2))
            }
        }
        '>' => {
            if chars.get(i + 1) == Some(&'>') {
                Some((Token::RedirectOutAppend, 2))
            } else {
                Some((Token::RedirectOut, 1))
            }
        }
        '<' => Some((Token::RedirectIn, 1)),
        '|' => Some((Token::Pipe, 1)),
        '&' => Some((Token::Background, 1)),
        ';' => Some((Token::Semicolon, 1)),
        _ => None,
    }
}

/// 入力文字列をトークン列に変換する。失敗しない。
fn tokenize(input: &str) -> Tokenized {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();

    let mut tokens = Vec::new();
    let mut word = String::new();
    // クォート（空文字列含む）を見た単語は空でも WORD として確定させる
    let mut quoted = false;
    let mut literal = false;
    let mut state = State::Normal;
    let mut i = 0;

    // 蓄積中の単語を WORD トークンとして確定する
    macro_rules! flush {
        () => {
            if !word.is_empty() || quoted {
                tokens.push(Token::Word(Word { text: mem::take(&mut word), literal }));
            }
            quoted = false;
            literal = false;
        };
    }

    while i < len {
        let c = chars[i];
        match state {
            State::Normal => {
                if c.is_whitespace() {
                    flush!();
                    i += 1;
                } else if c == '\'' {
                    state = State::InSingle;
                    quoted = true;
                    literal = true;
                    i += 1;
                } else if c == '"' {
                    state = State::InDouble;
                    quoted = true;
                    i += 1;
                } else if c == '\\' {
                    // 次の 1 文字をそのまま採用。行末の `\` は捨てる。
                    if i + 1 < len {
                        word.push(chars[i + 1]);
                        i += 2;
                    } else {
                        i += 1;
                    }
                } else if let Some((tok, n)) = match_operator(&chars, i) {
                    flush!();
                    tokens.push(tok);
                    i += n;
                } else {
                    word.push(c);
                    i += 1;
                }
            }
            State::InDouble => {
                if c == '"' {
                    state = State::Normal;
                    i += 1;
                } else if c == '\\'
                    && matches!(chars.get(i + 1), Some('"') | Some('\\') | Some('$'))
                {
                    word.push(chars[i + 1]);
                    i += 2;
                } else {
                    word.push(c);
                    i += 1;
                }
            }
            State::InSingle => {
                if c == '\'' {
                    state = State::Normal;
                    i += 1;
                } else {
                    word.push(c);
                    i += 1;
                }
            }
        }
    }

    let unclosed = match state {
        State::Normal => None,
        State::InDouble => Some('"'),
        State::InSingle => Some('\''),
    };

    flush!();
    tokens.push(Token::End);

    Tokenized { tokens, unclosed }
}

// ── Parser ──────────────────────────────────────────────────────────

/// 入力文字列をパースして [`Pipeline`] を返す。
///
/// - 空入力（空白のみ含む） → `Ok(None)`
/// - 正常なコマンド → `Ok(Some(Pipeline))`
/// - 構文エラー → `Err(ParseError)`
pub fn parse(input: &str) -> Result<Option<Pipeline>, ParseError> {
    let Tokenized { tokens, unclosed } = tokenize(input);
    if let Some(q) = unclosed {
        return Err(ParseError::UnterminatedQuote(q));
    }

    let mut commands: Vec<Command> = Vec::new();
    let mut cur = Command::default();
    let mut pos = 0;

    // ── ステージ列: stage ( "|" stage )* ──
    loop {
        // 1 ステージ分の WORD / リダイレクトを集める
        loop {
            match &tokens[pos] {
                Token::Word(w) => {
                    cur.argv.push(w.clone());
                    pos += 1;
                }
                Token::RedirectIn
                | Token::RedirectOut
                | Token::RedirectOutAppend
                | Token::RedirectErr
                | Token::RedirectErrAppend => {
                    let target = match tokens.get(pos + 1) {
                        Some(Token::Word(w)) => w.clone(),
                        _ => return Err(ParseError::MissingRedirectTarget),
                    };
                    match &tokens[pos] {
                        Token::RedirectIn => cur.stdin_file = Some(target),
                        Token::RedirectOut => {
                            cur.stdout_file = Some(target);
                            cur.stdout_append = false;
                        }
                        Token::RedirectOutAppend => {
                            cur.stdout_file = Some(target);
                            cur.stdout_append = true;
                        }
                        Token::RedirectErr => {
                            cur.stderr_file = Some(target);
                            cur.stderr_append = false;
                        }
                        _ => {
                            cur.stderr_file = Some(target);
                            cur.stderr_append = true;
                        }
                    }
                    pos += 2;
                }
                _ => break,
            }
        }

        if matches!(tokens[pos], Token::Pipe) {
            // リダイレクトだけのステージもコマンド欠落として扱う
            if cur.argv.is_empty() {
                return Err(ParseError::EmptyPipelineSegment);
            }
            commands.push(mem::take(&mut cur));
            pos += 1;
        } else {
            break;
        }
    }

    // ── 最終ステージの確定 ──
    if cur.argv.is_empty() {
        if commands.is_empty() && !cur.has_redirect() {
            if matches!(tokens[pos], Token::End) {
                return Ok(None); // 空入力
            }
            // `&` 単独など、コマンドのない行
            return Err(ParseError::EmptyPipelineSegment);
        }
        // 末尾パイプ or リダイレクトのみ（コマンドなし）
        return Err(ParseError::EmptyPipelineSegment);
    }
    commands.push(cur);

    // ── line := pipeline ( "&" )? ( ";" )? END ──
    let mut background = false;
    if matches!(tokens[pos], Token::Background) {
        background = true;
        pos += 1;
        if !matches!(tokens[pos], Token::End) {
            return Err(ParseError::UnexpectedAfterBackground);
        }
    } else if matches!(tokens[pos], Token::Semicolon) {
        pos += 1;
        if !matches!(tokens[pos], Token::End) {
            return Err(ParseError::UnexpectedToken(tokens[pos].lexeme().to_string()));
        }
    } else if !matches!(tokens[pos], Token::End) {
        return Err(ParseError::UnexpectedToken(tokens[pos].lexeme().to_string()));
    }

    Ok(Some(Pipeline { commands, background }))
}

// ── Tests ───────────────────────────────────────────────────────────
