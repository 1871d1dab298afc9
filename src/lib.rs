//! helix ライブラリ — ベンチマーク・テスト用にモジュールを公開する。
//!
//! バイナリ本体は `main.rs` の REPL ループ。
//! この `lib.rs` は `benches/bench_main.rs` や `tests/` から
//! パーサー・ビルトイン・スポーン機能に直接アクセスするために存在する。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`parser`] | 構文解析（トークナイザ + パーサー: パイプライン、リダイレクト、クォート、エスケープ、`&`） |
//! | [`expand`] | 変数展開（`$VAR` / `${VAR}`） |
//! | [`resolve`] | 実行ファイル解決（PATH 検索、実行可否の判定） |
//! | [`executor`] | コマンド実行（fd 計画、パイプライン接続、プロセスグループ管理、ビルトイン分岐） |
//! | [`spawn`] | `posix_spawn` ラッパー（外部コマンド起動） |
//! | [`job`] | ジョブコントロール（ジョブテーブル、フォアグラウンド待機、reap、完了通知、ターミナル制御） |
//! | [`signal`] | シグナルルータ（SIGCHLD → self-pipe、シェルのシグナル設定） |
//! | [`builtins`] | ビルトイン（`cd`, `pwd`, `exit`, `history`, `export`, `jobs`, `fg`, `bg`） |
//! | [`shell`] | シェルのグローバル状態（cwd、終了ステータス、履歴、ジョブテーブル） |
//! | [`history`] | コマンド履歴（インメモリのリングバッファ） |
//! | [`prompt`] | プロンプト描画（ステータスアイコン、user@host、git ブランチ） |

pub mod builtins;
pub mod executor;
pub mod expand;
pub mod history;
pub mod job;
pub mod parser;
pub mod prompt;
pub mod resolve;
pub mod shell;
pub mod signal;
pub mod spawn;
