//! App - アプリケーション層
//!
//! ports と queue の部品を組み合わせて、ジョブのライフサイクルを駆動する。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: 構築とワイヤリング（起動時検証）
//! - **JobOrchestrator**: submit / 実行 / リトライ / 補償 / ステータス照会

pub mod builder;
pub mod orchestrator;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::orchestrator::JobOrchestrator;
