//! タスクモジュール
//!
//! 各タスクの実装を分離して管理します。

pub mod led;
pub mod supervisor;
pub mod telemetry;

// タスク関数を再エクスポート
pub use led::led_task;
pub use supervisor::supervisor_task;
pub use telemetry::telemetry_task;
