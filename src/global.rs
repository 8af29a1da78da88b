//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 全局准入引擎
//!
//! 提供进程级共享的 [`Engine`] 实例。实例在第一次访问时创建，之后一直存在。
//! 需要隔离的场景（例如测试）可以直接构造独立的 `Engine`。

use crate::engine::Engine;

lazy_static::lazy_static! {
    /// 全局准入引擎实例
    static ref GLOBAL_ENGINE: Engine = Engine::new();
}

/// 获取全局准入引擎
///
/// # 示例
/// ```rust
/// use flowgate::prelude::*;
///
/// let token = flowgate::global()
///     .enter("global-demo", EntryType::Outbound, 1, vec![])
///     .unwrap();
/// flowgate::global().complete(token);
/// ```
pub fn global() -> &'static Engine {
    &GLOBAL_ENGINE
}
