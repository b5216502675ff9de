//! 输入/输出流共享的生命周期状态机。
//!
//! # 模块定位（Why）
//! - 流的收发可能长时间阻塞在限流等待或套接字上；`abort()` 与 `deactivate()` 必须能从另一个任务打断它们；
//! - 因此状态保存在 `tokio::sync::watch` 中，阻塞点通过 [`StreamLifecycle::interruptible`] 同时监听状态变化。
//!
//! # 状态（What）
//! ```text
//!            activate              abort
//! Inactive ───────────▶ Active ───────────▶ Aborted
//!    ▲                    │  ▲                 │
//!    └──── deactivate ────┘  └── clear_abort ──┘  (未激活过则回到 Inactive)
//! ```
//! - `abort` 可在任意状态调用；`deactivate` 幂等，且会一并清除中止标记；
//! - `clear_abort` 恢复中止前的状态：中止前已激活则回到 `Active`，否则回到 `Inactive`。

use std::{future::Future, sync::Arc};

use tokio::sync::watch;
use tracing::info;

use crate::{error::StreamError, layer::LayerInfo};

/// 对外可见的生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationState {
    Inactive,
    Active,
    Aborted,
}

/// 内部相位：激活与中止相互独立，`clear_abort` 据此恢复中止前的状态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Phase {
    activated: bool,
    aborted: bool,
}

impl Phase {
    fn state(self) -> ActivationState {
        if self.aborted {
            ActivationState::Aborted
        } else if self.activated {
            ActivationState::Active
        } else {
            ActivationState::Inactive
        }
    }
}

/// 一条流的生命周期。
#[derive(Debug)]
pub struct StreamLifecycle {
    name: String,
    phase: watch::Sender<Phase>,
}

impl StreamLifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        let (phase, _rx) = watch::channel(Phase::default());
        Self {
            name: name.into(),
            phase,
        }
    }

    /// 用于日志的流名称。
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActivationState {
        self.phase.borrow().state()
    }

    /// 进入 `Active`。已激活（且未中止）时返回 [`StreamError::AlreadyActivated`]。
    pub fn mark_activated(&self) -> Result<(), StreamError> {
        let mut outcome = Ok(());
        self.phase.send_if_modified(|phase| {
            if phase.state() == ActivationState::Active {
                outcome = Err(StreamError::AlreadyActivated);
                return false;
            }
            *phase = Phase {
                activated: true,
                aborted: false,
            };
            true
        });
        if outcome.is_ok() {
            info!(stream = %self.name, "stream activated");
        }
        outcome
    }

    /// 回到 `Inactive`；重复调用无副作用。
    pub fn deactivate(&self) {
        let changed = self.phase.send_if_modified(|phase| {
            let previous = *phase;
            *phase = Phase::default();
            previous != *phase
        });
        if changed {
            info!(stream = %self.name, "stream deactivated");
        }
    }

    /// 进入 `Aborted`，阻塞中的收发立即返回 [`StreamError::Aborted`]。
    pub fn abort(&self) {
        let changed = self.phase.send_if_modified(|phase| {
            let previous = phase.aborted;
            phase.aborted = true;
            !previous
        });
        if changed {
            info!(stream = %self.name, "stream aborted");
        }
    }

    /// 清除中止标记，恢复中止前的状态。
    pub fn clear_abort(&self) {
        let changed = self.phase.send_if_modified(|phase| {
            let previous = phase.aborted;
            phase.aborted = false;
            previous
        });
        if changed {
            info!(stream = %self.name, state = ?self.state(), "stream abort cleared");
        }
    }

    /// 收发的前置检查。
    pub fn ensure_active(&self) -> Result<(), StreamError> {
        match self.state() {
            ActivationState::Active => Ok(()),
            other => Err(interruption(other)),
        }
    }

    /// 在流保持 `Active` 期间驱动 `operation`。
    ///
    /// # 契约说明（What）
    /// - 调用时流不处于 `Active`：立即返回错误，`operation` 不会被轮询；
    /// - 等待期间流被中止：返回 [`StreamError::Aborted`]；被去激活：返回 [`StreamError::NotActivated`]；
    /// - 状态检查优先于 `operation`（`biased`），保证中止后不会再完成一次收发。
    pub async fn interruptible<T, F>(&self, operation: F) -> Result<T, StreamError>
    where
        F: Future<Output = Result<T, StreamError>>,
    {
        let mut rx = self.phase.subscribe();
        let operation = std::pin::pin!(operation);
        tokio::select! {
            biased;
            changed = rx.wait_for(|phase| phase.state() != ActivationState::Active) => {
                match changed {
                    Ok(phase) => Err(interruption(phase.state())),
                    Err(_) => Err(StreamError::NotActivated),
                }
            }
            result = operation => result,
        }
    }
}

fn interruption(state: ActivationState) -> StreamError {
    match state {
        ActivationState::Aborted => StreamError::Aborted,
        _ => StreamError::NotActivated,
    }
}

/// 可跨任务持有的控制句柄。
///
/// 拥有流的任务阻塞在 `read`/`write` 中时，其他任务经由句柄中止或去激活它。
#[derive(Clone, Debug)]
pub struct StreamHandle {
    lifecycle: Arc<StreamLifecycle>,
}

impl StreamHandle {
    pub(crate) fn new(lifecycle: Arc<StreamLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn abort(&self) {
        self.lifecycle.abort();
    }

    pub fn clear_abort(&self) {
        self.lifecycle.clear_abort();
    }

    pub fn deactivate(&self) {
        self.lifecycle.deactivate();
    }

    pub fn state(&self) -> ActivationState {
        self.lifecycle.state()
    }
}

/// 解析激活时的动态批大小：`0` 取层的最大批大小，超出上限为配置错误。
pub(crate) fn resolve_batch_size(layer: &LayerInfo, requested: u16) -> Result<u16, StreamError> {
    match requested {
        0 => Ok(layer.max_batch_size),
        size if size > layer.max_batch_size => Err(StreamError::InvalidConfiguration(format!(
            "dynamic batch size {size} exceeds the maximum of {} for layer `{}`",
            layer.max_batch_size, layer.name
        ))),
        size => Ok(size),
    }
}
