//! 退避重试 + 网络恢复后重放的待重试队列

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::SlotIndex;

const MAX_REPLAY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

/// 重试结束时的失败；两种情况都原样保留最后一次的错误
#[derive(Debug)]
pub enum RetryError<E> {
    /// 不可重试的错误，立即放弃
    Aborted { attempt: u32, error: E },
    /// 用完了全部尝试次数
    Exhausted { attempts: u32, last: E },
}

impl RetryPolicy {
    /// 第 `attempt` 次（从 1 开始）失败后的等待：`initial * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_delay.saturating_mul(exp)
    }

    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(error) if !is_retryable(&error) => {
                    tracing::debug!(attempt, err = %error, "不可重试的错误，放弃");
                    return Err(RetryError::Aborted { attempt, error });
                }
                Err(last) if attempt >= max => {
                    tracing::warn!(attempts = attempt, err = %last, "重试次数已用完");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        err = %e,
                        "尝试失败，退避后重试"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTask {
    pub index: SlotIndex,
    pub url: String,
    /// 已经做过的重放次数
    pub attempt: u32,
    pub next_eligible: Instant,
}

/// 待重试队列；只由管理器 actor 持有和修改
#[derive(Debug, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    pending: VecDeque<RetryTask>,
    replaying: HashMap<SlotIndex, u32>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: VecDeque::new(),
            replaying: HashMap::new(),
        }
    }

    /// 同一索引只排队一次；返回是否新增
    pub fn enqueue(&mut self, index: SlotIndex, url: &str, now: Instant) -> bool {
        if let Some(task) = self.pending.iter_mut().find(|t| t.index == index) {
            task.url = url.to_owned();
            return false;
        }
        let attempt = self.replaying.remove(&index).map_or(0, |a| a.saturating_add(1));
        let delay = if attempt == 0 {
            Duration::ZERO
        } else {
            self.policy.delay_for(attempt).min(MAX_REPLAY_DELAY)
        };
        self.pending.push_back(RetryTask {
            index,
            url: url.to_owned(),
            attempt,
            next_eligible: now + delay,
        });
        true
    }

    /// 取出全部任务（FIFO）并记为重放中
    pub fn drain(&mut self) -> Vec<RetryTask> {
        let tasks: Vec<RetryTask> = self.pending.drain(..).collect();
        for t in &tasks {
            self.replaying.insert(t.index, t.attempt);
        }
        tasks
    }

    /// 成功、被取代或 slot 被回收时移除
    pub fn remove(&mut self, index: SlotIndex) {
        self.replaying.remove(&index);
        self.pending.retain(|t| t.index != index);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.replaying.clear();
    }
}
