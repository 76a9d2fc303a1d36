use crate::domain::model::{CounterMap, CounterSnapshot};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

/// 目前月份，格式 `YYYY-MM`
pub fn current_month_tag() -> String {
    month_tag(Utc::now())
}

pub fn month_tag(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// 每個 (header, username) 本月已寄送的訊息數
///
/// 所有讀-改-寫都在同一把鎖內完成。
#[derive(Debug, Default)]
pub struct SendCounter {
    counts: Mutex<CounterMap>,
}

impl SendCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn counts(&self) -> MutexGuard<'_, CounterMap> {
        // 計數器裡只有整數，鎖中毒時資料仍然可用
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, header: &str, username: &str) -> u32 {
        self.counts()
            .get(header)
            .and_then(|users| users.get(username))
            .copied()
            .unwrap_or(0)
    }

    /// 回傳遞增後的值
    pub fn increment(&self, header: &str, username: &str) -> u32 {
        let mut counts = self.counts();
        let count = counts
            .entry(header.to_string())
            .or_default()
            .entry(username.to_string())
            .or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// 沒有對應的遞增時什麼都不做，回傳 `None`
    pub fn decrement(&self, header: &str, username: &str) -> Option<u32> {
        let mut counts = self.counts();
        let count = counts.get_mut(header)?.get_mut(username)?;
        if *count == 0 {
            return None;
        }
        *count -= 1;
        Some(*count)
    }

    /// 月份相符才載入；否則清空，視為新的月份。回傳是否有載入。
    pub fn load(&self, snapshot: CounterSnapshot, current_month: &str) -> bool {
        let mut counts = self.counts();
        if snapshot.month == current_month {
            *counts = snapshot.headers;
            true
        } else {
            tracing::info!(
                "🗓️ Sent counts are for {} but it is now {}, starting a fresh month",
                snapshot.month,
                current_month
            );
            counts.clear();
            false
        }
    }

    pub fn snapshot(&self, current_month: &str) -> CounterSnapshot {
        CounterSnapshot {
            month: current_month.to_string(),
            headers: self.counts().clone(),
        }
    }
}
