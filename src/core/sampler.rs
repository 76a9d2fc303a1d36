//! 加權抽樣：從相關 header 的訂閱者中挑出最多 `n` 位不重複的使用者。
//!
//! 權重越低越優先。有上限的訂閱者依「本月已寄送數 / 上限」計算，
//! 還沒收過訊息的人權重最低；不限的訂閱者取有上限者的中位數。
//! 訂閱「全部」的 catch-all header 會再乘上懲罰係數。
//! 抽樣時以權重的倒數做累積分佈，抽中後從候選中移除。

use crate::core::directory::Directory;
use crate::domain::model::Subscriber;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// catch-all 訂閱者的預設懲罰係數
pub const DEFAULT_CATCH_ALL_PENALTY: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPolicy {
    /// catch-all 訂閱者的權重乘數，至少為 1
    pub catch_all_penalty: f64,
}

impl SamplingPolicy {
    pub fn new(catch_all_penalty: f64) -> Self {
        Self {
            catch_all_penalty: if catch_all_penalty.is_finite() {
                catch_all_penalty.max(1.0)
            } else {
                DEFAULT_CATCH_ALL_PENALTY
            },
        }
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CATCH_ALL_PENALTY)
    }
}

/// 抽樣期間的候選人
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub subscriber: &'a Subscriber,
    /// 套用 catch-all 懲罰之前的權重
    pub base_weight: f64,
    pub is_catch_all: bool,
}

impl Candidate<'_> {
    pub fn weight(&self, policy: &SamplingPolicy) -> f64 {
        if self.is_catch_all {
            self.base_weight * policy.catch_all_penalty
        } else {
            self.base_weight
        }
    }
}

/// 有上限訂閱者的權重，一律大於等於 1
pub fn limited_weight(count: u32, limit: u32) -> f64 {
    let raw = if count == 0 || limit == 0 {
        0.0
    } else {
        f64::from(count) / f64::from(limit)
    };
    raw + 1.0
}

pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[middle - 1] + values[middle]) / 2.0)
    } else {
        Some(values[middle])
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeightedSampler {
    policy: SamplingPolicy,
}

impl WeightedSampler {
    pub fn new(policy: SamplingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    /// 收集所有未達上限的候選人並計算權重
    pub fn candidates<'a>(
        &self,
        directory: &'a Directory,
        headers: &[String],
        catch_all: Option<&str>,
    ) -> Vec<Candidate<'a>> {
        let catch_all = catch_all.filter(|header| !header.is_empty());
        let mut limited = Vec::new();
        let mut unlimited = Vec::new();

        for header in headers {
            let is_catch_all = catch_all == Some(header.as_str());
            for subscriber in directory.subscribers(header) {
                if directory.exceeds_limit(subscriber) {
                    continue;
                }
                match subscriber.limit {
                    Some(limit) => limited.push(Candidate {
                        subscriber,
                        base_weight: limited_weight(directory.count_for(subscriber), limit),
                        is_catch_all,
                    }),
                    None => unlimited.push((subscriber, is_catch_all)),
                }
            }
        }

        if !unlimited.is_empty() {
            let mut weights: Vec<f64> = limited.iter().map(|c| c.base_weight).collect();
            let base_weight = median(&mut weights).unwrap_or(1.0);
            limited.extend(
                unlimited
                    .into_iter()
                    .map(|(subscriber, is_catch_all)| Candidate {
                        subscriber,
                        base_weight,
                        is_catch_all,
                    }),
            );
        }

        limited
    }

    /// 每次呼叫都重新取種子，避免同一輪的多次大批抽樣彼此相關
    pub fn sample(
        &self,
        directory: &Directory,
        headers: &[String],
        catch_all: Option<&str>,
        n: usize,
    ) -> Vec<Subscriber> {
        let mut rng = StdRng::from_os_rng();
        self.sample_with_rng(directory, headers, catch_all, n, &mut rng)
    }

    pub fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        directory: &Directory,
        headers: &[String],
        catch_all: Option<&str>,
        n: usize,
        rng: &mut R,
    ) -> Vec<Subscriber> {
        let mut working = self.candidates(directory, headers, catch_all);
        working.sort_by(|a, b| a.weight(&self.policy).total_cmp(&b.weight(&self.policy)));

        let distinct: HashSet<&str> = working
            .iter()
            .map(|c| c.subscriber.username.as_str())
            .collect();
        if distinct.len() <= n {
            let mut seen = HashSet::new();
            return working
                .into_iter()
                .filter(|c| seen.insert(c.subscriber.username.as_str()))
                .map(|c| c.subscriber.clone())
                .collect();
        }

        let mut selected = Vec::with_capacity(n);
        let mut seen = HashSet::new();
        let mut cumulative = Vec::with_capacity(working.len());

        while selected.len() < n {
            cumulative.clear();
            let mut total = 0.0;
            for candidate in &working {
                total += 1.0 / candidate.weight(&self.policy);
                cumulative.push(total);
            }

            let target = rng.random::<f64>() * total;
            let index = cumulative.partition_point(|&value| value <= target);
            if index >= working.len() {
                tracing::warn!(
                    "⚠️ Exhausted search space while sampling, asked for {} and got {}",
                    n,
                    selected.len()
                );
                break;
            }

            let candidate = working.remove(index);
            if seen.insert(candidate.subscriber.username.as_str()) {
                selected.push(candidate.subscriber.clone());
            }
        }

        selected
    }
}
