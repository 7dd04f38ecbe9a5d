//! 投递策略（Delivery Strategy）
//!
//! 频道未设置策略时投递给全部订阅者；`cycle` 按游标轮转选择窗口，`shuffle` 每次随机
//! 选择互不重复的若干订阅者。
//!
use rand::seq::index;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Strategy {
    Cycle {
        limit: usize,
        step: usize,
        cursor: usize,
    },
    Shuffle {
        limit: usize,
    },
}

impl Strategy {
    /// `limit == 0` 表示清除策略；`step == 0` 时步长取 `limit`
    pub(crate) fn cycle(limit: usize, step: usize) -> Option<Self> {
        (limit > 0).then(|| Strategy::Cycle {
            limit,
            step: if step > 0 { step } else { limit },
            cursor: 0,
        })
    }

    pub(crate) fn shuffle(limit: usize) -> Option<Self> {
        (limit > 0).then_some(Strategy::Shuffle { limit })
    }

    /// 从有序订阅者列表中选出本次投递的子集
    pub(crate) fn select<S: Clone>(&mut self, items: &[S]) -> Vec<S> {
        let length = items.len();
        if length == 0 {
            return Vec::new();
        }
        match self {
            Strategy::Cycle {
                limit,
                step,
                cursor,
            } => {
                let start = *cursor % length;
                let selected = (0..(*limit).min(length))
                    .map(|offset| items[(start + offset) % length].clone())
                    .collect();
                *cursor = cursor.wrapping_add(*step);
                selected
            }
            Strategy::Shuffle { limit } => {
                let count = (*limit).min(length);
                index::sample(&mut rand::thread_rng(), length, count)
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect()
            }
        }
    }
}
