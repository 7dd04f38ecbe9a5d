//! 操作（Operation）
//!
//! `Common` 接口上的每一次调用都被规整为一个 `Operation`：频道与分区立即执行，
//! `When` 则把它记录进 `Replay`，在触发时对目标重新执行。
//!
use crate::channel::{Channel, Payload};
use crate::error::BusResult;
use crate::forwarding::Forwarder;
use crate::subscriber::{Response, Subscriber, Unsubscription};
use std::fmt;
use std::rc::Rc;

/// 请求/响应回调，收到一次发布的全部答复
pub type ResponseCallback = Rc<dyn Fn(Vec<Response>)>;

pub enum Operation<T> {
    Bubble(bool),
    Clear,
    Cycle { limit: usize, step: usize },
    Enable(bool),
    Forward(Vec<Forwarder<T>>),
    Publish {
        data: Rc<T>,
        callback: Option<ResponseCallback>,
    },
    Reset,
    Retain(usize),
    Shuffle(usize),
    Subscribe(Vec<Subscriber<T>>),
    Toggle,
    Unsubscribe(Unsubscription<T>),
}

impl<T: 'static> Operation<T> {
    /// 依次作用于每个频道；发布时跨频道汇总答复后只回调一次
    pub(crate) fn apply(&self, channels: &[Channel<T>]) -> BusResult<()> {
        if let Operation::Publish { data, callback } = self {
            let responses = Self::collect(data.clone(), channels)?;
            if let Some(callback) = callback {
                callback(responses);
            }
            return Ok(());
        }
        for channel in channels {
            let cell = channel.cell();
            match self {
                Operation::Bubble(value) => cell.bubble(*value)?,
                Operation::Clear => cell.clear()?,
                Operation::Cycle { limit, step } => cell.cycle(*limit, *step)?,
                Operation::Enable(value) => cell.enable(*value)?,
                Operation::Forward(forwarders) => cell.forward(forwarders)?,
                Operation::Reset => cell.reset()?,
                Operation::Retain(limit) => cell.retain(*limit)?,
                Operation::Shuffle(limit) => cell.shuffle(*limit)?,
                Operation::Subscribe(subscribers) => cell.subscribe(subscribers)?,
                Operation::Toggle => cell.toggle()?,
                Operation::Unsubscribe(unsubscription) => cell.unsubscribe(unsubscription)?,
                Operation::Publish { .. } => {}
            }
        }
        Ok(())
    }

    /// 向每个频道发布同一份数据并收集答复；某个频道被中止不影响其余频道
    pub(crate) fn collect(data: Rc<T>, channels: &[Channel<T>]) -> BusResult<Vec<Response>> {
        let mut responses = Vec::new();
        for channel in channels {
            channel
                .cell()
                .publish(Payload::Data(data.clone()), &mut |response: Response| {
                    responses.push(response)
                })?;
        }
        Ok(responses)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Bubble(_) => "bubble",
            Operation::Clear => "clear",
            Operation::Cycle { .. } => "cycle",
            Operation::Enable(_) => "enable",
            Operation::Forward(_) => "forward",
            Operation::Publish { .. } => "publish",
            Operation::Reset => "reset",
            Operation::Retain(_) => "retain",
            Operation::Shuffle(_) => "shuffle",
            Operation::Subscribe(_) => "subscribe",
            Operation::Toggle => "toggle",
            Operation::Unsubscribe(_) => "unsubscribe",
        }
    }
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        match self {
            Operation::Bubble(value) => Operation::Bubble(*value),
            Operation::Clear => Operation::Clear,
            Operation::Cycle { limit, step } => Operation::Cycle {
                limit: *limit,
                step: *step,
            },
            Operation::Enable(value) => Operation::Enable(*value),
            Operation::Forward(forwarders) => Operation::Forward(forwarders.clone()),
            Operation::Publish { data, callback } => Operation::Publish {
                data: data.clone(),
                callback: callback.clone(),
            },
            Operation::Reset => Operation::Reset,
            Operation::Retain(limit) => Operation::Retain(*limit),
            Operation::Shuffle(limit) => Operation::Shuffle(*limit),
            Operation::Subscribe(subscribers) => Operation::Subscribe(subscribers.clone()),
            Operation::Toggle => Operation::Toggle,
            Operation::Unsubscribe(unsubscription) => {
                Operation::Unsubscribe(unsubscription.clone())
            }
        }
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Bubble(value) => f.debug_tuple("Bubble").field(value).finish(),
            Operation::Cycle { limit, step } => f
                .debug_struct("Cycle")
                .field("limit", limit)
                .field("step", step)
                .finish(),
            Operation::Enable(value) => f.debug_tuple("Enable").field(value).finish(),
            Operation::Forward(forwarders) => f.debug_tuple("Forward").field(forwarders).finish(),
            Operation::Publish { callback, .. } => f
                .debug_struct("Publish")
                .field("callback", &callback.is_some())
                .finish_non_exhaustive(),
            Operation::Retain(limit) => f.debug_tuple("Retain").field(limit).finish(),
            Operation::Shuffle(limit) => f.debug_tuple("Shuffle").field(limit).finish(),
            Operation::Subscribe(subscribers) => {
                f.debug_tuple("Subscribe").field(subscribers).finish()
            }
            Operation::Unsubscribe(unsubscription) => f
                .debug_struct("Unsubscribe")
                .field("predicates", &unsubscription.len())
                .finish(),
            Operation::Clear => f.write_str("Clear"),
            Operation::Reset => f.write_str("Reset"),
            Operation::Toggle => f.write_str("Toggle"),
        }
    }
}

/// 按调用顺序记录的操作序列
pub(crate) struct Replay<T> {
    recordings: Vec<Operation<T>>,
}

impl<T: 'static> Replay<T> {
    pub(crate) fn new() -> Self {
        Self {
            recordings: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, operation: Operation<T>) {
        tracing::trace!(operation = operation.name(), "operation recorded");
        self.recordings.push(operation);
    }

    pub(crate) fn len(&self) -> usize {
        self.recordings.len()
    }

    /// 拷贝出当前记录，执行期间不占用借用
    pub(crate) fn snapshot(&self) -> Vec<Operation<T>> {
        self.recordings.clone()
    }

    /// 按记录顺序对目标执行全部操作，遇到错误即停止
    pub(crate) fn replay(operations: &[Operation<T>], targets: &[Channel<T>]) -> BusResult<()> {
        operations
            .iter()
            .try_for_each(|operation| operation.apply(targets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::subscriber::Reply;
    use std::cell::RefCell;

    fn recording_bus() -> (Bus<i32>, Rc<RefCell<Vec<(String, i32)>>>) {
        let bus = Bus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for name in ["a", "b"] {
            let sink = seen.clone();
            bus.channel(name)
                .cell()
                .subscribe(&[Subscriber::listen(move |data: &i32, message| {
                    sink.borrow_mut()
                        .push((message.destination().to_string(), *data))
                })])
                .unwrap();
        }
        (bus, seen)
    }

    #[test]
    fn publish_collects_across_channels_and_calls_back_once() {
        let bus = Bus::<i32>::new();
        for (name, value) in [("a", 1), ("b", 2)] {
            bus.channel(name)
                .cell()
                .subscribe(&[Subscriber::new(move |_: &i32, _| Ok(Reply::value(value)))])
                .unwrap();
        }
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        let operation = Operation::Publish {
            data: Rc::new(0),
            callback: Some(Rc::new(move |responses: Vec<Response>| {
                let values: Vec<i32> = responses
                    .iter()
                    .filter_map(|r| r.downcast_ref::<i32>().copied())
                    .collect();
                sink.borrow_mut().push(values);
            })),
        };

        operation
            .apply(&[bus.channel("a"), bus.channel("b")])
            .unwrap();
        assert_eq!(*calls.borrow(), vec![vec![1, 2]]);
    }

    #[test]
    fn replay_runs_recordings_in_order() {
        let (bus, seen) = recording_bus();
        let mut replay = Replay::new();
        replay.record(Operation::Publish {
            data: Rc::new(1),
            callback: None,
        });
        replay.record(Operation::Enable(false));
        replay.record(Operation::Publish {
            data: Rc::new(2),
            callback: None,
        });
        assert_eq!(replay.len(), 3);

        let targets = [bus.channel("a"), bus.channel("b")];
        Replay::replay(&replay.snapshot(), &targets).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![("a".to_string(), 1), ("b".to_string(), 1)]
        );
        assert!(!targets[0].enabled().unwrap());
    }

    #[test]
    fn clone_shares_payload() {
        let operation = Operation::<i32>::Publish {
            data: Rc::new(7),
            callback: None,
        };
        let copy = operation.clone();
        match (&operation, &copy) {
            (Operation::Publish { data: a, .. }, Operation::Publish { data: b, .. }) => {
                assert!(Rc::ptr_eq(a, b))
            }
            _ => unreachable!(),
        }
        assert_eq!(copy.name(), "publish");
    }
}
