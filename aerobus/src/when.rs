//! `when` 组合器
//!
//! `When` 观察一个或多个源频道；对它调用的 `Common` 操作不会立即执行，而是被记录下来，
//! 在源频道出现满足条件的发布时对目标（频道或分区）整体重放。
//!
//! 多个源时按源计数：每个源各自累计满足条件的发布次数，
//! 每当所有源计数的最小值增长一次，就重放一次。
//!
use crate::bus::{BusShared, Resolved};
use crate::channel::{Channel, Observer};
use crate::common::Common;
use crate::error::{BusError, BusResult};
#[cfg(feature = "stream")]
use crate::iterator::MessageStream;
use crate::message::Message;
use crate::operation::{Operation, Replay};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// 触发条件：对消息求值
pub type Condition<T> = Rc<dyn Fn(&Message<T>) -> bool>;

/// `when` 的参数：源频道名与可选条件
pub struct Trigger<T> {
    condition: Option<Condition<T>>,
    sources: Vec<String>,
}

impl<T> Trigger<T> {
    pub fn new() -> Self {
        Self {
            condition: None,
            sources: Vec::new(),
        }
    }

    pub fn source(mut self, name: impl Into<String>) -> Self {
        self.sources.push(name.into());
        self
    }

    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Message<T>) -> bool + 'static,
    {
        self.condition = Some(Rc::new(condition));
        self
    }
}

impl<T> Default for Trigger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Trigger<T> {
    fn clone(&self) -> Self {
        Self {
            condition: self.condition.clone(),
            sources: self.sources.clone(),
        }
    }
}

impl<T> From<&str> for Trigger<T> {
    fn from(name: &str) -> Self {
        Self::new().source(name)
    }
}

impl<T> From<String> for Trigger<T> {
    fn from(name: String) -> Self {
        Self::new().source(name)
    }
}

impl<T> From<Vec<&str>> for Trigger<T> {
    fn from(names: Vec<&str>) -> Self {
        names.into_iter().fold(Self::new(), Trigger::source)
    }
}

impl<T, const N: usize> From<[&str; N]> for Trigger<T> {
    fn from(names: [&str; N]) -> Self {
        names.into_iter().fold(Self::new(), Trigger::source)
    }
}

struct WhenState<T> {
    bus: Weak<BusShared<T>>,
    condition: Option<Condition<T>>,
    sources: Vec<Channel<T>>,
    targets: Resolved<T>,
    replay: RefCell<Replay<T>>,
    counters: RefCell<Vec<u64>>,
    fired: Cell<u64>,
    observers: RefCell<Vec<(Channel<T>, Weak<dyn Observer<T>>)>>,
}

impl<T: 'static> WhenState<T> {
    fn qualifies(&self, message: &Message<T>) -> bool {
        self.condition.as_ref().is_none_or(|condition| condition(message))
    }

    fn observed(&self, index: usize, message: &Message<T>) {
        if !self.qualifies(message) {
            return;
        }
        let round = {
            let mut counters = self.counters.borrow_mut();
            counters[index] += 1;
            counters.iter().copied().min().unwrap_or_default()
        };
        if round <= self.fired.get() {
            return;
        }
        self.fired.set(round);
        self.fire(message);
    }

    fn fire(&self, message: &Message<T>) {
        let operations = self.replay.borrow().snapshot();
        tracing::trace!(
            id = message.id(),
            operations = operations.len(),
            round = self.fired.get(),
            "when fired"
        );
        let result = self
            .targets
            .channels()
            .and_then(|targets| Replay::replay(&operations, &targets));
        if let Err(err) = result {
            if let Some(bus) = self.bus.upgrade() {
                bus.report(Rc::new(anyhow::Error::new(err)), Some(message.clone()));
            }
        }
    }
}

struct SourceObserver<T> {
    index: usize,
    state: Rc<WhenState<T>>,
}

impl<T: 'static> Observer<T> for SourceObserver<T> {
    fn next(&self, message: &Message<T>) {
        self.state.observed(self.index, message);
    }

    fn done(&self) {
        tracing::debug!(
            source = %self.state.sources[self.index].name(),
            "when source finalized"
        );
    }
}

/// 声明式组合：源频道发布时对目标重放记录的操作
///
/// ```rust
/// use aerobus::{Bus, Common, Subscriber};
/// use std::{cell::Cell, rc::Rc};
///
/// let bus = Bus::<i32>::new();
/// let hits = Rc::new(Cell::new(0));
/// let counter = hits.clone();
/// bus.channel("audit")
///     .subscribe(Subscriber::listen(move |_, _| counter.set(counter.get() + 1)))
///     .unwrap();
///
/// let when = bus.channel("audit").when("orders").unwrap();
/// when.publish(0).unwrap();
///
/// bus.channel("orders").publish(1).unwrap();
/// bus.channel("orders").publish(2).unwrap();
/// assert_eq!(hits.get(), 2);
///
/// when.done();
/// bus.channel("orders").publish(3).unwrap();
/// assert_eq!(hits.get(), 2);
/// ```
pub struct When<T> {
    inner: Rc<WhenState<T>>,
}

impl<T: 'static> When<T> {
    pub(crate) fn new(
        bus: &Rc<BusShared<T>>,
        trigger: Trigger<T>,
        targets: Resolved<T>,
    ) -> BusResult<Self> {
        if trigger.sources.is_empty() {
            return Err(BusError::DependencyNotValid);
        }
        let sources: Vec<Channel<T>> = trigger
            .sources
            .iter()
            .map(|name| Channel::from_cell(bus.get(name)))
            .collect();
        let inner = Rc::new(WhenState {
            bus: Rc::downgrade(bus),
            condition: trigger.condition,
            counters: RefCell::new(vec![0; sources.len()]),
            sources,
            targets,
            replay: RefCell::new(Replay::new()),
            fired: Cell::new(0),
            observers: RefCell::new(Vec::new()),
        });
        let when = Self { inner };
        for (index, source) in when.inner.sources.iter().enumerate() {
            let observer: Rc<dyn Observer<T>> = Rc::new(SourceObserver {
                index,
                state: when.inner.clone(),
            });
            if let Err(err) = source.cell().observe(observer.clone()) {
                when.done();
                return Err(err);
            }
            when.inner
                .observers
                .borrow_mut()
                .push((source.clone(), Rc::downgrade(&observer)));
        }
        tracing::debug!(sources = when.inner.sources.len(), "when attached");
        Ok(when)
    }

    /// 源频道，按触发器中的顺序
    pub fn sources(&self) -> Vec<Channel<T>> {
        self.inner.sources.clone()
    }

    pub fn targets(&self) -> Resolved<T> {
        self.inner.targets.clone()
    }

    /// 触发条件，未设置时为 `None`（任意消息都满足）
    pub fn condition(&self) -> Option<Condition<T>> {
        self.inner.condition.clone()
    }

    /// 已记录的操作数
    pub fn recordings(&self) -> usize {
        self.inner.replay.borrow().len()
    }

    /// 从全部源频道解除观察，之后不再重放
    pub fn done(&self) -> &Self {
        let observers = std::mem::take(&mut *self.inner.observers.borrow_mut());
        for (source, observer) in observers {
            let Some(observer) = observer.upgrade() else {
                continue;
            };
            if let Err(err) = source.cell().unobserve(&observer) {
                tracing::debug!(source = %source.name(), error = %err, "skip detaching when");
            }
        }
        self
    }

    /// 以目标频道为源的消息流
    #[cfg(feature = "stream")]
    pub fn iter(&self) -> BusResult<MessageStream<T>> {
        MessageStream::new(self.inner.targets.channels()?)
    }
}

impl<T: 'static> Common<T> for When<T> {
    fn dispatch(&self, operation: Operation<T>) -> BusResult<()> {
        self.inner.replay.borrow_mut().record(operation);
        Ok(())
    }
}

impl<T> Clone for When<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for When<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("When")
            .field("sources", &self.inner.sources)
            .field("targets", &self.inner.targets)
            .finish_non_exhaustive()
    }
}
