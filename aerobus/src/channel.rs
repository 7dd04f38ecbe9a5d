//! 频道（Channel）
//!
//! 频道是层级命名空间中的节点，持有订阅者、观察者、保留消息、转发规则与投递策略，
//! 并实现发布路由算法：
//!
//! 1. 构造/延伸消息（转发或冒泡来的消息保留 `id`，路由头部插入本频道）；
//! 2. 通知全部观察者（迭代器、`when`），不受后续转发/跳过影响；
//! 3. 路由中已出现过本频道时不再转发（环路保护）；
//! 4. 执行转发规则：任一规则要求中止时整个发布立即中止；若没有任何规则要求本地投递则跳过后续步骤；
//! 5. 写入保留队列；
//! 6. 冒泡到父频道（先于本地订阅者）；
//! 7. 按策略选择订阅者并逐个投递，失败被隔离并延迟上报。
//!
//! 句柄（`Channel`）只持有 `Rc<ChannelCell>`；状态在总线 `clear()` 后被置为 `None`，
//! 之后的任何操作都返回 `BusError::Deleted`。
//!
use crate::bus::{BusShared, Resolved};
use crate::common::Common;
use crate::config::Trace;
use crate::error::{BusError, BusResult};
use crate::forwarding::Forwarder;
#[cfg(feature = "stream")]
use crate::iterator::MessageStream;
use crate::message::Message;
use crate::operation::Operation;
use crate::strategy::Strategy;
use crate::subscriber::{Reply, Response, Subscriber, Unsubscription};
use crate::when::{Trigger, When};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

/// 被动观察者：迭代器与 `when` 通过它看到频道上的每一次发布
pub(crate) trait Observer<T> {
    fn next(&self, message: &Message<T>);
    fn done(&self);
}

/// 待发布的内容：新数据或途经其他频道的消息
pub(crate) enum Payload<T> {
    Data(Rc<T>),
    Routed(Message<T>),
}

/// 发布结果：继续或被订阅者/转发规则中止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Cancel,
}

struct Retentions<T> {
    limit: usize,
    queue: VecDeque<Message<T>>,
}

impl<T> Retentions<T> {
    fn push(&mut self, message: Message<T>) {
        self.queue.push_back(message);
        while self.queue.len() > self.limit {
            self.queue.pop_front();
        }
    }
}

struct ChannelGear<T> {
    bubbles: bool,
    enabled: bool,
    subscribers: Vec<Subscriber<T>>,
    observers: Vec<Rc<dyn Observer<T>>>,
    retentions: Option<Retentions<T>>,
    forwarders: Vec<Forwarder<T>>,
    strategy: Option<Strategy>,
}

impl<T> ChannelGear<T> {
    fn new(bubbles: bool) -> Self {
        Self {
            bubbles,
            enabled: true,
            subscribers: Vec::new(),
            observers: Vec::new(),
            retentions: None,
            forwarders: Vec::new(),
            strategy: None,
        }
    }

    /// 插入到最后一个 `order` 不大于新订阅者的位置之后
    fn insert(&mut self, subscriber: Subscriber<T>) {
        let at = self
            .subscribers
            .iter()
            .rposition(|s| s.order() <= subscriber.order())
            .map_or(0, |i| i + 1);
        self.subscribers.insert(at, subscriber);
    }
}

pub(crate) struct ChannelCell<T> {
    name: String,
    parent: Option<Rc<ChannelCell<T>>>,
    bus: Weak<BusShared<T>>,
    gear: RefCell<Option<ChannelGear<T>>>,
}

impl<T: 'static> ChannelCell<T> {
    pub(crate) fn new(
        name: String,
        parent: Option<Rc<ChannelCell<T>>>,
        bus: Weak<BusShared<T>>,
        bubbles: bool,
    ) -> Self {
        Self {
            name,
            parent,
            bus,
            gear: RefCell::new(Some(ChannelGear::new(bubbles))),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn bus(&self) -> BusResult<Rc<BusShared<T>>> {
        self.bus.upgrade().ok_or_else(|| BusError::deleted("Bus"))
    }

    fn with<R>(&self, f: impl FnOnce(&ChannelGear<T>) -> R) -> BusResult<R> {
        let slot = self.gear.borrow();
        let gear = slot.as_ref().ok_or_else(|| BusError::deleted("Channel"))?;
        Ok(f(gear))
    }

    fn with_mut<R>(&self, f: impl FnOnce(&mut ChannelGear<T>) -> R) -> BusResult<R> {
        let mut slot = self.gear.borrow_mut();
        let gear = slot.as_mut().ok_or_else(|| BusError::deleted("Channel"))?;
        Ok(f(gear))
    }

    fn trace(&self, bus: &BusShared<T>, event: Trace<'_>) {
        bus.trace(&self.name, &event);
    }

    /// 本地开关与所有祖先开关同时打开才视为启用
    pub(crate) fn is_enabled(&self) -> BusResult<bool> {
        if !self.with(|g| g.enabled)? {
            return Ok(false);
        }
        match &self.parent {
            Some(parent) => parent.is_enabled(),
            None => Ok(true),
        }
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.gear.borrow().is_none()
    }

    pub(crate) fn tombstone(&self) {
        self.gear.borrow_mut().take();
    }

    pub(crate) fn bubble(&self, value: bool) -> BusResult<()> {
        let bus = self.bus()?;
        self.with_mut(|g| g.bubbles = value)?;
        self.trace(&bus, Trace::Bubble(value));
        Ok(())
    }

    pub(crate) fn enable(&self, value: bool) -> BusResult<()> {
        let bus = self.bus()?;
        self.with_mut(|g| g.enabled = value)?;
        self.trace(&bus, Trace::Enable(value));
        Ok(())
    }

    pub(crate) fn toggle(&self) -> BusResult<()> {
        let bus = self.bus()?;
        self.with_mut(|g| g.enabled = !g.enabled)?;
        self.trace(&bus, Trace::Toggle);
        Ok(())
    }

    pub(crate) fn cycle(&self, limit: usize, step: usize) -> BusResult<()> {
        let bus = self.bus()?;
        let strategy = Strategy::cycle(limit, step);
        let step = match &strategy {
            Some(Strategy::Cycle { step, .. }) => *step,
            _ => 0,
        };
        self.with_mut(|g| g.strategy = strategy)?;
        self.trace(&bus, Trace::Cycle { limit, step });
        Ok(())
    }

    pub(crate) fn shuffle(&self, limit: usize) -> BusResult<()> {
        let bus = self.bus()?;
        self.with_mut(|g| g.strategy = Strategy::shuffle(limit))?;
        self.trace(&bus, Trace::Shuffle(limit));
        Ok(())
    }

    /// `limit == 0` 关闭保留并丢弃已保留的消息；缩小上限时只保留最新的若干条
    pub(crate) fn retain(&self, limit: usize) -> BusResult<()> {
        let bus = self.bus()?;
        self.with_mut(|g| {
            if limit == 0 {
                g.retentions = None;
                return;
            }
            match g.retentions.as_mut() {
                Some(retentions) => {
                    retentions.limit = limit;
                    while retentions.queue.len() > limit {
                        retentions.queue.pop_front();
                    }
                }
                None => {
                    g.retentions = Some(Retentions {
                        limit,
                        queue: VecDeque::new(),
                    })
                }
            }
        })?;
        self.trace(&bus, Trace::Retain(limit));
        Ok(())
    }

    pub(crate) fn forward(&self, forwarders: &[Forwarder<T>]) -> BusResult<()> {
        let bus = self.bus()?;
        self.with_mut(|g| g.forwarders.extend(forwarders.iter().cloned()))?;
        self.trace(
            &bus,
            Trace::Forward {
                rules: forwarders.len(),
            },
        );
        Ok(())
    }

    pub(crate) fn observe(&self, observer: Rc<dyn Observer<T>>) -> BusResult<()> {
        self.with_mut(|g| g.observers.push(observer))
    }

    pub(crate) fn unobserve(&self, observer: &Rc<dyn Observer<T>>) -> BusResult<()> {
        let target = Rc::as_ptr(observer) as *const ();
        self.with_mut(|g| {
            g.observers
                .retain(|o| Rc::as_ptr(o) as *const () != target)
        })
    }

    /// 清空订阅者、观察者与保留消息，保留各项设置
    pub(crate) fn clear(&self) -> BusResult<()> {
        let bus = self.bus()?;
        self.trace(&bus, Trace::Clear);
        let (subscribers, observers) = self.with_mut(|g| {
            if let Some(retentions) = g.retentions.as_mut() {
                retentions.queue.clear();
            }
            (
                std::mem::take(&mut g.subscribers),
                std::mem::take(&mut g.observers),
            )
        })?;
        tracing::debug!(channel = %self.name, subscribers = subscribers.len(), "channel cleared");
        Self::finalize(&bus, subscribers, observers);
        Ok(())
    }

    /// 在清空的基础上恢复默认设置
    pub(crate) fn reset(&self) -> BusResult<()> {
        let bus = self.bus()?;
        self.trace(&bus, Trace::Reset);
        let bubbles = bus.bubbles();
        let (subscribers, observers) = self.with_mut(|g| {
            g.enabled = true;
            g.bubbles = bubbles;
            g.retentions = None;
            g.forwarders.clear();
            g.strategy = None;
            (
                std::mem::take(&mut g.subscribers),
                std::mem::take(&mut g.observers),
            )
        })?;
        tracing::debug!(channel = %self.name, "channel reset");
        Self::finalize(&bus, subscribers, observers);
        Ok(())
    }

    fn finalize(
        bus: &BusShared<T>,
        subscribers: Vec<Subscriber<T>>,
        observers: Vec<Rc<dyn Observer<T>>>,
    ) {
        for observer in observers {
            observer.done();
        }
        for subscriber in subscribers {
            if let Err(err) = subscriber.done() {
                bus.report(Rc::new(err), None);
            }
        }
    }

    /// 插入订阅者，并立即向新订阅者重放全部保留消息
    pub(crate) fn subscribe(&self, subscribers: &[Subscriber<T>]) -> BusResult<()> {
        let bus = self.bus()?;
        self.trace(
            &bus,
            Trace::Subscribe {
                subscribers: subscribers.len(),
            },
        );
        let retained: Vec<Message<T>> = self.with_mut(|g| {
            for subscriber in subscribers {
                g.insert(subscriber.clone());
            }
            g.retentions
                .as_ref()
                .map(|r| r.queue.iter().cloned().collect())
                .unwrap_or_default()
        })?;
        for subscriber in subscribers {
            for message in &retained {
                if subscriber.is_finished() {
                    break;
                }
                if let Err(err) = subscriber.next(message.data(), message) {
                    bus.report(Rc::new(err), Some(message.clone()));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn unsubscribe(&self, unsubscription: &Unsubscription<T>) -> BusResult<()> {
        let bus = self.bus()?;
        self.trace(
            &bus,
            Trace::Unsubscribe {
                predicates: unsubscription.len(),
            },
        );
        let removed: Vec<Subscriber<T>> = self.with_mut(|g| {
            let (removed, kept) = std::mem::take(&mut g.subscribers)
                .into_iter()
                .partition(|s| unsubscription.matches(s));
            g.subscribers = kept;
            removed
        })?;
        for subscriber in removed {
            if let Err(err) = subscriber.done() {
                bus.report(Rc::new(err), None);
            }
        }
        Ok(())
    }

    pub(crate) fn publish(
        &self,
        payload: Payload<T>,
        collector: &mut dyn FnMut(Response),
    ) -> BusResult<Flow> {
        if !self.is_enabled()? {
            return Ok(Flow::Continue);
        }
        let bus = self.bus()?;
        let message = match payload {
            Payload::Data(data) => Message::new(data, bus.next_id(), &self.name),
            Payload::Routed(message) => message.routed(&self.name),
        };
        self.trace(
            &bus,
            Trace::Publish {
                id: message.id(),
                route: message.route(),
            },
        );

        let (observers, forwarders) =
            self.with(|g| (g.observers.clone(), g.forwarders.clone()))?;
        for observer in &observers {
            observer.next(&message);
        }

        let mut skip = false;
        if !forwarders.is_empty() && !message.visited(&self.name) {
            skip = true;
            let mut destinations: Vec<String> = Vec::new();
            for forwarder in &forwarders {
                let targets = forwarder.resolve(message.data(), &message);
                if targets.is_cancel() {
                    tracing::trace!(channel = %self.name, id = message.id(), "forwarding cancelled");
                    return Ok(Flow::Cancel);
                }
                if targets.is_local() {
                    skip = false;
                }
                for name in targets.names() {
                    if *name == self.name {
                        skip = false;
                    } else if !destinations.contains(name) {
                        destinations.push(name.clone());
                    }
                }
            }
            for destination in &destinations {
                tracing::trace!(from = %self.name, to = %destination, id = message.id(), "forward");
                let channel = bus.get(destination);
                if channel.publish(Payload::Routed(message.clone()), collector)? == Flow::Cancel {
                    return Ok(Flow::Cancel);
                }
            }
        }
        if skip {
            return Ok(Flow::Continue);
        }

        let bubbles = self.with_mut(|g| {
            if let Some(retentions) = g.retentions.as_mut() {
                retentions.push(message.clone());
            }
            g.bubbles
        })?;

        if bubbles {
            if let Some(parent) = &self.parent {
                if parent.publish(Payload::Routed(message.clone()), collector)? == Flow::Cancel {
                    return Ok(Flow::Cancel);
                }
            }
        }

        let selected = self.with_mut(|g| match g.strategy.as_mut() {
            Some(strategy) => strategy.select(&g.subscribers),
            None => g.subscribers.clone(),
        })?;
        for subscriber in selected {
            // 本轮投递中被移除的订阅者跳过
            if subscriber.is_finished() {
                continue;
            }
            match subscriber.next(message.data(), &message) {
                Ok(Reply::Cancel) => {
                    tracing::trace!(channel = %self.name, id = message.id(), "publication cancelled");
                    return Ok(Flow::Cancel);
                }
                Ok(Reply::Ack) => collector(Response::Ack),
                Ok(Reply::Value(value)) => collector(Response::Value(value)),
                Err(err) => {
                    let err = Rc::new(err);
                    collector(Response::Failed(err.clone()));
                    bus.report(err, Some(message.clone()));
                }
            }
        }
        Ok(Flow::Continue)
    }
}

/// 频道句柄
///
/// 句柄不持有总线：总线（`Bus`）被释放后，频道上的操作返回 `BusError::Deleted`。
pub struct Channel<T> {
    cell: Rc<ChannelCell<T>>,
}

impl<T: 'static> Channel<T> {
    pub(crate) fn from_cell(cell: Rc<ChannelCell<T>>) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &Rc<ChannelCell<T>> {
        &self.cell
    }

    /// 完整名称，根频道为空字符串
    pub fn name(&self) -> &str {
        self.cell.name()
    }

    pub fn parent(&self) -> Option<Channel<T>> {
        self.cell.parent.clone().map(Channel::from_cell)
    }

    pub fn bubbles(&self) -> BusResult<bool> {
        self.cell.with(|g| g.bubbles)
    }

    /// 生效的启用状态（考虑全部祖先）
    pub fn enabled(&self) -> BusResult<bool> {
        self.cell.is_enabled()
    }

    pub fn forwarders(&self) -> BusResult<Vec<Forwarder<T>>> {
        self.cell.with(|g| g.forwarders.clone())
    }

    /// 当前保留的消息，最早的在前
    pub fn retentions(&self) -> BusResult<Vec<Message<T>>> {
        self.cell.with(|g| {
            g.retentions
                .as_ref()
                .map(|r| r.queue.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// 保留上限，未开启保留时为 0
    pub fn retention_limit(&self) -> BusResult<usize> {
        self.cell
            .with(|g| g.retentions.as_ref().map_or(0, |r| r.limit))
    }

    pub fn subscribers(&self) -> BusResult<Vec<Subscriber<T>>> {
        self.cell.with(|g| g.subscribers.clone())
    }

    pub fn is_deleted(&self) -> bool {
        self.cell.is_deleted()
    }

    /// 请求/响应：发布并返回所有被投递订阅者的答复（先冒泡链路，后本地订阅者）
    pub fn request(&self, data: T) -> BusResult<Vec<Response>> {
        let bus = self.cell.bus()?;
        bus.scope(|| Operation::collect(Rc::new(data), std::slice::from_ref(self)))
    }

    /// 以本频道为目标构造 `when` 组合
    pub fn when(&self, trigger: impl Into<Trigger<T>>) -> BusResult<When<T>> {
        let bus = self.cell.bus()?;
        When::new(&bus, trigger.into(), Resolved::Channel(self.clone()))
    }

    /// 拉取式消费本频道的发布
    #[cfg(feature = "stream")]
    pub fn iter(&self) -> BusResult<MessageStream<T>> {
        MessageStream::new(vec![self.clone()])
    }
}

impl<T: 'static> Common<T> for Channel<T> {
    fn dispatch(&self, operation: Operation<T>) -> BusResult<()> {
        let bus = self.cell.bus()?;
        bus.scope(|| operation.apply(std::slice::from_ref(self)))
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> PartialEq for Channel<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> Eq for Channel<T> {}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.cell.name)
            .finish()
    }
}
