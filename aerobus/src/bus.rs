//! 总线（Bus）
//!
//! 总线持有"频道名 → 频道"的映射，负责：
//! - 按分隔符懒构建层级频道并链接父子关系；
//! - 将名称/正则选择器解析为频道或分区（Section）；
//! - 分配消息 `id`、保存默认冒泡设置、错误与追踪回调；
//! - 延迟上报订阅者错误：错误先入队，在最外层公开操作返回后统一交给错误处理器。
//!
use crate::channel::{Channel, ChannelCell};
use crate::common::Common;
use crate::config::{BusConfig, ErrorHandler, Trace, TraceHandler};
use crate::error::BusResult;
use crate::message::Message;
use crate::operation::Operation;
use crate::section::{Member, Section};
use crate::subscriber::Unsubscription;
use regex::Regex;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

/// 约定用于错误上报的频道名
pub const ERROR_CHANNEL: &str = "error";

type Failure<T> = (Rc<anyhow::Error>, Option<Message<T>>);

struct Registry<T> {
    order: Vec<Rc<ChannelCell<T>>>,
    by_name: HashMap<String, Rc<ChannelCell<T>>>,
}

pub(crate) struct BusShared<T> {
    me: Weak<BusShared<T>>,
    bubbles: Cell<bool>,
    delimiter: String,
    error: RefCell<Option<ErrorHandler<T>>>,
    trace: RefCell<Option<TraceHandler>>,
    id: Cell<u64>,
    channels: RefCell<Registry<T>>,
    failures: RefCell<VecDeque<Failure<T>>>,
    depth: Cell<usize>,
    /// 错误频道是否已经通过 `error_channel()` 取用过
    error_claimed: Cell<bool>,
}

impl<T: 'static> BusShared<T> {
    fn new(config: BusConfig<T>) -> Rc<Self> {
        Rc::new_cyclic(|me| BusShared {
            me: me.clone(),
            bubbles: Cell::new(config.bubbles),
            delimiter: config.delimiter,
            error: RefCell::new(config.error),
            trace: RefCell::new(config.trace),
            id: Cell::new(0),
            channels: RefCell::new(Registry {
                order: Vec::new(),
                by_name: HashMap::new(),
            }),
            failures: RefCell::new(VecDeque::new()),
            depth: Cell::new(0),
            error_claimed: Cell::new(false),
        })
    }

    pub(crate) fn bubbles(&self) -> bool {
        self.bubbles.get()
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.id.get() + 1;
        self.id.set(id);
        id
    }

    pub(crate) fn trace(&self, channel: &str, event: &Trace<'_>) {
        tracing::trace!(channel = %channel, event = event.name(), "{event:?}");
        let hook = self.trace.borrow().clone();
        if let Some(hook) = hook {
            hook(channel, event);
        }
    }

    /// 在一次公开操作的作用域内执行；最外层作用域结束时冲刷错误队列
    pub(crate) fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        self.depth.set(self.depth.get() + 1);
        let out = f();
        let depth = self.depth.get() - 1;
        self.depth.set(depth);
        if depth == 0 {
            self.flush();
        }
        out
    }

    /// 记录订阅者错误，待当前投递结束后上报
    pub(crate) fn report(&self, error: Rc<anyhow::Error>, message: Option<Message<T>>) {
        self.failures.borrow_mut().push_back((error, message));
        if self.depth.get() == 0 {
            self.flush();
        }
    }

    fn flush(&self) {
        loop {
            let next = self.failures.borrow_mut().pop_front();
            let Some((error, message)) = next else {
                break;
            };
            let handler = self.error.borrow().clone();
            match handler {
                Some(handler) => handler(&error, message.as_ref()),
                None => tracing::warn!(
                    error = %error,
                    message_id = ?message.as_ref().map(Message::id),
                    channel = ?message.as_ref().map(Message::destination),
                    "subscriber failed"
                ),
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<Rc<ChannelCell<T>>> {
        self.channels.borrow().by_name.get(name).cloned()
    }

    fn create(&self, name: String, parent: Option<Rc<ChannelCell<T>>>) -> Rc<ChannelCell<T>> {
        let cell = Rc::new(ChannelCell::new(
            name.clone(),
            parent,
            self.me.clone(),
            self.bubbles(),
        ));
        {
            let mut registry = self.channels.borrow_mut();
            registry.order.push(cell.clone());
            registry.by_name.insert(name, cell.clone());
        }
        tracing::debug!(channel = %cell.name(), "channel created");
        self.trace(cell.name(), &Trace::Create);
        cell
    }

    /// 获取频道，不存在时连同缺失的祖先一并创建
    pub(crate) fn get(&self, name: &str) -> Rc<ChannelCell<T>> {
        if let Some(cell) = self.lookup(name) {
            return cell;
        }
        let root = match self.lookup("") {
            Some(root) => root,
            None => self.create(String::new(), None),
        };
        if name.is_empty() {
            return root;
        }
        let mut parent = root;
        let mut path = String::new();
        for segment in name.split(self.delimiter.as_str()) {
            path = if path.is_empty() {
                segment.to_string()
            } else {
                format!("{path}{}{segment}", self.delimiter)
            };
            parent = match self.lookup(&path) {
                Some(cell) => cell,
                None => self.create(path.clone(), Some(parent)),
            };
        }
        parent
    }

    pub(crate) fn snapshot(&self) -> Vec<Rc<ChannelCell<T>>> {
        self.channels.borrow().order.clone()
    }

    /// 按选择器顺序展开分区成员
    pub(crate) fn expand(&self, members: &[Member<T>]) -> Vec<Channel<T>> {
        let mut channels = Vec::new();
        for member in members {
            match member {
                Member::Fixed(channel) => channels.push(channel.clone()),
                Member::Pattern(pattern) => channels.extend(
                    self.snapshot()
                        .into_iter()
                        .filter(|cell| pattern.is_match(cell.name()))
                        .map(Channel::from_cell),
                ),
            }
        }
        channels
    }

    fn clear(&self) {
        let registry = std::mem::replace(
            &mut *self.channels.borrow_mut(),
            Registry {
                order: Vec::new(),
                by_name: HashMap::new(),
            },
        );
        self.error_claimed.set(false);
        for cell in &registry.order {
            if let Err(err) = cell.clear() {
                tracing::debug!(channel = %cell.name(), error = %err, "skip clearing channel");
            }
            cell.tombstone();
        }
        tracing::debug!(channels = registry.order.len(), "bus cleared");
    }
}

/// 频道选择器：字面名称或正则
#[derive(Debug, Clone)]
pub enum Selector {
    Name(String),
    Pattern(Regex),
}

impl Selector {
    pub fn pattern(pattern: &str) -> BusResult<Self> {
        Ok(Selector::Pattern(Regex::new(pattern)?))
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::Name(name.to_string())
    }
}

impl From<String> for Selector {
    fn from(name: String) -> Self {
        Selector::Name(name)
    }
}

impl From<Regex> for Selector {
    fn from(pattern: Regex) -> Self {
        Selector::Pattern(pattern)
    }
}

/// `Bus::resolve` 的结果
pub enum Resolved<T> {
    Channel(Channel<T>),
    Section(Section<T>),
}

impl<T: 'static> Resolved<T> {
    pub fn channels(&self) -> BusResult<Vec<Channel<T>>> {
        match self {
            Resolved::Channel(channel) => Ok(vec![channel.clone()]),
            Resolved::Section(section) => section.channels(),
        }
    }

    pub fn into_channel(self) -> Option<Channel<T>> {
        match self {
            Resolved::Channel(channel) => Some(channel),
            Resolved::Section(_) => None,
        }
    }

    pub fn into_section(self) -> Option<Section<T>> {
        match self {
            Resolved::Section(section) => Some(section),
            Resolved::Channel(_) => None,
        }
    }
}

impl<T: 'static> Common<T> for Resolved<T> {
    fn dispatch(&self, operation: Operation<T>) -> BusResult<()> {
        match self {
            Resolved::Channel(channel) => channel.dispatch(operation),
            Resolved::Section(section) => section.dispatch(operation),
        }
    }
}

impl<T> Clone for Resolved<T> {
    fn clone(&self) -> Self {
        match self {
            Resolved::Channel(channel) => Resolved::Channel(channel.clone()),
            Resolved::Section(section) => Resolved::Section(section.clone()),
        }
    }
}

impl<T> fmt::Debug for Resolved<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Channel(channel) => f.debug_tuple("Channel").field(channel).finish(),
            Resolved::Section(section) => f.debug_tuple("Section").field(section).finish(),
        }
    }
}

/// 消息总线
///
/// ```rust
/// use aerobus::{Bus, Common, Subscriber};
/// use std::{cell::RefCell, rc::Rc};
///
/// let bus = Bus::<String>::new();
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let sink = seen.clone();
///
/// bus.channel("orders")
///     .subscribe(Subscriber::listen(move |data: &String, message| {
///         sink.borrow_mut().push((message.destination().to_string(), data.clone()));
///     }))
///     .unwrap();
/// bus.channel("orders.created").publish("#1".to_string()).unwrap();
///
/// assert_eq!(*seen.borrow(), vec![("orders".to_string(), "#1".to_string())]);
/// ```
pub struct Bus<T> {
    shared: Rc<BusShared<T>>,
}

impl<T: 'static> Bus<T> {
    pub fn new() -> Self {
        Self {
            shared: BusShared::new(BusConfig::default()),
        }
    }

    pub fn with_config(config: BusConfig<T>) -> BusResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: BusShared::new(config),
        })
    }

    /// 当前设置的快照
    pub fn config(&self) -> BusConfig<T> {
        BusConfig {
            bubbles: self.shared.bubbles(),
            delimiter: self.shared.delimiter.clone(),
            error: self.shared.error.borrow().clone(),
            trace: self.shared.trace.borrow().clone(),
        }
    }

    /// 以当前设置为基础创建新总线，`overrides` 可修改继承来的设置
    pub fn create(&self, overrides: impl FnOnce(&mut BusConfig<T>)) -> BusResult<Bus<T>> {
        let mut config = self.config();
        overrides(&mut config);
        Bus::with_config(config)
    }

    pub fn channel(&self, name: &str) -> Channel<T> {
        Channel::from_cell(self.shared.get(name))
    }

    pub fn root(&self) -> Channel<T> {
        self.channel("")
    }

    /// 约定的错误频道
    ///
    /// 首次通过本方法取用时关闭冒泡，即使该频道之前已被隐式创建（如 `channel("error.db")`）；
    /// 之后对冒泡的修改会被保留。
    pub fn error_channel(&self) -> BusResult<Channel<T>> {
        let channel = self.channel(ERROR_CHANNEL);
        if !self.shared.error_claimed.replace(true) {
            channel.cell().bubble(false)?;
        }
        Ok(channel)
    }

    /// 无选择器解析为根频道，单个名称解析为频道，其余情况解析为分区
    pub fn resolve<I, S>(&self, selectors: I) -> Resolved<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<Selector>,
    {
        let selectors: Vec<Selector> = selectors.into_iter().map(Into::into).collect();
        match selectors.as_slice() {
            [] => Resolved::Channel(self.root()),
            [Selector::Name(name)] => Resolved::Channel(self.channel(name)),
            _ => Resolved::Section(self.build_section(selectors)),
        }
    }

    /// 总是解析为分区
    pub fn section<I, S>(&self, selectors: I) -> Section<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<Selector>,
    {
        self.build_section(selectors.into_iter().map(Into::into).collect())
    }

    fn build_section(&self, selectors: Vec<Selector>) -> Section<T> {
        let members = selectors
            .into_iter()
            .map(|selector| match selector {
                Selector::Name(name) => Member::Fixed(self.channel(&name)),
                Selector::Pattern(pattern) => Member::Pattern(pattern),
            })
            .collect();
        Section::new(Rc::downgrade(&self.shared), members)
    }

    /// 现有频道快照，按创建顺序
    pub fn channels(&self) -> Vec<Channel<T>> {
        self.shared
            .snapshot()
            .into_iter()
            .map(Channel::from_cell)
            .collect()
    }

    pub fn delimiter(&self) -> &str {
        &self.shared.delimiter
    }

    pub fn bubbles(&self) -> bool {
        self.shared.bubbles()
    }

    /// 设置新建频道的默认冒泡行为
    pub fn bubble(&self, value: bool) -> &Self {
        tracing::debug!(bubbles = value, "bus default bubbling changed");
        self.shared.bubbles.set(value);
        self
    }

    /// 清空并删除全部频道；旧的频道句柄随之失效
    pub fn clear(&self) -> &Self {
        self.shared.scope(|| self.shared.clear());
        self
    }

    /// 在全部频道上退订
    pub fn unsubscribe(&self, unsubscription: impl Into<Unsubscription<T>>) -> BusResult<&Self> {
        let unsubscription = unsubscription.into();
        self.shared.scope(|| {
            self.shared
                .snapshot()
                .iter()
                .try_for_each(|cell| cell.unsubscribe(&unsubscription))
        })?;
        Ok(self)
    }

    pub fn trace(&self) -> Option<TraceHandler> {
        self.shared.trace.borrow().clone()
    }

    pub fn set_trace(&self, trace: Option<TraceHandler>) -> &Self {
        *self.shared.trace.borrow_mut() = trace;
        self
    }

    pub fn error(&self) -> Option<ErrorHandler<T>> {
        self.shared.error.borrow().clone()
    }

    pub fn set_error(&self, error: Option<ErrorHandler<T>>) -> &Self {
        *self.shared.error.borrow_mut() = error;
        self
    }
}

impl<T: 'static> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Bus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("delimiter", &self.shared.delimiter)
            .field("bubbles", &self.shared.bubbles.get())
            .field("channels", &self.shared.channels.borrow().order.len())
            .finish()
    }
}
