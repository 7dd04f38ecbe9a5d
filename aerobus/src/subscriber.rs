//! 订阅者（Subscriber）、订阅（Subscription）与退订（Unsubscription）
//!
//! - `Subscriber`：包装一个回调函数或实现了 `Handler` 的能力对象，带可选名称与排序键；
//! - `Subscription`：一次 `subscribe` 调用的参数集合，可统一指定名称与排序；
//! - `Unsubscription`：一次 `unsubscribe` 调用的匹配谓词集合，为空时匹配全部订阅者。
//!
//! 订阅者的身份由其底层回调/对象（base）决定：由同一个 `Subscriber` 派生出的记录
//! （例如 `named`、`ordered`）共享 base，退订时可以一并匹配。
//!
use crate::error::{BusError, BusResult};
use crate::message::Message;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// 订阅者对一次投递的答复
pub enum Reply {
    /// 已处理，无返回值
    Ack,
    /// 请求/响应模式下的返回值
    Value(Box<dyn Any>),
    /// 中止本次发布的后续投递与冒泡
    Cancel,
}

impl Reply {
    pub fn value<V: Any>(value: V) -> Self {
        Reply::Value(Box::new(value))
    }
}

impl Default for Reply {
    fn default() -> Self {
        Reply::Ack
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ack => f.write_str("Ack"),
            Reply::Value(_) => f.write_str("Value(..)"),
            Reply::Cancel => f.write_str("Cancel"),
        }
    }
}

/// 请求/响应聚合结果中的一项
pub enum Response {
    Ack,
    Value(Box<dyn Any>),
    /// 订阅者返回了错误（同一错误也会交给总线错误处理器）
    Failed(Rc<anyhow::Error>),
}

impl Response {
    /// 以具体类型读取返回值
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        match self {
            Response::Value(value) => value.downcast_ref::<V>(),
            _ => None,
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Response::Ack)
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            Response::Failed(err) => Some(&**err),
            _ => None,
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ack => f.write_str("Ack"),
            Response::Value(_) => f.write_str("Value(..)"),
            Response::Failed(err) => write!(f, "Failed({err})"),
        }
    }
}

/// 能力对象形式的订阅者：`next` 处理每条消息，`done` 在退订时调用一次
pub trait Handler<T> {
    fn next(&self, data: &T, message: &Message<T>) -> anyhow::Result<Reply>;

    fn done(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 未通过 `Subscription::name` 指定名称时使用
    fn name(&self) -> Option<&str> {
        None
    }

    /// 未通过 `Subscription::order` 指定排序时使用
    fn order(&self) -> Option<i64> {
        None
    }
}

type Callback<T> = Rc<dyn Fn(&T, &Message<T>) -> anyhow::Result<Reply>>;

enum Base<T> {
    Callback(Callback<T>),
    Handler(Rc<dyn Handler<T>>),
}

impl<T> Base<T> {
    fn address(&self) -> *const () {
        match self {
            Base::Callback(f) => Rc::as_ptr(f) as *const (),
            Base::Handler(h) => Rc::as_ptr(h) as *const (),
        }
    }
}

impl<T> Clone for Base<T> {
    fn clone(&self) -> Self {
        match self {
            Base::Callback(f) => Base::Callback(f.clone()),
            Base::Handler(h) => Base::Handler(h.clone()),
        }
    }
}

struct Record<T> {
    base: Base<T>,
    name: Option<String>,
    order: i64,
    finished: Cell<bool>,
}

/// 订阅者记录
pub struct Subscriber<T> {
    record: Rc<Record<T>>,
}

impl<T: 'static> Subscriber<T> {
    /// 以回调函数创建订阅者
    pub fn new<F>(next: F) -> Self
    where
        F: Fn(&T, &Message<T>) -> anyhow::Result<Reply> + 'static,
    {
        Self::from_base(Base::Callback(Rc::new(next)), None, 0)
    }

    /// 只关心消息、不作答复的订阅者
    pub fn listen<F>(next: F) -> Self
    where
        F: Fn(&T, &Message<T>) + 'static,
    {
        Self::new(move |data, message| {
            next(data, message);
            Ok(Reply::Ack)
        })
    }

    /// 以能力对象创建订阅者，名称与排序取自对象自身
    pub fn handler(handler: Rc<dyn Handler<T>>) -> Self {
        let name = handler.name().map(str::to_string);
        let order = handler.order().unwrap_or_default();
        Self::from_base(Base::Handler(handler), name, order)
    }
}

impl<T> Subscriber<T> {
    fn from_base(base: Base<T>, name: Option<String>, order: i64) -> Self {
        Self {
            record: Rc::new(Record {
                base,
                name,
                order,
                finished: Cell::new(false),
            }),
        }
    }

    /// 派生一个同 base、指定名称的新记录
    pub fn named(&self, name: impl Into<String>) -> Self {
        Self::from_base(self.record.base.clone(), Some(name.into()), self.record.order)
    }

    /// 派生一个同 base、指定排序的新记录
    pub fn ordered(&self, order: i64) -> Self {
        Self::from_base(self.record.base.clone(), self.record.name.clone(), order)
    }

    pub fn name(&self) -> Option<&str> {
        self.record.name.as_deref()
    }

    pub fn order(&self) -> i64 {
        self.record.order
    }

    /// 是否与 `other` 共享同一个 base
    pub fn is(&self, other: &Subscriber<T>) -> bool {
        self.record.base.address() == other.record.base.address()
    }

    /// 是否为同一条记录
    #[cfg(test)]
    pub(crate) fn same_record(&self, other: &Subscriber<T>) -> bool {
        Rc::ptr_eq(&self.record, &other.record)
    }

    pub(crate) fn next(&self, data: &T, message: &Message<T>) -> anyhow::Result<Reply> {
        match &self.record.base {
            Base::Callback(f) => f(data, message),
            Base::Handler(h) => h.next(data, message),
        }
    }

    /// 记录是否已结束；已结束的记录不再接收消息
    pub(crate) fn is_finished(&self) -> bool {
        self.record.finished.get()
    }

    /// 结束订阅，同一记录只会真正调用一次
    pub(crate) fn done(&self) -> anyhow::Result<()> {
        if self.record.finished.replace(true) {
            return Ok(());
        }
        match &self.record.base {
            Base::Callback(_) => Ok(()),
            Base::Handler(h) => h.done(),
        }
    }
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            record: self.record.clone(),
        }
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.record.name)
            .field("order", &self.record.order)
            .finish()
    }
}

/// 一次订阅调用的参数
pub struct Subscription<T> {
    subscribers: Vec<Subscriber<T>>,
    name: Option<String>,
    order: Option<i64>,
}

impl<T: 'static> Subscription<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            name: None,
            order: None,
        }
    }

    pub fn with(mut self, subscriber: Subscriber<T>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn next<F>(self, next: F) -> Self
    where
        F: Fn(&T, &Message<T>) -> anyhow::Result<Reply> + 'static,
    {
        self.with(Subscriber::new(next))
    }

    pub fn handler(self, handler: Rc<dyn Handler<T>>) -> Self {
        self.with(Subscriber::handler(handler))
    }

    /// 本次订阅所有订阅者的统一名称
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 本次订阅所有订阅者的统一排序
    pub fn order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    /// 解析为待插入的订阅者记录；统一名称/排序会派生新记录
    pub(crate) fn resolve(self) -> BusResult<Vec<Subscriber<T>>> {
        if self.subscribers.is_empty() {
            return Err(BusError::SubscriberNotValid);
        }
        let Self {
            subscribers,
            name,
            order,
        } = self;
        Ok(subscribers
            .into_iter()
            .map(|s| {
                let s = match &name {
                    Some(name) => s.named(name.clone()),
                    None => s,
                };
                match order {
                    Some(order) => s.ordered(order),
                    None => s,
                }
            })
            .collect())
    }
}

impl<T: 'static> Default for Subscription<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> From<Subscriber<T>> for Subscription<T> {
    fn from(subscriber: Subscriber<T>) -> Self {
        Self::new().with(subscriber)
    }
}

impl<T: 'static> From<&Subscriber<T>> for Subscription<T> {
    fn from(subscriber: &Subscriber<T>) -> Self {
        Self::new().with(subscriber.clone())
    }
}

impl<T: 'static> From<Vec<Subscriber<T>>> for Subscription<T> {
    fn from(subscribers: Vec<Subscriber<T>>) -> Self {
        Self {
            subscribers,
            name: None,
            order: None,
        }
    }
}

enum Predicate<T> {
    Subscriber(Subscriber<T>),
    Name(String),
}

impl<T> Predicate<T> {
    fn matches(&self, subscriber: &Subscriber<T>) -> bool {
        match self {
            Predicate::Subscriber(target) => target.is(subscriber),
            Predicate::Name(name) => subscriber.name() == Some(name.as_str()),
        }
    }
}

impl<T> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        match self {
            Predicate::Subscriber(s) => Predicate::Subscriber(s.clone()),
            Predicate::Name(n) => Predicate::Name(n.clone()),
        }
    }
}

/// 一次退订调用的匹配条件；没有任何条件时匹配全部订阅者
pub struct Unsubscription<T> {
    predicates: Vec<Predicate<T>>,
}

impl<T> Unsubscription<T> {
    pub fn all() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    pub fn subscriber(mut self, subscriber: &Subscriber<T>) -> Self {
        self.predicates.push(Predicate::Subscriber(subscriber.clone()));
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Name(name.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub(crate) fn matches(&self, subscriber: &Subscriber<T>) -> bool {
        self.predicates.is_empty() || self.predicates.iter().any(|p| p.matches(subscriber))
    }
}

impl<T> Default for Unsubscription<T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<T> Clone for Unsubscription<T> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
        }
    }
}

impl<T> From<&str> for Unsubscription<T> {
    fn from(name: &str) -> Self {
        Self::all().name(name)
    }
}

impl<T> From<String> for Unsubscription<T> {
    fn from(name: String) -> Self {
        Self::all().name(name)
    }
}

impl<T> From<&Subscriber<T>> for Unsubscription<T> {
    fn from(subscriber: &Subscriber<T>) -> Self {
        Self::all().subscriber(subscriber)
    }
}

impl<T> From<Subscriber<T>> for Unsubscription<T> {
    fn from(subscriber: Subscriber<T>) -> Self {
        Self::all().subscriber(&subscriber)
    }
}
