//! 转发（Forwarding）
//!
//! 转发规则要么是一个固定的目标频道名，要么是一个根据 `(data, message)` 计算目标的函数。
//! 只要有任意一条规则给出"本地"（`Targets::local()`、`None` 或当前频道自身的名称），
//! 当前频道就继续本地投递；否则消息只流向转发目标。
//! 规则返回 `Targets::cancel()` 时整个发布立即中止，调用方得到中止结果。
//!
//! 转发环路由频道在路由表上统一判定，规则本身无需关心。
//!
use crate::error::{BusError, BusResult};
use crate::message::Message;
use std::fmt;
use std::rc::Rc;

/// 一条转发规则的计算结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Targets {
    names: Vec<String>,
    local: bool,
    cancel: bool,
}

impl Targets {
    /// 不转发，保留本地投递
    pub fn local() -> Self {
        Self {
            names: Vec::new(),
            local: true,
            cancel: false,
        }
    }

    /// 中止本次发布：不转发、不保留、不冒泡、不本地投递
    pub fn cancel() -> Self {
        Self {
            names: Vec::new(),
            local: false,
            cancel: true,
        }
    }

    pub fn to(name: impl Into<String>) -> Self {
        Self {
            names: vec![name.into()],
            local: false,
            cancel: false,
        }
    }

    pub fn and(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// 转发的同时保留本地投递
    pub fn and_local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_cancel(&self) -> bool {
        self.cancel
    }
}

impl From<&str> for Targets {
    fn from(name: &str) -> Self {
        Targets::to(name)
    }
}

impl From<String> for Targets {
    fn from(name: String) -> Self {
        Targets::to(name)
    }
}

impl<S: Into<String>> From<Option<S>> for Targets {
    fn from(name: Option<S>) -> Self {
        match name {
            Some(name) => Targets::to(name),
            None => Targets::local(),
        }
    }
}

impl<S: Into<String>> From<Vec<S>> for Targets {
    fn from(names: Vec<S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            local: false,
            cancel: false,
        }
    }
}

type Route<T> = Rc<dyn Fn(&T, &Message<T>) -> Targets>;

/// 转发规则
pub enum Forwarder<T> {
    Channel(String),
    Dynamic(Route<T>),
}

impl<T: 'static> Forwarder<T> {
    pub fn to(name: impl Into<String>) -> Self {
        Forwarder::Channel(name.into())
    }

    /// 以函数计算转发目标，返回值可以是名称、名称列表、`Option` 或 `Targets`
    pub fn dynamic<F, R>(route: F) -> Self
    where
        F: Fn(&T, &Message<T>) -> R + 'static,
        R: Into<Targets>,
    {
        Forwarder::Dynamic(Rc::new(move |data, message| route(data, message).into()))
    }
}

impl<T> Forwarder<T> {
    pub(crate) fn resolve(&self, data: &T, message: &Message<T>) -> Targets {
        match self {
            Forwarder::Channel(name) => Targets::to(name.clone()),
            Forwarder::Dynamic(route) => route(data, message),
        }
    }
}

impl<T> Clone for Forwarder<T> {
    fn clone(&self) -> Self {
        match self {
            Forwarder::Channel(name) => Forwarder::Channel(name.clone()),
            Forwarder::Dynamic(route) => Forwarder::Dynamic(route.clone()),
        }
    }
}

impl<T> fmt::Debug for Forwarder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Forwarder::Channel(name) => f.debug_tuple("Channel").field(name).finish(),
            Forwarder::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// 一次 `forward` 调用携带的规则列表
pub struct Forwarding<T> {
    forwarders: Vec<Forwarder<T>>,
}

impl<T: 'static> Forwarding<T> {
    pub fn new() -> Self {
        Self {
            forwarders: Vec::new(),
        }
    }

    pub fn to(mut self, name: impl Into<String>) -> Self {
        self.forwarders.push(Forwarder::to(name));
        self
    }

    pub fn via<F, R>(mut self, route: F) -> Self
    where
        F: Fn(&T, &Message<T>) -> R + 'static,
        R: Into<Targets>,
    {
        self.forwarders.push(Forwarder::dynamic(route));
        self
    }

    pub fn with(mut self, forwarder: Forwarder<T>) -> Self {
        self.forwarders.push(forwarder);
        self
    }

    pub(crate) fn resolve(self) -> BusResult<Vec<Forwarder<T>>> {
        if self.forwarders.is_empty() {
            return Err(BusError::ForwarderNotValid);
        }
        Ok(self.forwarders)
    }
}

impl<T: 'static> Default for Forwarding<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> From<&str> for Forwarding<T> {
    fn from(name: &str) -> Self {
        Self::new().to(name)
    }
}

impl<T: 'static> From<String> for Forwarding<T> {
    fn from(name: String) -> Self {
        Self::new().to(name)
    }
}

impl<T: 'static> From<Forwarder<T>> for Forwarding<T> {
    fn from(forwarder: Forwarder<T>) -> Self {
        Self::new().with(forwarder)
    }
}

impl<T: 'static> From<Vec<&str>> for Forwarding<T> {
    fn from(names: Vec<&str>) -> Self {
        names.into_iter().fold(Self::new(), Forwarding::to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(data: i32) -> Message<i32> {
        Message::new(Rc::new(data), 1, "src")
    }

    #[test]
    fn static_forwarder_targets_its_channel() {
        let msg = message(1);
        let targets = Forwarder::<i32>::to("dst").resolve(msg.data(), &msg);
        assert_eq!(targets.names(), ["dst".to_string()]);
        assert!(!targets.is_local());
    }

    #[test]
    fn dynamic_forwarder_accepts_several_shapes() {
        let msg = message(2);

        let even = Forwarder::dynamic(|data: &i32, _: &Message<i32>| {
            (data % 2 == 0).then_some("even")
        });
        assert_eq!(even.resolve(msg.data(), &msg), Targets::to("even"));

        let none = Forwarder::dynamic(|_: &i32, _: &Message<i32>| Option::<String>::None);
        assert!(none.resolve(msg.data(), &msg).is_local());

        let many = Forwarder::dynamic(|_: &i32, _: &Message<i32>| vec!["a", "b"]);
        assert_eq!(many.resolve(msg.data(), &msg).names().len(), 2);

        let stop = Forwarder::dynamic(|_: &i32, _: &Message<i32>| Targets::cancel());
        let targets = stop.resolve(msg.data(), &msg);
        assert!(targets.is_cancel());
        assert!(!targets.is_local());
        assert!(targets.names().is_empty());
    }

    #[test]
    fn empty_forwarding_is_rejected() {
        assert!(matches!(
            Forwarding::<i32>::new().resolve(),
            Err(BusError::ForwarderNotValid)
        ));
        assert_eq!(Forwarding::<i32>::from(vec!["a", "b"]).resolve().unwrap().len(), 2);
    }
}
