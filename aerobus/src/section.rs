//! 分区（Section）
//!
//! 分区是若干频道的并集：字面名称在构造时解析一次，正则在每次访问时
//! 对总线现有频道重新匹配，因此之后创建的频道也会被纳入。
//! 所有操作按成员顺序分别作用于每个频道。
//!
use crate::bus::{BusShared, Resolved};
use crate::channel::Channel;
use crate::common::Common;
use crate::error::{BusError, BusResult};
#[cfg(feature = "stream")]
use crate::iterator::MessageStream;
use crate::operation::Operation;
use crate::subscriber::Response;
use crate::when::{Trigger, When};
use regex::Regex;
use std::fmt;
use std::rc::{Rc, Weak};

pub(crate) enum Member<T> {
    Fixed(Channel<T>),
    Pattern(Regex),
}

pub struct Section<T> {
    bus: Weak<BusShared<T>>,
    members: Rc<[Member<T>]>,
}

impl<T: 'static> Section<T> {
    pub(crate) fn new(bus: Weak<BusShared<T>>, members: Vec<Member<T>>) -> Self {
        Self {
            bus,
            members: members.into(),
        }
    }

    fn bus(&self) -> BusResult<Rc<BusShared<T>>> {
        self.bus.upgrade().ok_or_else(|| BusError::deleted("Bus"))
    }

    /// 当前成员频道；任一字面成员已被删除时返回 `Deleted`
    pub fn channels(&self) -> BusResult<Vec<Channel<T>>> {
        let bus = self.bus()?;
        let channels = bus.expand(&self.members);
        if channels.iter().any(Channel::is_deleted) {
            return Err(BusError::deleted("Section"));
        }
        Ok(channels)
    }

    /// 向全部成员发布并汇总答复
    pub fn request(&self, data: T) -> BusResult<Vec<Response>> {
        let bus = self.bus()?;
        bus.scope(|| Operation::collect(Rc::new(data), &self.channels()?))
    }

    pub fn when(&self, trigger: impl Into<Trigger<T>>) -> BusResult<When<T>> {
        let bus = self.bus()?;
        When::new(&bus, trigger.into(), Resolved::Section(self.clone()))
    }

    /// 以全部成员为源的消息流
    #[cfg(feature = "stream")]
    pub fn iter(&self) -> BusResult<MessageStream<T>> {
        MessageStream::new(self.channels()?)
    }
}

impl<T: 'static> Common<T> for Section<T> {
    fn dispatch(&self, operation: Operation<T>) -> BusResult<()> {
        let bus = self.bus()?;
        bus.scope(|| operation.apply(&self.channels()?))
    }
}

impl<T> Clone for Section<T> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            members: self.members.clone(),
        }
    }
}

impl<T> fmt::Debug for Section<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self
            .members
            .iter()
            .map(|member| match member {
                Member::Fixed(channel) => format!("{channel:?}"),
                Member::Pattern(pattern) => format!("/{pattern}/"),
            })
            .collect();
        f.debug_struct("Section").field("members", &members).finish()
    }
}
