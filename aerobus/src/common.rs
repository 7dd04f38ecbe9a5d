//! 公共操作接口
//!
//! `Channel`、`Section` 与 `When` 共享同一套操作；实现者只需提供 `dispatch`：
//! 频道与分区立即执行，`When` 记录后在触发时重放。
//! 变长参数在这里被解析成具体的订阅者/转发器列表，解析失败同步返回。
//!
use crate::error::BusResult;
use crate::forwarding::Forwarding;
use crate::operation::Operation;
use crate::subscriber::{Response, Subscription, Unsubscription};
use std::rc::Rc;

pub trait Common<T: 'static> {
    /// 执行（或记录）一次操作
    fn dispatch(&self, operation: Operation<T>) -> BusResult<()>;

    /// 设置是否向父频道冒泡
    fn bubble(&self, value: bool) -> BusResult<&Self> {
        self.dispatch(Operation::Bubble(value))?;
        Ok(self)
    }

    /// 清空订阅者、观察者与保留消息
    fn clear(&self) -> BusResult<&Self> {
        self.dispatch(Operation::Clear)?;
        Ok(self)
    }

    /// 轮转投递：每次发布投递给 `limit` 个订阅者，随后游标前进 `step`（0 表示等于 `limit`）
    fn cycle(&self, limit: usize, step: usize) -> BusResult<&Self> {
        self.dispatch(Operation::Cycle { limit, step })?;
        Ok(self)
    }

    fn enable(&self, value: bool) -> BusResult<&Self> {
        self.dispatch(Operation::Enable(value))?;
        Ok(self)
    }

    fn forward(&self, forwarding: impl Into<Forwarding<T>>) -> BusResult<&Self> {
        let forwarders = forwarding.into().resolve()?;
        self.dispatch(Operation::Forward(forwarders))?;
        Ok(self)
    }

    fn publish(&self, data: T) -> BusResult<&Self> {
        self.dispatch(Operation::Publish {
            data: Rc::new(data),
            callback: None,
        })?;
        Ok(self)
    }

    /// 发布并以全部答复回调一次
    fn publish_with<F>(&self, data: T, callback: F) -> BusResult<&Self>
    where
        F: Fn(Vec<Response>) + 'static,
    {
        self.dispatch(Operation::Publish {
            data: Rc::new(data),
            callback: Some(Rc::new(callback)),
        })?;
        Ok(self)
    }

    fn reset(&self) -> BusResult<&Self> {
        self.dispatch(Operation::Reset)?;
        Ok(self)
    }

    /// 保留最近 `limit` 条消息，0 关闭保留
    fn retain(&self, limit: usize) -> BusResult<&Self> {
        self.dispatch(Operation::Retain(limit))?;
        Ok(self)
    }

    fn retain_all(&self) -> BusResult<&Self> {
        self.retain(usize::MAX)
    }

    /// 随机投递给 `limit` 个不同的订阅者
    fn shuffle(&self, limit: usize) -> BusResult<&Self> {
        self.dispatch(Operation::Shuffle(limit))?;
        Ok(self)
    }

    fn subscribe(&self, subscription: impl Into<Subscription<T>>) -> BusResult<&Self> {
        let subscribers = subscription.into().resolve()?;
        self.dispatch(Operation::Subscribe(subscribers))?;
        Ok(self)
    }

    fn toggle(&self) -> BusResult<&Self> {
        self.dispatch(Operation::Toggle)?;
        Ok(self)
    }

    fn unsubscribe(&self, unsubscription: impl Into<Unsubscription<T>>) -> BusResult<&Self> {
        self.dispatch(Operation::Unsubscribe(unsubscription.into()))?;
        Ok(self)
    }

    /// 移除并结束全部订阅者
    fn unsubscribe_all(&self) -> BusResult<&Self> {
        self.unsubscribe(Unsubscription::all())
    }
}
