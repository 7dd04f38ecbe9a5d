//! 进程内层级消息总线（aerobus）
//!
//! 以分隔符命名的频道组成一棵树，发布沿树向上冒泡，可按规则转发到其他频道：
//! - 频道（`channel`）：订阅、保留消息、投递策略、转发与环路保护
//! - 总线（`bus`）：层级解析、选择器、默认设置与延迟错误上报
//! - 分区（`section`）：若干频道（含正则匹配）的并集
//! - `when` 组合器（`when`）：源频道发布时对目标重放记录的操作
//! - 消息流（`iterator`）：推送转拉取，`next()` future 与 `Stream`
//!
//! 引擎是单线程的：句柄基于 `Rc`/`RefCell`，不可跨线程传递。订阅者返回的错误不会中断投递，
//! 而是在最外层操作结束后交给总线的错误处理器（缺省以 `tracing` 记录）。
//!
//! 典型用法：
//! 1. 通过 `Bus::new()` 或 `BusConfig::builder()` 创建总线；
//! 2. 用 `bus.channel("a.b")` 取得频道，`subscribe` 订阅、`publish` 发布；
//! 3. 需要答复时使用 `request`，需要批量操作时使用 `bus.section([...])`；
//! 4. 需要按需消费时使用 `iter()` 得到 `MessageStream`。
//!
pub mod bus;
pub mod channel;
pub mod common;
pub mod config;
pub mod error;
pub mod forwarding;
#[cfg(feature = "stream")]
pub mod iterator;
pub mod message;
pub mod operation;
pub mod section;
mod strategy;
pub mod subscriber;
pub mod when;

pub use bus::{Bus, ERROR_CHANNEL, Resolved, Selector};
pub use channel::Channel;
pub use common::Common;
pub use config::{BusConfig, DEFAULT_DELIMITER, ErrorHandler, Trace, TraceHandler};
pub use error::{BusError, BusResult};
pub use forwarding::{Forwarder, Forwarding, Targets};
#[cfg(feature = "stream")]
pub use iterator::{MessageStream, Next};
pub use message::Message;
pub use operation::{Operation, ResponseCallback};
pub use section::Section;
pub use subscriber::{Handler, Reply, Response, Subscriber, Subscription, Unsubscription};
pub use when::{Condition, Trigger, When};
