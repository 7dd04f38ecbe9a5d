//! 总线配置（BusConfig）
//!
//! - `bubbles`：新建频道默认是否向父频道冒泡；
//! - `delimiter`：层级频道名分隔符，必须非空；
//! - `error`：订阅者失败的延迟上报回调，缺省时以 `tracing` 记录告警；
//! - `trace`：频道生命周期与操作的追踪钩子，缺省为空操作。
//!
use crate::error::{BusError, BusResult};
use crate::message::Message;
use bon::Builder;
use std::rc::Rc;

/// 默认分隔符
pub const DEFAULT_DELIMITER: &str = ".";

/// 错误处理回调：`(error, message)`，订阅者 `done` 失败时没有消息
pub type ErrorHandler<T> = Rc<dyn Fn(&anyhow::Error, Option<&Message<T>>)>;

/// 追踪回调：`(channel, event)`
pub type TraceHandler = Rc<dyn Fn(&str, &Trace<'_>)>;

/// 频道上发生的可追踪事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace<'a> {
    Create,
    Bubble(bool),
    Clear,
    Cycle { limit: usize, step: usize },
    Enable(bool),
    Forward { rules: usize },
    Publish { id: u64, route: &'a [String] },
    Reset,
    Retain(usize),
    Shuffle(usize),
    Subscribe { subscribers: usize },
    Toggle,
    Unsubscribe { predicates: usize },
}

impl Trace<'_> {
    /// 事件名，便于日志与过滤
    pub fn name(&self) -> &'static str {
        match self {
            Trace::Create => "create",
            Trace::Bubble(_) => "bubble",
            Trace::Clear => "clear",
            Trace::Cycle { .. } => "cycle",
            Trace::Enable(_) => "enable",
            Trace::Forward { .. } => "forward",
            Trace::Publish { .. } => "publish",
            Trace::Reset => "reset",
            Trace::Retain(_) => "retain",
            Trace::Shuffle(_) => "shuffle",
            Trace::Subscribe { .. } => "subscribe",
            Trace::Toggle => "toggle",
            Trace::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

/// 总线配置
///
/// ```rust
/// use aerobus::{Bus, BusConfig};
///
/// let config = BusConfig::<String>::builder()
///     .bubbles(false)
///     .delimiter("/")
///     .build();
/// let bus = Bus::with_config(config).unwrap();
///
/// assert_eq!(bus.delimiter(), "/");
/// assert!(!bus.channel("a/b").bubbles().unwrap());
/// ```
#[derive(Builder)]
pub struct BusConfig<T> {
    /// 新建频道是否默认冒泡
    #[builder(default = true)]
    pub bubbles: bool,
    /// 层级分隔符
    #[builder(default = DEFAULT_DELIMITER.to_string(), into)]
    pub delimiter: String,
    /// 订阅者失败回调
    pub error: Option<ErrorHandler<T>>,
    /// 追踪回调
    pub trace: Option<TraceHandler>,
}

impl<T> BusConfig<T> {
    pub(crate) fn validate(&self) -> BusResult<()> {
        if self.delimiter.is_empty() {
            return Err(BusError::DelimiterNotValid {
                value: self.delimiter.clone(),
            });
        }
        Ok(())
    }
}

impl<T> Default for BusConfig<T> {
    fn default() -> Self {
        Self {
            bubbles: true,
            delimiter: DEFAULT_DELIMITER.to_string(),
            error: None,
            trace: None,
        }
    }
}

impl<T> Clone for BusConfig<T> {
    fn clone(&self) -> Self {
        Self {
            bubbles: self.bubbles,
            delimiter: self.delimiter.clone(),
            error: self.error.clone(),
            trace: self.trace.clone(),
        }
    }
}
