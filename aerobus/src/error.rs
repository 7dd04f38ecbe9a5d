//! 消息总线统一错误定义
//!
//! 三类错误：
//! - 参数形态错误（订阅、退订、转发、触发器、配置解析）：在调用处同步返回；
//! - 已删除对象错误：总线 `clear()` 之后继续通过旧句柄操作频道时同步返回；
//! - 订阅者运行时错误：在投递点捕获，不中断投递循环，延迟交给总线错误处理器，
//!   不在此枚举中体现（回调直接返回 `anyhow::Error`）。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BusError {
    // --- 参数形态 ---
    #[error("subscription expects at least one subscriber (a callback or a handler)")]
    SubscriberNotValid,
    #[error("forwarding expects at least one forwarder (a channel name or a function)")]
    ForwarderNotValid,
    #[error("when expects at least one source channel name")]
    DependencyNotValid,
    #[error("delimiter expected to be a non-empty string, not {value:?}")]
    DelimiterNotValid { value: String },
    #[error("pattern error: {source}")]
    Pattern {
        #[from]
        source: regex::Error,
    },

    // --- 生命周期 ---
    #[error("this instance of {kind} has been deleted")]
    Deleted { kind: &'static str },
}

impl BusError {
    pub(crate) fn deleted(kind: &'static str) -> Self {
        BusError::Deleted { kind }
    }
}

/// 统一 Result 类型别名
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_error_names_the_kind() {
        let err = BusError::deleted("Channel");
        assert_eq!(err.to_string(), "this instance of Channel has been deleted");
    }

    #[test]
    fn regex_errors_convert_with_question_mark() {
        fn compile(pattern: &str) -> BusResult<regex::Regex> {
            Ok(regex::Regex::new(pattern)?)
        }

        let err = compile("(").unwrap_err();
        assert!(matches!(err, BusError::Pattern { .. }));
        assert!(err.to_string().starts_with("pattern error:"));
    }
}
