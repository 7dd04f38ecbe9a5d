//! 消息（Message）
//!
//! 不可变的投递信封：载荷 `data`、总线内单调递增的 `id` 以及经过的频道路由 `route`。
//! 转发与冒泡时在原消息基础上复制一份并把当前频道名插入路由头部，`id` 保持不变。
//!
use std::fmt;
use std::rc::Rc;

/// 发布到总线上的一条消息
pub struct Message<T> {
    data: Rc<T>,
    id: u64,
    route: Rc<[String]>,
}

impl<T> Message<T> {
    pub(crate) fn new(data: Rc<T>, id: u64, channel: &str) -> Self {
        Self {
            data,
            id,
            route: Rc::from(vec![channel.to_string()]),
        }
    }

    /// 以当前频道为路由头复制消息，保留 `id`
    pub(crate) fn routed(&self, channel: &str) -> Self {
        let mut route = Vec::with_capacity(self.route.len() + 1);
        route.push(channel.to_string());
        route.extend(self.route.iter().cloned());
        Self {
            data: self.data.clone(),
            id: self.id,
            route: Rc::from(route),
        }
    }

    /// 已发布的数据
    pub fn data(&self) -> &T {
        &self.data
    }

    /// 共享的数据指针，可用于判断两条消息是否承载同一份数据
    pub fn shared_data(&self) -> Rc<T> {
        self.data.clone()
    }

    /// 总线内唯一的发布序号，转发/冒泡过程中保持不变
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 本条消息副本所投递到的频道（即路由中最新的频道）
    pub fn destination(&self) -> &str {
        self.route.first().map(String::as_str).unwrap_or_default()
    }

    /// 经过的频道名，最新的在前
    pub fn route(&self) -> &[String] {
        &self.route
    }

    /// 除最新一跳之外，路由中是否已经出现过该频道
    pub(crate) fn visited(&self, channel: &str) -> bool {
        self.route.iter().skip(1).any(|name| name == channel)
    }
}

impl<T> Clone for Message<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            id: self.id,
            route: self.route.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("route", &self.route)
            .finish()
    }
}
