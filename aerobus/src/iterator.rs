//! 消息流（MessageStream）
//!
//! 把推送式的发布转换为拉取式消费：一个共享观察者挂在所有源频道上，
//! 有等待者时直接交付，否则缓存到队列。`next()` 返回一个 future；
//! 流结束（显式 `done()`，或所有源频道都已清空/重置）后 future 得到 `None`。
//!
use crate::channel::{Channel, Observer};
use crate::error::BusResult;
use crate::message::Message;
use futures_core::Stream;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

struct StreamState<T> {
    buffer: RefCell<VecDeque<Message<T>>>,
    waiters: RefCell<VecDeque<oneshot::Sender<Option<Message<T>>>>>,
    /// 尚未结束观察的源数量
    remaining: Cell<usize>,
    finished: Cell<bool>,
}

impl<T> StreamState<T> {
    fn finish(&self) {
        if self.finished.replace(true) {
            return;
        }
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            let _ = waiter.send(None);
        }
    }
}

impl<T> Observer<T> for StreamState<T> {
    fn next(&self, message: &Message<T>) {
        if self.finished.get() {
            return;
        }
        let mut message = message.clone();
        loop {
            let waiter = self.waiters.borrow_mut().pop_front();
            let Some(waiter) = waiter else {
                break;
            };
            // 接收端已丢弃时交给下一个等待者
            match waiter.send(Some(message)) {
                Err(Some(returned)) => message = returned,
                _ => return,
            }
        }
        self.buffer.borrow_mut().push_back(message);
    }

    fn done(&self) {
        let remaining = self.remaining.get().saturating_sub(1);
        self.remaining.set(remaining);
        if remaining == 0 {
            self.finish();
        }
    }
}

/// `MessageStream::next` 返回的 future
pub enum Next<T> {
    Ready(Option<Message<T>>),
    Waiting(oneshot::Receiver<Option<Message<T>>>),
}

impl<T> Future for Next<T> {
    type Output = Option<Message<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut() {
            Next::Ready(message) => Poll::Ready(message.take()),
            Next::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.ok().flatten()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Next<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Next::Ready(message) => f.debug_tuple("Ready").field(message).finish(),
            Next::Waiting(_) => f.write_str("Waiting"),
        }
    }
}

/// 对一个或多个频道的拉取式消费
///
/// ```rust
/// use aerobus::{Bus, Common};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = Bus::<&'static str>::new();
/// let channel = bus.channel("news");
/// let stream = channel.iter().unwrap();
///
/// channel.publish("hello").unwrap();
/// assert_eq!(stream.next().await.map(|m| *m.data()), Some("hello"));
///
/// stream.done();
/// assert!(stream.next().await.is_none());
/// # }
/// ```
pub struct MessageStream<T: 'static> {
    state: Rc<StreamState<T>>,
    observer: Rc<dyn Observer<T>>,
    sources: Vec<Channel<T>>,
    pending: Option<Next<T>>,
}

impl<T: 'static> MessageStream<T> {
    pub(crate) fn new(sources: Vec<Channel<T>>) -> BusResult<Self> {
        let state = Rc::new(StreamState {
            buffer: RefCell::new(VecDeque::new()),
            waiters: RefCell::new(VecDeque::new()),
            remaining: Cell::new(sources.len()),
            finished: Cell::new(sources.is_empty()),
        });
        let observer: Rc<dyn Observer<T>> = state.clone();
        for (attached, source) in sources.iter().enumerate() {
            if let Err(err) = source.cell().observe(observer.clone()) {
                for source in &sources[..attached] {
                    let _ = source.cell().unobserve(&observer);
                }
                return Err(err);
            }
        }
        Ok(Self {
            state,
            observer,
            sources,
            pending: None,
        })
    }

    /// 下一条消息：已缓存时立即就绪，否则等待下一次发布；流结束后得到 `None`
    pub fn next(&self) -> Next<T> {
        if self.state.finished.get() {
            return Next::Ready(None);
        }
        if let Some(message) = self.state.buffer.borrow_mut().pop_front() {
            return Next::Ready(Some(message));
        }
        let (sender, receiver) = oneshot::channel();
        self.state.waiters.borrow_mut().push_back(sender);
        Next::Waiting(receiver)
    }

    /// 结束迭代：从所有源频道解除观察，唤醒全部等待者
    pub fn done(&self) {
        if self.state.finished.get() {
            return;
        }
        for source in &self.sources {
            // 已删除的频道不再持有观察者
            let _ = source.cell().unobserve(&self.observer);
        }
        self.state.finish();
    }

    pub fn is_done(&self) -> bool {
        self.state.finished.get()
    }

    pub fn sources(&self) -> &[Channel<T>] {
        &self.sources
    }
}

impl<T: 'static> Drop for MessageStream<T> {
    fn drop(&mut self) {
        self.done();
    }
}

impl<T: 'static> Stream for MessageStream<T> {
    type Item = Message<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut next = match this.pending.take() {
            Some(next) => next,
            None => this.next(),
        };
        match Pin::new(&mut next).poll(cx) {
            Poll::Ready(message) => Poll::Ready(message),
            Poll::Pending => {
                this.pending = Some(next);
                Poll::Pending
            }
        }
    }
}

impl<T: 'static> fmt::Debug for MessageStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("sources", &self.sources)
            .field("buffered", &self.state.buffer.borrow().len())
            .field("finished", &self.state.finished.get())
            .finish()
    }
}
