use aerobus::{
    Bus, BusConfig, Common, Forwarding, Handler, Message, Reply, Subscriber, Targets, Trigger,
};
use std::cell::Cell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
enum OrderEvent {
    Placed { id: u32, amount: i64 },
    Paid { id: u32 },
    Shipped { id: u32 },
}

impl Display for OrderEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placed { id, amount } => write!(f, "order #{id} placed ({amount})"),
            Self::Paid { id } => write!(f, "order #{id} paid"),
            Self::Shipped { id } => write!(f, "order #{id} shipped"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum OrderError {
    #[error("order #{0} exceeds the credit limit")]
    OverLimit(u32),
}

/// 统计下单金额，金额超限时返回错误
#[derive(Default)]
struct Ledger {
    total: Cell<i64>,
}

impl Handler<OrderEvent> for Ledger {
    fn next(&self, event: &OrderEvent, _message: &Message<OrderEvent>) -> anyhow::Result<Reply> {
        if let OrderEvent::Placed { id, amount } = event {
            if *amount > 10_000 {
                return Err(OrderError::OverLimit(*id).into());
            }
            self.total.set(self.total.get() + amount);
            return Ok(Reply::value(self.total.get()));
        }
        Ok(Reply::Ack)
    }

    fn done(&self) -> anyhow::Result<()> {
        println!("ledger closed: total={}", self.total.get());
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("ledger")
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    tracing::info!("aerobus demo");

    let bus = Bus::with_config(
        BusConfig::builder()
            .error(Rc::new(
                |error: &anyhow::Error, message: Option<&Message<OrderEvent>>| {
                    println!(
                        "error: {error} (message {:?})",
                        message.map(Message::id)
                    )
                },
            ))
            .build(),
    )?;

    // 冒泡：orders 能看到 orders.placed 的发布
    bus.channel("orders").subscribe(Subscriber::listen(
        |event: &OrderEvent, message| println!("[{}] {event}", message.destination()),
    ))?;

    // 保留：晚到的订阅者也能收到最近两条
    let placed = bus.channel("orders.placed");
    placed.retain(2)?;
    placed.publish(OrderEvent::Placed { id: 1, amount: 300 })?;
    placed.publish(OrderEvent::Placed { id: 2, amount: 700 })?;

    let ledger = Rc::new(Ledger::default());
    placed.subscribe(Subscriber::<OrderEvent>::handler(ledger.clone()))?;
    println!("replayed total: {}", ledger.total.get());

    // 请求/响应：先冒泡链路，后本地订阅者
    let responses = placed.request(OrderEvent::Placed { id: 3, amount: 1_000 })?;
    for response in &responses {
        println!("response: {response:?}");
    }

    // 失败的订阅者不会打断投递，错误在发布结束后上报
    placed.publish(OrderEvent::Placed {
        id: 4,
        amount: 50_000,
    })?;

    // 转发：paid 只流向 fulfilment，已发货的消息同时保留本地投递
    bus.channel("fulfilment").subscribe(Subscriber::listen(
        |event: &OrderEvent, message| println!("fulfilment <- {event} via {:?}", message.route()),
    ))?;
    bus.channel("orders.paid").forward("fulfilment")?;
    bus.channel("orders.shipped")
        .forward(Forwarding::new().via(|_: &OrderEvent, _: &Message<OrderEvent>| {
            Targets::to("fulfilment").and_local()
        }))?;
    bus.channel("orders.paid")
        .publish(OrderEvent::Paid { id: 1 })?;
    bus.channel("orders.shipped")
        .publish(OrderEvent::Shipped { id: 1 })?;

    // 轮转：两个仓库轮流处理
    let warehouses = bus.channel("warehouse");
    for name in ["north", "south"] {
        warehouses.subscribe(Subscriber::listen(move |event: &OrderEvent, _| {
            println!("{name} picks {event}")
        }))?;
    }
    warehouses.bubble(false)?.cycle(1, 1)?;
    for id in 10..13 {
        warehouses.publish(OrderEvent::Shipped { id })?;
    }

    // when：每次付款后通知客服
    let notify = bus.channel("support").when(
        Trigger::from("orders.paid")
            .condition(|message: &Message<OrderEvent>| matches!(message.data(), OrderEvent::Paid { .. })),
    )?;
    bus.channel("support").subscribe(Subscriber::listen(|event: &OrderEvent, _| {
        println!("support notified: {event}")
    }))?;
    notify.publish(OrderEvent::Paid { id: 0 })?;
    bus.channel("orders.paid")
        .publish(OrderEvent::Paid { id: 2 })?;
    notify.done();

    // 消息流：拉取式消费
    let stream = bus.channel("orders").iter()?;
    bus.channel("orders.shipped")
        .publish(OrderEvent::Shipped { id: 2 })?;
    if let Some(message) = stream.next().await {
        println!("stream: {} (id={})", message.data(), message.id());
    }
    stream.done();

    bus.clear();
    tracing::info!(channels = bus.channels().len(), "bus cleared");
    Ok(())
}
