use aerobus::{Bus, BusConfig, Common, Forwarding, Message, Reply, Subscriber, Targets, Trace};
use anyhow::Result as AnyResult;
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

/// 记录 "频道:数据" 的订阅者
fn recorder(log: &Log, label: &str) -> Subscriber<i32> {
    let log = log.clone();
    let label = label.to_string();
    Subscriber::listen(move |data: &i32, _| log.borrow_mut().push(format!("{label}:{data}")))
}

#[test]
fn bubbling_delivers_to_ancestors_before_local_subscribers() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let log: Log = Rc::default();
    bus.root().subscribe(recorder(&log, "root"))?;
    bus.channel("a").subscribe(recorder(&log, "a"))?;
    bus.channel("a.b").subscribe(recorder(&log, "a.b"))?;

    bus.channel("a.b").publish(1)?;
    assert_eq!(*log.borrow(), ["root:1", "a:1", "a.b:1"]);
    Ok(())
}

#[test]
fn message_keeps_id_and_records_route_while_bubbling() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let seen: Rc<RefCell<Vec<Message<i32>>>> = Rc::default();
    for name in ["", "a", "a.b"] {
        let sink = seen.clone();
        bus.channel(name)
            .subscribe(Subscriber::listen(move |_: &i32, m| sink.borrow_mut().push(m.clone())))?;
    }
    bus.channel("a.b").publish(1)?.publish(2)?;

    let seen = seen.borrow();
    assert_eq!(seen.len(), 6);
    let first: Vec<(&str, u64)> = seen[..3].iter().map(|m| (m.destination(), m.id())).collect();
    assert_eq!(first, [("", 1), ("a", 1), ("a.b", 1)]);
    assert_eq!(seen[0].route(), ["", "a", "a.b"]);
    assert!(seen[3..].iter().all(|m| m.id() == 2));
    Ok(())
}

#[test]
fn non_bubbling_channel_keeps_publications_local() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let log: Log = Rc::default();
    bus.channel("a").subscribe(recorder(&log, "a"))?;
    bus.channel("a.b").subscribe(recorder(&log, "a.b"))?.bubble(false)?;

    bus.channel("a.b").publish(1)?;
    assert_eq!(*log.borrow(), ["a.b:1"]);
    Ok(())
}

#[test]
fn disabled_channel_or_ancestor_blocks_delivery() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let log: Log = Rc::default();
    let leaf = bus.channel("a.b");
    leaf.subscribe(recorder(&log, "a.b"))?;

    leaf.enable(false)?.publish(1)?;
    assert!(log.borrow().is_empty());

    leaf.enable(true)?;
    bus.channel("a").enable(false)?;
    assert!(!leaf.enabled()?);
    leaf.publish(2)?;
    assert!(log.borrow().is_empty());

    bus.channel("a").toggle()?;
    leaf.publish(3)?;
    assert_eq!(*log.borrow(), ["a.b:3"]);
    Ok(())
}

#[test]
fn retention_keeps_latest_and_replays_to_late_subscribers() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let channel = bus.channel("r");
    channel.retain(2)?.publish(1)?.publish(2)?.publish(3)?;

    let retained: Vec<i32> = channel.retentions()?.iter().map(|m| *m.data()).collect();
    assert_eq!(retained, [2, 3]);
    assert_eq!(channel.retention_limit()?, 2);

    let log: Log = Rc::default();
    channel.subscribe(recorder(&log, "late"))?;
    assert_eq!(*log.borrow(), ["late:2", "late:3"]);

    channel.retain(0)?;
    assert!(channel.retentions()?.is_empty());
    assert_eq!(channel.retention_limit()?, 0);
    Ok(())
}

#[test]
fn clear_keeps_retention_limit_and_reset_drops_it() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let channel = bus.channel("r");
    channel.retain_all()?.publish(1)?.bubble(false)?;

    channel.clear()?;
    assert!(channel.retentions()?.is_empty());
    assert_eq!(channel.retention_limit()?, usize::MAX);
    assert!(!channel.bubbles()?);

    channel.forward("elsewhere")?.enable(false)?.reset()?;
    assert_eq!(channel.retention_limit()?, 0);
    assert!(channel.forwarders()?.is_empty());
    assert!(channel.enabled()?);
    assert!(channel.bubbles()?);
    Ok(())
}

#[test]
fn static_forwarding_skips_the_source_pipeline() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let log: Log = Rc::default();
    bus.channel("x").subscribe(recorder(&log, "x"))?.forward("y")?;
    bus.channel("y").subscribe(recorder(&log, "y"))?;

    bus.channel("x").publish(1)?;
    assert_eq!(*log.borrow(), ["y:1"]);
    Ok(())
}

#[test]
fn forwarded_message_carries_full_route() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    bus.bubble(false);
    let routes: Rc<RefCell<Vec<Vec<String>>>> = Rc::default();
    let sink = routes.clone();
    bus.channel("x").forward("y")?;
    bus.channel("y")
        .subscribe(Subscriber::listen(move |_: &i32, m| sink.borrow_mut().push(m.route().to_vec())))?;

    bus.channel("x").publish(1)?;
    assert_eq!(*routes.borrow(), [vec!["y".to_string(), "x".to_string()]]);
    Ok(())
}

#[test]
fn forwarding_cycle_delivers_once_at_the_revisited_channel() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let log: Log = Rc::default();
    bus.channel("x").subscribe(recorder(&log, "x"))?.forward("y")?;
    bus.channel("y").subscribe(recorder(&log, "y"))?.forward("x")?;

    // x → y → x：回到 x 时不再转发，只做本地投递
    bus.channel("x").publish(1)?;
    assert_eq!(*log.borrow(), ["x:1"]);
    Ok(())
}

#[test]
fn forwarding_rule_can_cancel_the_whole_publication() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let log: Log = Rc::default();
    bus.root().subscribe(recorder(&log, "root"))?;
    bus.channel("audit").subscribe(recorder(&log, "audit"))?;
    let input = bus.channel("in");
    input.subscribe(recorder(&log, "in"))?.retain(4)?.forward(
        Forwarding::new()
            .via(|data: &i32, _: &Message<i32>| {
                if *data < 0 {
                    Targets::cancel()
                } else {
                    Targets::local()
                }
            })
            .to("audit"),
    )?;

    input.publish(-1)?;
    assert!(log.borrow().is_empty());
    assert!(input.retentions()?.is_empty());
    assert!(input.request(-2)?.is_empty());

    input.publish(1)?;
    assert_eq!(*log.borrow(), ["root:1", "audit:1", "root:1", "in:1"]);
    Ok(())
}

#[test]
fn cancel_in_forward_destination_stops_the_source_fan_out() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    bus.bubble(false);
    let log: Log = Rc::default();
    bus.channel("y")
        .subscribe(Subscriber::new(|_: &i32, _| Ok(Reply::Cancel)))?;
    bus.channel("z").subscribe(recorder(&log, "z"))?;
    bus.channel("z")
        .subscribe(Subscriber::new(|_: &i32, _| Ok(Reply::value(7))))?;
    bus.channel("x").forward(vec!["y", "z"])?;

    let responses = bus.channel("x").request(1)?;
    assert!(responses.is_empty());
    assert!(log.borrow().is_empty());

    bus.channel("z").request(2)?;
    assert_eq!(*log.borrow(), ["z:2"]);
    Ok(())
}

#[test]
fn dynamic_forwarding_may_keep_local_delivery() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    bus.bubble(false);
    let log: Log = Rc::default();
    bus.channel("in").subscribe(recorder(&log, "in"))?;
    bus.channel("even").subscribe(recorder(&log, "even"))?;
    bus.channel("in")
        .forward(Forwarding::new().via(|data: &i32, _: &Message<i32>| {
            if data % 2 == 0 {
                Targets::to("even")
            } else {
                Targets::local()
            }
        }))?;

    bus.channel("in").publish(1)?.publish(2)?;
    assert_eq!(*log.borrow(), ["in:1", "even:2"]);
    Ok(())
}

#[test]
fn forwarding_to_own_name_counts_as_local() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    bus.bubble(false);
    let log: Log = Rc::default();
    bus.channel("a").subscribe(recorder(&log, "a"))?;
    bus.channel("b").subscribe(recorder(&log, "b"))?;
    bus.channel("a")
        .forward(Forwarding::new().via(|_: &i32, _: &Message<i32>| vec!["b", "a", "b"]))?;

    bus.channel("a").publish(1)?;
    assert_eq!(*log.borrow(), ["b:1", "a:1"]);
    Ok(())
}

#[test]
fn empty_forwarding_is_rejected() {
    let bus = Bus::<i32>::new();
    let err = bus.channel("a").forward(Forwarding::new()).unwrap_err();
    assert!(matches!(err, aerobus::BusError::ForwarderNotValid));
}

#[test]
fn cancel_stops_remaining_delivery() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    let log: Log = Rc::default();
    bus.channel("a")
        .subscribe(Subscriber::new(|_: &i32, _| Ok(Reply::Cancel)))?;
    bus.channel("a.b").subscribe(recorder(&log, "a.b"))?;

    // 父频道中止后，本地订阅者不再收到
    bus.channel("a.b").publish(1)?;
    assert!(log.borrow().is_empty());
    Ok(())
}

#[test]
fn request_collects_bubbling_then_local_replies() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    bus.channel("a")
        .subscribe(Subscriber::new(|_: &i32, _| Ok(Reply::value(1))))?;
    bus.channel("a.b")
        .subscribe(Subscriber::new(|_: &i32, _| Ok(Reply::value(2))))?;

    let values: Vec<i32> = bus
        .channel("a.b")
        .request(0)?
        .iter()
        .filter_map(|r| r.downcast_ref::<i32>().copied())
        .collect();
    assert_eq!(values, [1, 2]);
    Ok(())
}

#[test]
fn publish_with_reports_acks_and_failures() -> AnyResult<()> {
    let bus = Bus::<i32>::new();
    bus.set_error(Some(Rc::new(|_: &anyhow::Error, _: Option<&Message<i32>>| {})));
    let channel = bus.channel("a");
    channel.subscribe(Subscriber::listen(|_, _| {}))?;
    channel.subscribe(Subscriber::new(|_: &i32, _| Err(anyhow::anyhow!("boom"))))?;

    let summary: Rc<RefCell<Vec<(bool, Option<String>)>>> = Rc::default();
    let sink = summary.clone();
    channel.publish_with(1, move |responses| {
        sink.borrow_mut().extend(
            responses
                .iter()
                .map(|r| (r.is_ack(), r.error().map(|e| e.to_string()))),
        )
    })?;

    assert_eq!(
        *summary.borrow(),
        [(true, None), (false, Some("boom".to_string()))]
    );
    Ok(())
}

#[test]
fn trace_hook_sees_lifecycle_events() -> AnyResult<()> {
    let events: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = events.clone();
    let bus = Bus::<i32>::with_config(
        BusConfig::builder()
            .trace(Rc::new(move |channel: &str, event: &Trace<'_>| {
                sink.borrow_mut().push(format!("{}@{channel}", event.name()))
            }))
            .build(),
    )?;

    bus.channel("a").retain(1)?.publish(1)?;
    assert_eq!(
        *events.borrow(),
        ["create@", "create@a", "retain@a", "publish@a", "publish@"]
    );
    Ok(())
}
