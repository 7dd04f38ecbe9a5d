use aerobus::{Bus, Common, Message, Selector, Subscriber, Trigger};
use anyhow::Result as AnyResult;
use std::cell::RefCell;
use std::rc::Rc;

fn collect(bus: &Bus<String>, name: &str) -> Rc<RefCell<Vec<String>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    bus.channel(name)
        .subscribe(Subscriber::listen(move |data: &String, _| {
            sink.borrow_mut().push(data.clone())
        }))
        .unwrap();
    seen
}

#[test]
fn section_broadcasts_to_literal_and_pattern_members() -> AnyResult<()> {
    let bus = Bus::<String>::new();
    bus.bubble(false);
    let metrics = collect(&bus, "metrics.cpu");
    let audit = collect(&bus, "audit");
    let section = bus.section([
        Selector::from("audit"),
        Selector::pattern(r"^metrics\.")?,
    ]);

    section.publish("ping".to_string())?;
    assert_eq!(*metrics.borrow(), ["ping"]);
    assert_eq!(*audit.borrow(), ["ping"]);

    let memory = collect(&bus, "metrics.memory");
    section.publish("pong".to_string())?;
    assert_eq!(*memory.borrow(), ["pong"]);
    Ok(())
}

#[test]
fn section_publish_with_aggregates_once() -> AnyResult<()> {
    let bus = Bus::<String>::new();
    let section = bus.section(["a", "b", "c"]);
    section.subscribe(Subscriber::listen(|_, _| {}))?;

    let calls = Rc::new(RefCell::new(Vec::new()));
    let sink = calls.clone();
    section.publish_with("q".to_string(), move |responses| {
        sink.borrow_mut().push(responses.len())
    })?;
    assert_eq!(*calls.borrow(), [3]);
    Ok(())
}

#[test]
fn when_replays_recorded_operations_on_targets() -> AnyResult<()> {
    let bus = Bus::<String>::new();
    let alerts = collect(&bus, "alerts");
    let when = bus.channel("alerts").when(
        Trigger::from("errors").condition(|m: &Message<String>| m.data().starts_with("fatal")),
    )?;
    when.publish("page on-call".to_string())?;

    bus.channel("errors").publish("warning: disk".to_string())?;
    assert!(alerts.borrow().is_empty());

    bus.channel("errors").publish("fatal: disk".to_string())?;
    assert_eq!(*alerts.borrow(), ["page on-call"]);

    when.done();
    bus.channel("errors").publish("fatal: again".to_string())?;
    assert_eq!(alerts.borrow().len(), 1);
    Ok(())
}

#[test]
fn when_fires_on_bubbled_publications_of_its_source() -> AnyResult<()> {
    let bus = Bus::<String>::new();
    let target = collect(&bus, "target");
    let when = bus.channel("target").when("jobs")?;
    when.publish("job seen".to_string())?;

    bus.channel("jobs.build").publish("built".to_string())?;
    assert_eq!(*target.borrow(), ["job seen"]);
    Ok(())
}

#[test]
fn when_stops_after_source_is_reset() -> AnyResult<()> {
    let bus = Bus::<String>::new();
    let target = collect(&bus, "target");
    let when = bus.channel("target").when("source")?;
    when.publish("fired".to_string())?;

    bus.channel("source").reset()?;
    bus.channel("source").publish("ignored".to_string())?;
    assert!(target.borrow().is_empty());
    Ok(())
}

#[cfg(feature = "stream")]
#[tokio::test]
async fn iterator_resolves_published_data_and_ends_after_done() -> AnyResult<()> {
    let bus = Bus::<String>::new();
    let channel = bus.channel("feed");
    let stream = channel.iter()?;

    let pending = stream.next();
    channel.publish("first".to_string())?;
    let message = pending.await.expect("message");
    assert_eq!(message.data(), "first");
    assert_eq!(message.destination(), "feed");

    stream.done();
    assert!(stream.next().await.is_none());
    Ok(())
}

#[cfg(feature = "stream")]
#[tokio::test]
async fn when_iterator_follows_its_targets() -> AnyResult<()> {
    let bus = Bus::<String>::new();
    let when = bus.channel("target").when("source")?;
    when.publish("relayed".to_string())?;
    let stream = when.iter()?;

    bus.channel("source").publish("go".to_string())?;
    let message = stream.next().await.expect("relayed message");
    assert_eq!(message.data(), "relayed");
    Ok(())
}

#[cfg(feature = "stream")]
#[tokio::test]
async fn stream_ends_when_bus_is_cleared() -> AnyResult<()> {
    use futures_util::StreamExt;

    let bus = Bus::<String>::new();
    let mut stream = bus.channel("feed").iter()?;
    bus.channel("feed").publish("kept".to_string())?;
    let kept = StreamExt::next(&mut stream).await.map(|m| m.data().clone());
    assert_eq!(kept, Some("kept".to_string()));

    bus.clear();
    assert!(StreamExt::next(&mut stream).await.is_none());
    Ok(())
}
