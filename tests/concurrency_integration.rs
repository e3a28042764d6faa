//! Integration tests across channels, select, timeouts, and the reactive
//! stream types, exercising them together the way real task bodies would.

use std::cell::RefCell;
use std::rc::Rc;

use corowork::scheduler::{current, Dispatcher, Scheduler};
use corowork::{BackpressureStrategy, Channel, Error, Flow, Select, SharedFlow, StateFlow};

#[test]
fn producer_consumer_over_a_bounded_channel() {
    let result = Scheduler::run_blocking(async {
        let scheduler = current();
        let channel: Channel<i32> = Channel::new(4);

        let producer_channel = channel.clone();
        let producer = scheduler.spawn(Dispatcher::Default, async move {
            for i in 0..10 {
                producer_channel.send(i).await?;
            }
            producer_channel.close();
            Ok::<(), Error>(())
        });

        let mut total = 0;
        while let Some(v) = channel.receive().await {
            total += v;
        }
        producer.join().await?;
        Ok::<i32, Error>(total)
    })
    .unwrap();
    assert_eq!(*result, 45);
}

#[test]
fn rendezvous_channel_hands_off_synchronously() {
    let result = Scheduler::run_blocking(async {
        let scheduler = current();
        let channel: Channel<&'static str> = Channel::new(0);

        let sender_channel = channel.clone();
        let sender = scheduler.spawn(Dispatcher::Default, async move {
            sender_channel.send("ping").await?;
            Ok::<(), Error>(())
        });

        let got = channel.receive().await;
        sender.join().await?;
        Ok::<Option<&'static str>, Error>(got)
    })
    .unwrap();
    assert_eq!(*result, Some("ping"));
}

#[test]
fn select_prefers_an_immediately_ready_case_over_the_default() {
    let result = Scheduler::run_blocking(async {
        let ready: Channel<i32> = Channel::new(1);
        ready.try_send(7);
        let empty: Channel<i32> = Channel::new(1);

        Select::new()
            .with_receive(&empty, |v| format!("empty:{v}"))
            .with_receive(&ready, |v| format!("ready:{v}"))
            .or_default("default".to_string())
            .execute()
            .await
    })
    .unwrap();
    assert_eq!(*result, "ready:7");
}

#[test]
fn select_falls_back_to_default_when_nothing_is_ready() {
    let result = Scheduler::run_blocking(async {
        let empty: Channel<i32> = Channel::new(1);
        Select::new()
            .with_receive(&empty, |v| v)
            .or_default(-1)
            .execute()
            .await
    })
    .unwrap();
    assert_eq!(*result, -1);
}

#[test]
fn select_blocks_until_a_case_becomes_ready_with_no_default() {
    let result = Scheduler::run_blocking(async {
        let scheduler = current();
        let channel: Channel<i32> = Channel::new(1);

        let sender = channel.clone();
        scheduler.spawn(Dispatcher::Default, async move {
            corowork::delay(5.0).await;
            sender.try_send(11);
            Ok::<(), Error>(())
        });

        Select::new().with_receive(&channel, |v| v).execute().await
    })
    .unwrap();
    assert_eq!(*result, 11);
}

#[test]
fn with_timeout_cancels_a_slower_child_task() {
    let result = Scheduler::run_blocking(async {
        corowork::with_timeout(10.0, async {
            corowork::delay(1000.0).await;
            Ok::<i32, Error>(1)
        })
        .await
        .map(|_| ())
    });
    assert!(matches!(result.unwrap_err(), Error::Timeout));
}

#[test]
fn with_timeout_or_null_returns_the_value_when_it_finishes_in_time() {
    let result = Scheduler::run_blocking(async {
        let v = corowork::with_timeout_or_null(500.0, async { Ok::<i32, Error>(3) }).await;
        Ok::<Option<i32>, Error>(v.map(|rc| *rc))
    })
    .unwrap();
    assert_eq!(*result, Some(3));
}

#[test]
fn flow_pipeline_applies_map_filter_and_take_in_order() {
    let result = Scheduler::run_blocking(async {
        let flow = Flow::from_iter(0..20)
            .filter(|v| v % 2 == 0)
            .map(|v| v * 10)
            .take(3);

        let out = Rc::new(RefCell::new(Vec::new()));
        let sink = out.clone();
        flow.collect(move |v| sink.borrow_mut().push(v)).await?;
        Ok::<Vec<i32>, Error>((*out.borrow()).clone())
    })
    .unwrap();
    assert_eq!(*result, vec![0, 20, 40]);
}

#[test]
fn shared_flow_replays_its_history_to_every_late_collector() {
    // Emitted before either collector registers, so both observe the
    // replay window deterministically instead of racing a live emit
    // against collector registration order.
    let result = Scheduler::run_blocking(async {
        let flow: Rc<SharedFlow<i32>> = Rc::new(SharedFlow::new(3, 0, BackpressureStrategy::Suspend));
        for v in 1..=5 {
            assert!(flow.try_emit(v));
        }
        flow.complete();

        let scheduler = current();
        let seen_a = Rc::new(RefCell::new(Vec::new()));
        let seen_b = Rc::new(RefCell::new(Vec::new()));
        let sink_a = seen_a.clone();
        let sink_b = seen_b.clone();
        let flow_a = flow.clone();
        let flow_b = flow.clone();

        let collector_a = scheduler.spawn(Dispatcher::Default, async move {
            flow_a.collect(move |v| sink_a.borrow_mut().push(*v)).await
        });
        let collector_b = scheduler.spawn(Dispatcher::Default, async move {
            flow_b.collect(move |v| sink_b.borrow_mut().push(*v)).await
        });

        collector_a.join().await?;
        collector_b.join().await?;
        Ok::<(Vec<i32>, Vec<i32>), Error>(((*seen_a.borrow()).clone(), (*seen_b.borrow()).clone()))
    })
    .unwrap();
    assert_eq!(result.0, vec![3, 4, 5]);
    assert_eq!(result.1, vec![3, 4, 5]);
}

#[test]
fn state_flow_seeds_a_new_collector_with_the_current_value_then_conflates_changes() {
    // `StateCollect` never reaches a final state on its own (§4.10 has no
    // terminal signal), so this drains it with direct polls the way
    // `state_flow.rs`'s own unit tests do, rather than joining a spawned
    // task that would never complete.
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    let state = StateFlow::new(0, 8);
    state.set_value(5);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut collector = state.collect(move |v| sink.borrow_mut().push(*v));

    let waker = corowork::suspend::noop_waker();
    let mut cx = Context::from_waker(&waker);
    assert!(matches!(
        Future::poll(Pin::new(&mut collector), &mut cx),
        Poll::Pending
    ));
    assert_eq!(*seen.borrow(), vec![5]);

    state.set_value(6);
    state.set_value(6); // conflated, no duplicate delivery
    state.set_value(7);
    assert!(matches!(
        Future::poll(Pin::new(&mut collector), &mut cx),
        Poll::Pending
    ));
    assert_eq!(*seen.borrow(), vec![5, 6, 7]);
}
