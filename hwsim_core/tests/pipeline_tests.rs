//! # Pipeline Tests
//!
//! Command, event and completion pipelines driven in stepped mode:
//! - completion ordering and the default sink
//! - asynchronous rejection of queued commands
//! - event subscription filters and unsubscribe
//! - shared event payloads
//! - timers fired from the stepped clock
//! - cache records returned once the pipelines drain

use hwsim_core::commands::CommandRecord;
use hwsim_core::context::COMMAND_CACHE;
use hwsim_core::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ─── Helpers ────────────────────────────────────────────────────────

fn stepped_core() -> SimCore {
    let config = CoreConfig {
        controller_frequency: 1_000,
        timer_frequency: 1_000,
        update_frequency: 1_000,
        ..CoreConfig::default()
    };
    SimCore::with_builtin_objects(config).expect("core")
}

fn add_pwm(core: &SimCore, name: &str) -> ObjectId {
    core.create_object(ObjectKind::Pwm, name, &toml::Table::new())
        .expect("pwm")
}

fn set_duty(duty: f64) -> CommandArgs {
    CommandArgs::Pwm(PwmCommand::SetDuty { duty })
}

fn sink_recorder(core: &SimCore) -> Arc<Mutex<Vec<Completion>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    core.set_completion_sink(Some(Arc::new(move |c: &Completion| {
        sink.lock().push(*c);
    })));
    log
}

fn count_events(core: &SimCore, source: Option<ObjectId>) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    core.subscribe(
        EventKind::ToolheadOrigin,
        ObjectKind::Pwm,
        source,
        EventHandler::External(Arc::new(move |_: &EventNotice<'_>| {
            seen.fetch_add(1, Ordering::SeqCst);
        })),
    );
    count
}

// ─── Completions ────────────────────────────────────────────────────

#[test]
fn test_completions_arrive_in_submission_order() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");
    let received = sink_recorder(&core);

    let ids: Vec<CommandId> = (0..20)
        .map(|i| {
            core.submit_command(fan, set_duty(i as f64 / 20.0), CompletionHandler::Default)
                .expect("submit")
        })
        .collect();
    core.step(1).expect("step");

    let received: Vec<CommandId> = received.lock().iter().map(|c| c.command_id).collect();
    assert_eq!(received, ids);
}

#[test]
fn test_command_ids_are_unique() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");

    let mut ids: Vec<u64> = (0..100)
        .map(|_| {
            core.submit_command(fan, set_duty(0.5), CompletionHandler::Default)
                .expect("submit")
                .raw()
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 100);
}

#[test]
fn test_unclaimed_completions_reach_default_sink() {
    let core = stepped_core();
    let received = sink_recorder(&core);

    let completions = core.context().completions();
    for raw in 1000..1300 {
        completions.post(CommandId::from_raw(raw), RESULT_OK, None);
    }
    core.step(1).expect("step");

    let received = received.lock();
    assert_eq!(received.len(), 300);
    assert!(
        received
            .iter()
            .zip(1000u64..)
            .all(|(c, raw)| c.command_id.raw() == raw),
        "completions must keep FIFO order across ring growth"
    );
}

#[test]
fn test_handler_and_sink_completions_share_one_order() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");

    let order: Arc<Mutex<Vec<(&'static str, CommandId)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let order = Arc::clone(&order);
        core.set_completion_sink(Some(Arc::new(move |c: &Completion| {
            order.lock().push(("sink", c.command_id));
        })));
    }
    let handler = {
        let order = Arc::clone(&order);
        CompletionHandler::External(Arc::new(move |c: &Completion| {
            order.lock().push(("handler", c.command_id));
        }))
    };

    // The fan completes inside exec_command, so ring order is a, b, c.
    let a = core
        .exec_command(fan, set_duty(0.1), handler.clone())
        .expect("exec a");
    let b = CommandId::from_raw(1_000_000);
    core.context().completions().post(b, RESULT_OK, None);
    let c = core
        .exec_command(fan, set_duty(0.2), handler)
        .expect("exec c");

    core.step(1).expect("step");
    assert_eq!(
        *order.lock(),
        vec![("handler", a), ("sink", b), ("handler", c)]
    );
}

#[test]
fn test_external_handler_bypasses_sink() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");
    let sink = sink_recorder(&core);

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handler = CompletionHandler::External(Arc::new(move |c: &Completion| {
        assert_eq!(c.result, RESULT_OK);
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    core.exec_command(fan, set_duty(0.3), handler)
        .expect("exec");
    core.step(1).expect("step");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(sink.lock().is_empty());
}

// ─── Commands ───────────────────────────────────────────────────────

#[test]
fn test_queued_rejection_is_reported_to_handler() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");
    let received = sink_recorder(&core);

    let out_of_range = core
        .submit_command(fan, set_duty(2.0), CompletionHandler::Default)
        .expect("queued commands are accepted");
    let unsupported = core
        .submit_command(
            fan,
            CommandArgs::Probe(ProbeCommand::Deploy),
            CompletionHandler::Default,
        )
        .expect("queued commands are accepted");
    core.step(1).expect("step");

    let results: Vec<(CommandId, i32)> = received
        .lock()
        .iter()
        .map(|c| (c.command_id, c.result))
        .collect();
    assert_eq!(
        results,
        vec![
            (out_of_range, CommandReject::OutOfRange(String::new()).code()),
            (unsupported, CommandReject::Unsupported.code()),
        ]
    );
    let duty = match core.status(&[fan])[0] {
        Some(ObjectStatus::Pwm(status)) => status.duty,
        other => panic!("unexpected status {other:?}"),
    };
    assert_eq!(duty, 0.0, "rejected command must not change state");
}

#[test]
fn test_exec_rejection_is_synchronous() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");
    let received = sink_recorder(&core);

    let err = core
        .exec_command(fan, set_duty(-1.0), CompletionHandler::Default)
        .unwrap_err();
    assert!(matches!(err, CoreError::CommandRejected { target, .. } if target == fan));
    core.step(1).expect("step");
    assert!(received.lock().is_empty(), "no completion for a rejected exec");
}

#[test]
fn test_submit_to_unknown_object() {
    let core = stepped_core();
    let ghost = ObjectId::from_raw(777);
    assert!(matches!(
        core.submit_command(ghost, set_duty(0.1), CompletionHandler::Default),
        Err(CoreError::ObjectNotFound(id)) if id == ghost
    ));
    assert!(matches!(
        core.exec_command(ghost, set_duty(0.1), CompletionHandler::Default),
        Err(CoreError::ObjectNotFound(_))
    ));
}

// ─── Events ─────────────────────────────────────────────────────────

#[test]
fn test_event_source_filter() {
    let core = stepped_core();
    let a = add_pwm(&core, "a");
    let b = add_pwm(&core, "b");
    core.init_all().expect("init");

    let any = count_events(&core, None);
    let only_a = count_events(&core, Some(a));
    let steppers = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&steppers);
    core.subscribe(
        EventKind::ToolheadOrigin,
        ObjectKind::Stepper,
        None,
        EventHandler::External(Arc::new(move |_: &EventNotice<'_>| {
            seen.fetch_add(1, Ordering::SeqCst);
        })),
    );

    core.submit_event(a, EventData::ToolheadOrigin).expect("event a");
    core.submit_event(b, EventData::ToolheadOrigin).expect("event b");
    core.submit_event(b, EventData::ToolheadOrigin).expect("event b");
    core.step(1).expect("step");

    assert_eq!(any.load(Ordering::SeqCst), 3);
    assert_eq!(only_a.load(Ordering::SeqCst), 1);
    assert_eq!(steppers.load(Ordering::SeqCst), 0);
}

#[test]
fn test_notice_carries_source() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    core.subscribe(
        EventKind::EndstopTriggered,
        ObjectKind::Pwm,
        None,
        EventHandler::External(Arc::new(move |n: &EventNotice<'_>| {
            log.lock()
                .push((n.source_id, n.source_name.to_string(), n.kind, *n.data));
        })),
    );
    core.submit_event(fan, EventData::EndstopTriggered { triggered: true })
        .expect("event");
    core.step(1).expect("step");

    assert_eq!(
        *seen.lock(),
        vec![(
            fan,
            "fan".to_string(),
            EventKind::EndstopTriggered,
            EventData::EndstopTriggered { triggered: true }
        )]
    );
}

#[test]
fn test_unsubscribe_twice() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let id = core.subscribe(
        EventKind::ToolheadOrigin,
        ObjectKind::Pwm,
        None,
        EventHandler::External(Arc::new(move |_: &EventNotice<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    );

    core.unsubscribe(EventKind::ToolheadOrigin, id)
        .expect("first unsubscribe");
    assert!(matches!(
        core.unsubscribe(EventKind::ToolheadOrigin, id),
        Err(CoreError::NotSubscribed(_))
    ));

    core.submit_event(fan, EventData::ToolheadOrigin).expect("event");
    core.step(1).expect("step");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_shared_payload_released_after_dispatch() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");
    let any = count_events(&core, None);

    let payload = Arc::new(EventData::ToolheadOrigin);
    core.submit_shared_event(fan, Arc::clone(&payload))
        .expect("event");
    assert_eq!(Arc::strong_count(&payload), 2);
    core.step(1).expect("step");

    assert_eq!(any.load(Ordering::SeqCst), 1);
    assert_eq!(Arc::strong_count(&payload), 1);
}

// ─── Timers ─────────────────────────────────────────────────────────

#[test]
fn test_one_shot_and_periodic_timers() {
    let core = stepped_core();
    let mask = core.context().clock().mask();

    let once = Arc::new(AtomicUsize::new(0));
    let fired = Arc::clone(&once);
    let one_shot = core.register_timer(
        50,
        Box::new(move |_now: u64| {
            fired.fetch_add(1, Ordering::SeqCst);
            0
        }),
    );

    let ticks = Arc::new(AtomicUsize::new(0));
    let fired = Arc::clone(&ticks);
    let periodic = core.register_timer(
        10,
        Box::new(move |now: u64| {
            fired.fetch_add(1, Ordering::SeqCst);
            mask.add(now, 10)
        }),
    );

    core.step(100).expect("step");
    assert_eq!(once.load(Ordering::SeqCst), 1);
    assert_eq!(ticks.load(Ordering::SeqCst), 10);

    core.unregister_timer(periodic).expect("unregister");
    assert!(matches!(
        core.unregister_timer(periodic),
        Err(CoreError::TimerNotRegistered(_))
    ));
    core.step(100).expect("step");
    assert_eq!(ticks.load(Ordering::SeqCst), 10);

    // A disarmed timer can be re-armed.
    core.reschedule_timer(one_shot, mask.add(core.clock().ticks, 5))
        .expect("reschedule");
    core.step(10).expect("step");
    assert_eq!(once.load(Ordering::SeqCst), 2);
}

// ─── Caches ─────────────────────────────────────────────────────────

#[test]
fn test_command_records_return_to_cache() {
    let core = stepped_core();
    let fan = add_pwm(&core, "fan");
    core.init_all().expect("init");

    let caches = core.context().caches();
    let records = caches
        .acquire::<CommandRecord>(COMMAND_CACHE)
        .expect("command cache");

    for _ in 0..50 {
        core.submit_command(fan, set_duty(0.5), CompletionHandler::Default)
            .expect("submit");
    }
    assert_eq!(records.stats().allocated, 50);
    core.step(1).expect("step");
    assert_eq!(records.stats().allocated, 0);

    for _ in 0..10 {
        core.submit_command(fan, set_duty(0.5), CompletionHandler::Default)
            .expect("submit");
    }
    core.destroy_object(fan).expect("destroy");
    core.step(1).expect("step");
    assert_eq!(records.stats().allocated, 0);

    drop(records);
    assert!(!caches.release(COMMAND_CACHE), "core still holds the cache");
}
