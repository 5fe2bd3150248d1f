use super::*;
use crate::host::{self, HostBridge, HostEvents};
use crate::pump::{self, PumpHandle};
use crate::task::{ScriptRun, Task};
use crossbeam::channel::{self, Receiver};
use std::thread;
use tether_engine::{EngineOptions, FaultKind, NativeArg, ScriptValue, SourceContext};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A loop running on its own pump thread with host callbacks installed.
struct Harness {
    handle: LoopHandle,
    messages: Receiver<String>,
    failures: Receiver<String>,
    pump: Option<PumpHandle<()>>,
}

impl Harness {
    fn start() -> Self {
        Self::start_with(|_| {})
    }

    fn start_with(configure: impl FnOnce(&mut EventLoop<'_>) + Send + 'static) -> Self {
        let handle = LoopHandle::new();
        let events = Arc::new(HostEvents::default());

        let (message_tx, messages) = channel::unbounded();
        events.on_message(Arc::new(move |text: &str| {
            let _ = message_tx.send(text.to_string());
        }));
        let (failure_tx, failures) = channel::unbounded();

        let worker_handle = handle.clone();
        let pump = pump::spawn("tether-test-loop", move || async move {
            let engine = Engine::new(&EngineOptions::default()).expect("engine should start");
            engine.set_current_context();

            let mut event_loop = EventLoop::with_handle(&engine, worker_handle);
            event_loop.on_task_failed(move |fault| {
                let _ = failure_tx.send(fault.to_string());
            });
            configure(&mut event_loop);

            let bridge = HostBridge::new(event_loop.scheduler(), events, Duration::from_millis(1));
            host::install(&engine, bridge, false).expect("host callbacks should install");

            let result = event_loop.run().await;
            drop(event_loop);
            engine.dispose();
            result
        })
        .unwrap();

        Self {
            handle,
            messages,
            failures,
            pump: Some(pump),
        }
    }

    fn run(&self, source: &str) -> TaskResult {
        self.handle
            .push(Job::script(source, None, SourceContext(0)))
            .wait()
    }

    fn message(&self) -> String {
        self.messages
            .recv_timeout(RECV_TIMEOUT)
            .expect("expected a message from the script")
    }

    fn stop(mut self) -> Result<(), Fault> {
        self.handle.stop();
        self.pump.take().map_or(Ok(()), PumpHandle::join)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

fn current_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_microtasks_run_before_macrotasks_in_a_batch() {
    let harness = Harness::start();
    harness.run("var log = [];").unwrap();

    let futures = harness.handle.push_batch(vec![
        Job::script("log.push('macro')", None, SourceContext(1)),
        Job::script("log.push('p1')", None, SourceContext(2)).microtask(),
        Job::script("log.push('p2')", None, SourceContext(3)).microtask(),
        Job::script("log.push('p3')", None, SourceContext(4)).microtask(),
    ]);
    for future in futures {
        future.wait().unwrap();
    }

    assert_eq!(
        harness.run("log.join(',')").unwrap().as_str(),
        Some("p1,p2,p3,macro")
    );
}

#[test]
fn test_timers_fire_in_delay_order() {
    let harness = Harness::start();
    harness
        .run(
            "setTimeout(() => sendToHost('slow'), 100);
             setTimeout(() => sendToHost('fast'), 10);",
        )
        .unwrap();

    assert_eq!(harness.message(), "fast");
    assert_eq!(harness.message(), "slow");
}

#[test]
fn test_promise_reactions_run_before_timers() {
    let harness = Harness::start();
    harness
        .run(
            "setTimeout(() => sendToHost('timer'), 0);
             Promise.resolve()
                 .then(() => sendToHost('p1'))
                 .then(() => sendToHost('p2'));
             Promise.resolve().then(() => sendToHost('p3'));",
        )
        .unwrap();

    let received: Vec<String> = (0..4).map(|_| harness.message()).collect();
    assert_eq!(received, ["p1", "p3", "p2", "timer"]);
}

#[test]
fn test_concurrent_producers() {
    let harness = Harness::start();
    harness
        .run("var total = 0; function bump(n) { total += n; return total; }")
        .unwrap();

    thread::scope(|scope| {
        for _ in 0..4 {
            let handle = harness.handle.clone();
            scope.spawn(move || {
                let futures: Vec<_> = (0..25)
                    .map(|i| handle.push(Job::call("bump", [i])))
                    .collect();
                for future in futures {
                    assert!(future.wait().is_ok());
                }
            });
        }
    });

    assert_eq!(harness.run("total").unwrap(), ScriptValue::Int(4 * 300));
}

// ============================================================================
// Timers and cancellation
// ============================================================================

#[test]
fn test_clear_timeout_prevents_callback() {
    let harness = Harness::start();
    harness
        .run(
            "var id = setTimeout(() => sendToHost('never'), 20);
             clearTimeout(id);
             setTimeout(() => sendToHost('done'), 40);",
        )
        .unwrap();

    assert_eq!(harness.message(), "done");
    assert!(harness
        .messages
        .recv_timeout(Duration::from_millis(50))
        .is_err());
}

#[test]
fn test_interval_cleared_from_its_callback() {
    let harness = Harness::start();
    harness
        .run(
            "var n = 0;
             var id = setInterval(() => {
                 n += 1;
                 sendToHost('tick ' + n);
                 if (n === 3) {
                     clearInterval(id);
                     setTimeout(() => sendToHost('end'), 30);
                 }
             }, 5);",
        )
        .unwrap();

    let received: Vec<String> = (0..4).map(|_| harness.message()).collect();
    assert_eq!(received, ["tick 1", "tick 2", "tick 3", "end"]);
}

#[test]
fn test_zero_interval_job_does_not_starve_the_queue() {
    let harness = Harness::start();
    harness
        .run("var spins = 0; function spin() { spins += 1; }")
        .unwrap();

    let first = harness
        .handle
        .push(Job::call("spin", Vec::<NativeArg>::new()).repeating());
    first.wait().unwrap();

    // Both need a turn of the loop while the job keeps rescheduling itself
    assert_eq!(harness.run("spins > 0").unwrap(), ScriptValue::Bool(true));
    harness
        .run("setTimeout(() => sendToHost('timer ran'), 5)")
        .unwrap();
    assert_eq!(harness.message(), "timer ran");
}

#[test]
fn test_host_cancel_of_script_timer() {
    let harness = Harness::start();
    let id = harness
        .run("setTimeout(() => sendToHost('fired'), 50)")
        .unwrap()
        .as_f64()
        .and_then(TaskId::from_script)
        .expect("setTimeout should return a timer id");

    assert!(harness.handle.cancel(id));
    harness
        .run("setTimeout(() => sendToHost('after'), 100)")
        .unwrap();
    assert_eq!(harness.message(), "after");
}

#[test]
fn test_scheduler_registry() {
    let engine = Engine::new(&EngineOptions::default()).unwrap();
    engine.set_current_context();
    let event_loop = EventLoop::new(&engine);
    let scheduler = event_loop.scheduler();

    let task = Task::script(ScriptRun::new("1", None, SourceContext(0)));
    let id = scheduler.push_cancellable(task).unwrap();
    assert!(scheduler.is_registered(id));
    assert_eq!(event_loop.registered_tasks(), 1);

    assert!(scheduler.cancel(id));
    assert!(!scheduler.is_registered(id));
    assert!(!scheduler.cancel(id));

    engine.clear_current_context();
    let detached = Task::script(ScriptRun::new("1", None, SourceContext(1)));
    assert_eq!(scheduler.push_cancellable(detached), None);

    drop(event_loop);
    assert!(!scheduler.is_alive());
    assert!(!scheduler.push(Task::script(ScriptRun::new("1", None, SourceContext(2)))));
    engine.dispose();
}

// ============================================================================
// Faults and lifecycle
// ============================================================================

#[test]
fn test_script_fault_does_not_stop_loop() {
    let harness = Harness::start();

    let fault = harness.run("throw new Error('boom')").unwrap_err();
    assert_eq!(fault.kind(), FaultKind::Script);
    assert!(fault.to_string().contains("boom"));
    assert!(harness
        .failures
        .recv_timeout(RECV_TIMEOUT)
        .unwrap()
        .contains("boom"));

    let missing = harness
        .handle
        .push(Job::call("doesNotExist", Vec::<i32>::new()))
        .wait()
        .unwrap_err();
    assert_eq!(missing.kind(), FaultKind::Usage);

    assert_eq!(harness.run("1 + 1").unwrap(), ScriptValue::Int(2));
    assert_eq!(harness.handle.status(), LoopStatus::Running);
    assert!(harness.stop().is_ok());
}

#[test]
fn test_stop_before_run_is_noop() {
    let engine = Engine::new(&EngineOptions::default()).unwrap();
    engine.set_current_context();
    let mut event_loop = EventLoop::new(&engine);
    let handle = event_loop.handle();

    let queued = handle.push(Job::script("1", None, SourceContext(0)));
    handle.stop();
    assert_eq!(handle.status(), LoopStatus::Terminated);

    current_thread_runtime().block_on(event_loop.run()).unwrap();
    assert_eq!(event_loop.status(), LoopStatus::Terminated);
    drop(event_loop);

    assert_eq!(
        queued.wait().unwrap_err(),
        Fault::usage(UsageFault::LoopTerminated)
    );
    assert_eq!(
        handle
            .push(Job::script("1", None, SourceContext(1)))
            .wait()
            .unwrap_err(),
        Fault::usage(UsageFault::LoopTerminated)
    );
    engine.dispose();
}

#[test]
fn test_pending_tasks_fail_on_shutdown() {
    let harness = Harness::start();
    let delayed = harness
        .handle
        .push(Job::script("1", None, SourceContext(0)).with_delay(Duration::from_secs(60)));
    // Make sure the delayed job reached the worker
    harness.run("0").unwrap();

    let handle = harness.handle.clone();
    assert!(harness.stop().is_ok());
    assert_eq!(
        delayed.wait().unwrap_err(),
        Fault::usage(UsageFault::LoopTerminated)
    );
    assert!(!handle.cancel(TaskId(1)));
}

#[test]
fn test_panicking_hook_terminates_loop() {
    let (terminated_tx, terminated) = channel::bounded(1);
    let harness = Harness::start_with(move |event_loop| {
        event_loop.on_task_failed(|_| panic!("hook exploded"));
        event_loop.on_terminated(move |fault| {
            let _ = terminated_tx.send(fault.kind());
        });
    });

    assert!(harness.run("throw new Error('first')").is_err());
    assert_eq!(
        terminated.recv_timeout(RECV_TIMEOUT).unwrap(),
        FaultKind::Fatal
    );

    let fault = harness.stop().unwrap_err();
    assert_eq!(fault.kind(), FaultKind::Fatal);
    assert!(fault.to_string().contains("hook exploded"));
}
