//! Host callbacks installed into the script global object.
//!
//! - `setTimeout(fn, [delayMs, ...args])` / `setInterval(fn, delayMs, [...args])`
//! - `clearTimeout(id)` / `clearInterval(id)`
//! - `sendToHost(message)`
//! - `console.{log,info,warn,error,debug}` (optional)
//!
//! Timers become cancellable tasks on the event loop. The callbacks reach the
//! loop through a [`Scheduler`], which only holds a weak reference, so a
//! callback that outlives its loop logs and does nothing.

use crate::event_loop::Scheduler;
use crate::task::{FunctionCall, Task, TaskId};
use parking_lot::RwLock;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tether_engine::rquickjs::convert::Coerced;
use tether_engine::rquickjs::function::{Func, Opt, Rest};
use tether_engine::rquickjs::{self, Ctx, Object, Value};
use tether_engine::{Engine, EngineResult, Fault, FunctionRef, ValueRef};

/// Handler for messages and failure reports.
pub type EventHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Subscribers to executor events. Handlers run on the worker thread.
#[derive(Default)]
pub struct HostEvents {
    message: RwLock<Vec<EventHandler>>,
    failure: RwLock<Vec<EventHandler>>,
}

impl HostEvents {
    pub fn on_message(&self, handler: EventHandler) {
        self.message.write().push(handler);
    }

    pub fn on_execution_failed(&self, handler: EventHandler) {
        self.failure.write().push(handler);
    }

    pub fn emit_message(&self, message: &str) {
        emit(&self.message, message);
    }

    pub fn emit_failure(&self, description: &str) {
        emit(&self.failure, description);
    }
}

fn emit(handlers: &RwLock<Vec<EventHandler>>, text: &str) {
    // Snapshot so a handler may subscribe further handlers
    let handlers: Vec<EventHandler> = handlers.read().clone();
    for handler in handlers {
        handler(text);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Timeout,
    Interval,
}

impl TimerKind {
    fn name(self) -> &'static str {
        match self {
            TimerKind::Timeout => "setTimeout",
            TimerKind::Interval => "setInterval",
        }
    }
}

/// What the installed callbacks close over.
pub(crate) struct HostBridge {
    scheduler: Scheduler,
    events: Arc<HostEvents>,
    min_interval: Duration,
}

impl HostBridge {
    pub fn new(scheduler: Scheduler, events: Arc<HostEvents>, min_interval: Duration) -> Self {
        Self {
            scheduler,
            events,
            min_interval,
        }
    }

    fn schedule<'js>(
        &self,
        ctx: &Ctx<'js>,
        kind: TimerKind,
        callback: Value<'js>,
        delay: Option<Value<'js>>,
        args: Vec<Value<'js>>,
    ) -> Option<i32> {
        let Some(function) = callback.into_function() else {
            tracing::error!(timer = kind.name(), "callback is not a function");
            return None;
        };
        let requested = match delay.filter(|value| !value.is_undefined()) {
            Some(value) => match value.as_number() {
                Some(ms) => ms,
                None => {
                    tracing::error!(timer = kind.name(), "delay is not a number");
                    return None;
                }
            },
            None if kind == TimerKind::Interval => {
                tracing::error!(timer = kind.name(), "missing delay");
                return None;
            }
            None => 0.0,
        };
        let floor = match kind {
            TimerKind::Timeout => Duration::ZERO,
            TimerKind::Interval => self.min_interval,
        };

        let args = args
            .into_iter()
            .map(|arg| ValueRef::value(ctx, arg))
            .collect();
        let mut task = Task::call(FunctionCall::bound(FunctionRef::function(ctx, function), args))
            .with_delay(clamp_delay(requested, floor));
        if kind == TimerKind::Interval {
            task = task.repeating();
        }

        match self.scheduler.push_cancellable(task) {
            Some(id) => i32::try_from(id.as_u32()).ok(),
            None => {
                tracing::warn!(timer = kind.name(), "no running event loop, timer dropped");
                None
            }
        }
    }

    fn clear(&self, id: Option<Value<'_>>) {
        match id.and_then(|value| value.as_number()).and_then(TaskId::from_script) {
            Some(id) => {
                self.scheduler.cancel(id);
            }
            None => tracing::debug!("clear called without a valid timer id"),
        }
    }

    fn send_to_host(&self, args: Vec<Value<'_>>) {
        if args.len() != 1 {
            tracing::error!(count = args.len(), "sendToHost expects exactly one argument");
            return;
        }
        match args[0].as_string().map(|message| message.to_string()) {
            Some(Ok(message)) => self.events.emit_message(&message),
            _ => tracing::error!("sendToHost expects a string argument"),
        }
    }
}

/// Milliseconds from script to a delay no shorter than `floor`.
fn clamp_delay(ms: f64, floor: Duration) -> Duration {
    let ms = if ms.is_finite() && ms > 0.0 {
        ms.min(f64::from(i32::MAX))
    } else {
        0.0
    };
    Duration::from_secs_f64(ms / 1000.0).max(floor)
}

/// Install the host callbacks into `engine`'s global object.
pub(crate) fn install(engine: &Engine, bridge: HostBridge, console: bool) -> EngineResult<()> {
    let bridge = Rc::new(bridge);
    engine.with(|ctx| {
        install_timers(&ctx, &bridge).map_err(|e| Fault::from_js(&ctx, e))?;
        install_messaging(&ctx, &bridge).map_err(|e| Fault::from_js(&ctx, e))?;
        if console {
            install_console(&ctx).map_err(|e| Fault::from_js(&ctx, e))?;
        }
        Ok(())
    })
}

fn install_timers<'js>(ctx: &Ctx<'js>, bridge: &Rc<HostBridge>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    for kind in [TimerKind::Timeout, TimerKind::Interval] {
        let bridge = Rc::clone(bridge);
        globals.set(
            kind.name(),
            Func::from(
                move |ctx: Ctx<'js>, callback: Value<'js>, delay: Opt<Value<'js>>, args: Rest<Value<'js>>| {
                    bridge.schedule(&ctx, kind, callback, delay.0, args.0)
                },
            ),
        )?;
    }

    for name in ["clearTimeout", "clearInterval"] {
        let bridge = Rc::clone(bridge);
        globals.set(name, Func::from(move |id: Opt<Value<'js>>| bridge.clear(id.0)))?;
    }
    Ok(())
}

fn install_messaging<'js>(ctx: &Ctx<'js>, bridge: &Rc<HostBridge>) -> rquickjs::Result<()> {
    let bridge = Rc::clone(bridge);
    ctx.globals().set(
        "sendToHost",
        Func::from(move |args: Rest<Value<'js>>| bridge.send_to_host(args.0)),
    )
}

fn install_console<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    console.set(
        "log",
        Func::from(|args: Rest<Coerced<String>>| {
            tracing::info!(target: "tether::console", "{}", join(args))
        }),
    )?;
    console.set(
        "info",
        Func::from(|args: Rest<Coerced<String>>| {
            tracing::info!(target: "tether::console", "{}", join(args))
        }),
    )?;
    console.set(
        "warn",
        Func::from(|args: Rest<Coerced<String>>| {
            tracing::warn!(target: "tether::console", "{}", join(args))
        }),
    )?;
    console.set(
        "error",
        Func::from(|args: Rest<Coerced<String>>| {
            tracing::error!(target: "tether::console", "{}", join(args))
        }),
    )?;
    console.set(
        "debug",
        Func::from(|args: Rest<Coerced<String>>| {
            tracing::debug!(target: "tether::console", "{}", join(args))
        }),
    )?;
    ctx.globals().set("console", console)
}

fn join(args: Rest<Coerced<String>>) -> String {
    args.0
        .into_iter()
        .map(|arg| arg.0)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_clamp_delay() {
        assert_eq!(clamp_delay(25.0, Duration::ZERO), Duration::from_millis(25));
        assert_eq!(clamp_delay(-5.0, Duration::ZERO), Duration::ZERO);
        assert_eq!(clamp_delay(f64::NAN, Duration::ZERO), Duration::ZERO);
        assert_eq!(
            clamp_delay(1.0, Duration::from_millis(10)),
            Duration::from_millis(10)
        );
        assert_eq!(
            clamp_delay(f64::INFINITY, Duration::from_millis(10)),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_host_events_fan_out() {
        let events = HostEvents::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let count = Arc::clone(&count);
            events.on_message(Arc::new(move |text: &str| {
                assert_eq!(text, "ping");
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        events.emit_message("ping");
        events.emit_failure("ignored by message handlers");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
