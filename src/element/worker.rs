//! The element worker task: command handling, process quanta, lifecycle.
//!
//! One iteration of the loop is: wait for the next command with the current
//! wait mode, apply it, then attempt exactly one `process` quantum. A command
//! is therefore always fully processed before the next quantum, giving
//! at-most-one-quantum latency for PAUSE/STOP/DESTROY even if the data path
//! was about to block.

use crate::element::{Command, Element, State, WaitMode};
use crate::error::{Error, Result};
use crate::event::Status;
use crate::io::IoStatus;
use std::sync::atomic::Ordering;

/// What one command-wait cycle decided.
enum CommandOutcome {
    /// Nothing to do, or a command applied cleanly.
    Clean,
    /// A command failed (re-open during RESUME); the loop stays alive so
    /// `deinit` remains safe, but waiters are released via STOPPED.
    Failed,
    /// DESTROY: leave the loop.
    Destroy,
}

/// Entry point of the worker thread.
pub(crate) fn worker_main(el: Element) {
    let inner = &el.inner;
    let tag = el.tag();

    inner.state.store(State::Init);
    el.set_task_run(true);
    inner.signals.task_created.set();
    inner.commands.set_wait_mode(WaitMode::Block);
    let mut buf = vec![0u8; inner.buffer_len];
    inner.signals.stopped.clear();
    tracing::debug!("element '{}' worker entering loop", tag);

    while el.task_run() {
        match command_cycle(&el) {
            CommandOutcome::Clean => {}
            CommandOutcome::Failed => {
                inner.signals.stopped.set();
            }
            CommandOutcome::Destroy => {
                inner.signals.stopped.set();
                break;
            }
        }
        process_quantum(&el, &mut buf);
    }

    if inner.is_open.load(Ordering::Acquire) {
        close_element(&el);
        inner.state.store(State::Stopped);
    }
    inner.is_open.store(false, Ordering::Release);
    drop(buf);
    el.clear_stopping();
    el.set_task_run(false);
    tracing::debug!("element '{}' worker exited", tag);
    inner.signals.stopped.set();
    inner.signals.resumed.set();
    inner.signals.task_destroyed.set();
}

/// Wait for and apply at most one command.
fn command_cycle(el: &Element) -> CommandOutcome {
    let Some(cmd) = el.inner.commands.next() else {
        return CommandOutcome::Clean;
    };
    tracing::trace!("element '{}' command {:?}, state {:?}", el.tag(), cmd, el.state());
    match cmd {
        Command::Finish => {
            on_cmd_finish(el);
            CommandOutcome::Clean
        }
        Command::Stop => {
            on_cmd_stop(el);
            CommandOutcome::Clean
        }
        Command::Pause => {
            on_cmd_pause(el);
            CommandOutcome::Clean
        }
        Command::Resume => {
            if on_cmd_resume(el).is_err() {
                CommandOutcome::Failed
            } else {
                CommandOutcome::Clean
            }
        }
        Command::Destroy => {
            el.set_running(false);
            CommandOutcome::Destroy
        }
    }
}

/// Attempt one `process` quantum and classify its outcome.
fn process_quantum(el: &Element, buf: &mut [u8]) {
    let inner = &el.inner;
    if inner.state.load() < State::Running || !el.is_running() {
        return;
    }
    let status = {
        let mut callbacks = inner.callbacks.lock().unwrap();
        match callbacks.process.as_mut() {
            Some(process) => process(el, buf),
            None => return,
        }
    };
    match status {
        IoStatus::Bytes(_) => {}
        IoStatus::Abort => {
            tracing::debug!("element '{}' process aborted", el.tag());
            on_cmd_stop(el);
        }
        IoStatus::Ok | IoStatus::Done => {
            // A reset_state() from inside process requests a re-open instead
            // of a finish.
            if inner.state.load() == State::Init {
                let _ = on_cmd_resume(el);
            } else {
                el.set_port_done();
                on_cmd_finish(el);
            }
        }
        IoStatus::Fail => {
            tracing::error!("element '{}' process failed", el.tag());
            el.report_status(Status::ErrorProcess);
            on_cmd_error(el);
        }
        IoStatus::Timeout => {
            tracing::trace!("element '{}' process timeout", el.tag());
        }
        IoStatus::ProcessFail => {
            tracing::error!("element '{}' process logic failed", el.tag());
            el.report_status(Status::ErrorProcess);
            on_cmd_error(el);
        }
    }
}

/// Run the `open` callback and enter RUNNING.
///
/// Elements without an `open` callback start directly: marked open, STARTED
/// signalled, state forced to RUNNING.
fn process_init(el: &Element) -> Result<()> {
    let inner = &el.inner;
    inner.is_open.store(true, Ordering::Release);
    let status = {
        let mut callbacks = inner.callbacks.lock().unwrap();
        match callbacks.open.as_mut() {
            None => None,
            Some(open) => {
                inner.state.store(State::Initializing);
                Some(open(el))
            }
        }
    };
    let Some(status) = status else {
        inner.state.store(State::Running);
        el.report_status(Status::StateRunning);
        inner.signals.started.set();
        return Ok(());
    };
    match status {
        IoStatus::Ok | IoStatus::Bytes(_) => {
            tracing::debug!("element '{}' opened", el.tag());
            inner.state.store(State::Running);
            el.report_status(Status::StateRunning);
            inner.signals.started.set();
            Ok(())
        }
        IoStatus::Done => {
            tracing::debug!("element '{}' opened, stream already done", el.tag());
            inner.state.store(State::Running);
            el.report_status(Status::StateRunning);
            Ok(())
        }
        IoStatus::Abort => {
            tracing::warn!("element '{}' open aborted", el.tag());
            on_cmd_stop(el);
            Err(Error::Element {
                element: el.tag(),
                reason: "open aborted".into(),
            })
        }
        IoStatus::Timeout | IoStatus::Fail | IoStatus::ProcessFail => {
            tracing::error!("element '{}' open failed: {:?}", el.tag(), status);
            inner.state.store(State::Error);
            el.report_status(Status::ErrorOpen);
            on_cmd_error(el);
            Err(Error::Element {
                element: el.tag(),
                reason: format!("open failed: {:?}", status),
            })
        }
    }
}

/// Run the `close` callback if the element is open.
///
/// Close failures are reported but never block shutdown.
fn close_element(el: &Element) {
    let inner = &el.inner;
    if !inner.is_open.load(Ordering::Acquire) {
        return;
    }
    let result = {
        let mut callbacks = inner.callbacks.lock().unwrap();
        callbacks.close.as_mut().map(|close| close(el))
    };
    if let Some(Err(e)) = result {
        tracing::warn!("element '{}' close failed: {}", el.tag(), e);
        el.report_status(Status::ErrorClose);
    } else {
        tracing::debug!("element '{}' closed", el.tag());
    }
    inner.is_open.store(false, Ordering::Release);
}

fn on_cmd_pause(el: &Element) {
    let inner = &el.inner;
    inner.state.store(State::Paused);
    close_element(el);
    inner.commands.set_wait_mode(WaitMode::Block);
    el.report_status(Status::StatePaused);
    el.set_running(false);
    tracing::debug!("element '{}' paused", el.tag());
    inner.signals.paused.set();
}

fn on_cmd_stop(el: &Element) {
    let inner = &el.inner;
    let state = inner.state.load();
    if state != State::Finished && state != State::Stopped {
        close_element(el);
        inner.state.store(State::Stopped);
        inner.commands.set_wait_mode(WaitMode::Block);
        el.report_status(Status::StateStopped);
        el.set_running(false);
        el.clear_stopping();
        tracing::debug!("element '{}' stopped", el.tag());
        inner.signals.stopped.set();
    } else {
        // Already at a resting state; still force STOPPED for an element that
        // was logically running, so a pending stop() observes the transition.
        if !el.is_running() && state == State::Stopped {
            el.clear_stopping();
            return;
        }
        inner.state.store(State::Stopped);
        el.set_running(false);
        el.clear_stopping();
        el.report_status(Status::StateStopped);
        inner.signals.stopped.set();
    }
}

fn on_cmd_finish(el: &Element) {
    let inner = &el.inner;
    let state = inner.state.load();
    if matches!(state, State::Error | State::Stopped | State::Finished) {
        tracing::debug!("element '{}' finish ignored in state {:?}", el.tag(), state);
        return;
    }
    close_element(el);
    inner.state.store(State::Finished);
    inner.commands.set_wait_mode(WaitMode::Block);
    el.report_status(Status::StateFinished);
    el.set_running(false);
    tracing::debug!("element '{}' finished", el.tag());
    inner.signals.stopped.set();
}

fn on_cmd_error(el: &Element) {
    let inner = &el.inner;
    if inner.state.load() != State::Stopped {
        close_element(el);
        inner.state.store(State::Error);
        inner.commands.set_wait_mode(WaitMode::Block);
        el.set_running(false);
        inner.signals.stopped.set();
    }
}

fn on_cmd_resume(el: &Element) -> Result<()> {
    let inner = &el.inner;
    if inner.state.load() == State::Running {
        el.set_running(true);
        inner.signals.resumed.set();
        return Ok(());
    }
    // Coming back from STOPPED/FINISHED/ERROR: stale buffered output is
    // discarded. Input ports are deliberately left untouched so
    // buffered-but-unconsumed input survives the restart.
    if !matches!(inner.state.load(), State::Init | State::Paused) {
        el.reset_output_port();
    }
    el.set_running(true);
    inner.signals.resumed.set();
    if let Err(e) = process_init(el) {
        el.abort_output_port();
        el.abort_input_port();
        el.set_running(false);
        return Err(e);
    }
    inner.commands.set_wait_mode(WaitMode::Poll);
    inner.signals.stopped.clear();
    Ok(())
}

/// Best-effort SCHED_FIFO priority and CPU pinning for the worker thread.
///
/// Elevation needs CAP_SYS_NICE; failures are logged and ignored.
pub(crate) fn apply_rt_scheduling(el: &Element, priority: Option<i32>, core: Option<usize>) {
    #[cfg(target_os = "linux")]
    {
        if let Some(priority) = priority {
            let param = libc::sched_param {
                sched_priority: priority,
            };
            let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
            if rc != 0 {
                tracing::warn!(
                    "element '{}' SCHED_FIFO priority {} not applied (needs CAP_SYS_NICE)",
                    el.tag(),
                    priority
                );
            }
        }
        if let Some(core) = core {
            unsafe {
                let mut set: libc::cpu_set_t = std::mem::zeroed();
                libc::CPU_ZERO(&mut set);
                libc::CPU_SET(core, &mut set);
                let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
                if rc != 0 {
                    tracing::warn!("element '{}' core pin to {} failed", el.tag(), core);
                }
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        if priority.is_some() || core.is_some() {
            tracing::debug!(
                "element '{}' RT scheduling not supported on this platform",
                el.tag()
            );
        }
    }
}
