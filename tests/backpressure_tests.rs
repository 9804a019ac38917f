//! Integration tests for backpressure and multi-port fan-out/fan-in.
//!
//! These verify that:
//! - `wait_for_buffer` tracks the output fill level against the watermark
//! - callback-type outputs never pretend to support backpressure
//! - `multi_output` aggregates branch statuses correctly
//! - port abort/reset fan out across primary and secondary ports

use cadenza::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CONTROL_TIMEOUT: Duration = Duration::from_millis(2000);

fn idle_element(tag: &str) -> Element {
    let mut config = ElementConfig::new(tag);
    config.process = Some(Box::new(|_el, _buf| IoStatus::Timeout));
    Element::init(config).unwrap()
}

fn idle_element_with_multi(tag: &str, multi_in: usize, multi_out: usize) -> Element {
    let mut config = ElementConfig::new(tag);
    config.multi_in_ports = multi_in;
    config.multi_out_ports = multi_out;
    config.process = Some(Box::new(|_el, _buf| IoStatus::Timeout));
    Element::init(config).unwrap()
}

// ============================================================================
// wait_for_buffer
// ============================================================================

#[test]
fn test_wait_for_buffer_satisfied_immediately() {
    let el = idle_element("wfb");
    let out: Arc<dyn Port> = Arc::new(StreamPort::new("out", 64));
    el.set_output_port(Some(out));

    assert_eq!(el.output(&[0u8; 16]), IoStatus::Bytes(16));
    // Already filled past the expectation: no waiting involved.
    let start = Instant::now();
    el.wait_for_buffer(8, CONTROL_TIMEOUT).unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));

    el.deinit().unwrap();
}

#[test]
fn test_wait_for_buffer_wakes_on_crossing() {
    let el = idle_element("wfb2");
    let out: Arc<dyn Port> = Arc::new(StreamPort::new("out", 256));
    el.set_output_port(Some(out));

    let writer = el.clone();
    let handle = thread::spawn(move || {
        for _ in 0..4 {
            thread::sleep(Duration::from_millis(20));
            assert_eq!(writer.output(&[1u8; 32]), IoStatus::Bytes(32));
        }
    });

    // 4 * 32 = 128 >= 100 must be observed before the timeout.
    el.wait_for_buffer(100, CONTROL_TIMEOUT).unwrap();
    let port = el.output_port().unwrap();
    assert!(port.filled() >= 100);

    handle.join().unwrap();
    el.deinit().unwrap();
}

#[test]
fn test_wait_for_buffer_times_out_below_watermark() {
    let el = idle_element("wfb3");
    let out: Arc<dyn Port> = Arc::new(StreamPort::new("out", 64));
    el.set_output_port(Some(out));

    assert_eq!(el.output(&[0u8; 8]), IoStatus::Bytes(8));
    let start = Instant::now();
    assert!(matches!(
        el.wait_for_buffer(32, Duration::from_millis(80)),
        Err(Error::Timeout)
    ));
    assert!(start.elapsed() >= Duration::from_millis(75));

    el.deinit().unwrap();
}

#[test]
fn test_wait_for_buffer_fails_on_callback_output() {
    let mut config = ElementConfig::new("cbout");
    config.out_type = PortType::Callback;
    config.write = Some(Box::new(|buf| IoStatus::Bytes(buf.len())));
    config.process = Some(Box::new(|_el, _buf| IoStatus::Timeout));
    let el = Element::init(config).unwrap();

    let start = Instant::now();
    assert!(matches!(
        el.wait_for_buffer(1, CONTROL_TIMEOUT),
        Err(Error::NotSupported)
    ));
    // Fails immediately, no waiting.
    assert!(start.elapsed() < Duration::from_millis(50));

    el.deinit().unwrap();
}

#[test]
fn test_block_output_watermark_counts_nodes() {
    let mut config = ElementConfig::new("blockout");
    config.out_type = PortType::Block;
    config.out_block_size = 32;
    config.out_block_num = 8;
    config.process = Some(Box::new(|_el, _buf| IoStatus::Timeout));
    let el = Element::init(config).unwrap();

    let out: Arc<dyn Port> = Arc::new(BlockPort::new("out", 32, 8));
    el.set_output_port(Some(out));

    for _ in 0..3 {
        assert_eq!(el.output(&[0u8; 16]), IoStatus::Bytes(16));
    }
    // Three nodes queued; the expectation is in nodes, not bytes.
    el.wait_for_buffer(3, CONTROL_TIMEOUT).unwrap();
    assert!(matches!(
        el.wait_for_buffer(5, Duration::from_millis(50)),
        Err(Error::Timeout)
    ));

    el.deinit().unwrap();
}

// ============================================================================
// Multi-port fan-out / fan-in
// ============================================================================

#[test]
fn test_multi_output_ok_when_all_branches_ok() {
    let el = idle_element_with_multi("fanout", 0, 3);
    let a: Arc<dyn Port> = Arc::new(StreamPort::new("a", 64));
    let b: Arc<dyn Port> = Arc::new(StreamPort::new("b", 64));
    el.set_multi_output_port(0, Some(a.clone())).unwrap();
    // Slot 1 left empty: skipped silently.
    el.set_multi_output_port(2, Some(b.clone())).unwrap();

    assert_eq!(
        el.multi_output(b"hello", Some(Duration::from_millis(50))),
        IoStatus::Bytes(5)
    );
    assert_eq!(a.filled(), 5);
    assert_eq!(b.filled(), 5);

    el.deinit().unwrap();
}

#[test]
fn test_multi_output_single_failing_branch_fails_aggregate() {
    let el = idle_element_with_multi("fanout2", 0, 2);
    let healthy: Arc<dyn Port> = Arc::new(StreamPort::new("healthy", 64));
    let full: Arc<dyn Port> = Arc::new(StreamPort::new("full", 4));
    el.set_multi_output_port(0, Some(healthy.clone())).unwrap();
    el.set_multi_output_port(1, Some(full.clone())).unwrap();

    // Saturate the second branch.
    assert_eq!(full.write(&[0u8; 4], None), IoStatus::Bytes(4));

    let status = el.multi_output(b"data", Some(Duration::from_millis(30)));
    assert_eq!(status, IoStatus::Timeout);
    // The healthy branch was still written.
    assert_eq!(healthy.filled(), 4);

    el.deinit().unwrap();
}

#[test]
fn test_multi_output_aborted_branch_fails_aggregate() {
    let el = idle_element_with_multi("fanout3", 0, 2);
    let a: Arc<dyn Port> = Arc::new(StreamPort::new("a", 64));
    let b: Arc<dyn Port> = Arc::new(StreamPort::new("b", 64));
    el.set_multi_output_port(0, Some(a)).unwrap();
    el.set_multi_output_port(1, Some(b.clone())).unwrap();

    b.abort();
    assert_eq!(
        el.multi_output(b"data", Some(Duration::from_millis(30))),
        IoStatus::Abort
    );

    el.deinit().unwrap();
}

#[test]
fn test_multi_input_targets_one_index() {
    let el = idle_element_with_multi("fanin", 2, 0);
    let a: Arc<dyn Port> = Arc::new(StreamPort::new("a", 64));
    let b: Arc<dyn Port> = Arc::new(StreamPort::new("b", 64));
    el.set_multi_input_port(0, Some(a.clone())).unwrap();
    el.set_multi_input_port(1, Some(b.clone())).unwrap();

    assert_eq!(a.write(b"first", None), IoStatus::Bytes(5));
    assert_eq!(b.write(b"second", None), IoStatus::Bytes(6));

    let mut buf = [0u8; 16];
    assert_eq!(
        el.multi_input(&mut buf, 1, Some(Duration::from_millis(50))),
        IoStatus::Bytes(6)
    );
    assert_eq!(&buf[..6], b"second");
    // Index 0 untouched.
    assert_eq!(a.filled(), 5);

    el.deinit().unwrap();
}

#[test]
fn test_multi_input_bad_index_fails() {
    let el = idle_element_with_multi("fanin2", 1, 0);
    let mut buf = [0u8; 8];
    assert_eq!(
        el.multi_input(&mut buf, 5, Some(Duration::from_millis(10))),
        IoStatus::Fail
    );
    // A configured but empty slot also fails.
    assert_eq!(
        el.multi_input(&mut buf, 0, Some(Duration::from_millis(10))),
        IoStatus::Fail
    );
    el.deinit().unwrap();
}

#[test]
fn test_set_multi_port_out_of_range() {
    let el = idle_element_with_multi("slots", 1, 1);
    let port: Arc<dyn Port> = Arc::new(StreamPort::new("p", 16));
    assert!(el.set_multi_input_port(0, Some(port.clone())).is_ok());
    assert!(el.set_multi_input_port(1, Some(port.clone())).is_err());
    assert!(el.set_multi_output_port(3, Some(port)).is_err());
    assert_eq!(el.multi_input_count(), 1);
    assert_eq!(el.multi_output_count(), 1);
    el.deinit().unwrap();
}

// ============================================================================
// Fan-out of reset/abort/write_done across port arrays
// ============================================================================

#[test]
fn test_abort_and_reset_fan_out_to_secondary_ports() {
    let el = idle_element_with_multi("fan", 2, 2);
    let primary_in: Arc<dyn Port> = Arc::new(StreamPort::new("pin", 16));
    let extra_in: Arc<dyn Port> = Arc::new(StreamPort::new("xin", 16));
    let primary_out: Arc<dyn Port> = Arc::new(StreamPort::new("pout", 16));
    let extra_out: Arc<dyn Port> = Arc::new(StreamPort::new("xout", 16));
    el.set_input_port(Some(primary_in.clone()));
    el.set_multi_input_port(0, Some(extra_in.clone())).unwrap();
    el.set_output_port(Some(primary_out.clone()));
    el.set_multi_output_port(1, Some(extra_out.clone())).unwrap();

    el.abort_input_port();
    el.abort_output_port();
    let mut buf = [0u8; 4];
    assert_eq!(primary_in.read(&mut buf, None), IoStatus::Abort);
    assert_eq!(extra_in.read(&mut buf, None), IoStatus::Abort);
    assert_eq!(primary_out.write(b"x", None), IoStatus::Abort);
    assert_eq!(extra_out.write(b"x", None), IoStatus::Abort);

    el.reset_input_port();
    el.reset_output_port();
    assert_eq!(primary_out.write(b"x", None), IoStatus::Bytes(1));
    assert_eq!(extra_out.write(b"x", None), IoStatus::Bytes(1));

    el.set_port_done();
    assert_eq!(primary_out.read(&mut buf, None), IoStatus::Bytes(1));
    assert_eq!(primary_out.read(&mut buf, None), IoStatus::Done);
    assert_eq!(extra_out.read(&mut buf, None), IoStatus::Bytes(1));
    assert_eq!(extra_out.read(&mut buf, None), IoStatus::Done);

    el.deinit().unwrap();
}

// ============================================================================
// Abort unblocks a worker stuck in port I/O
// ============================================================================

#[test]
fn test_stop_unblocks_worker_stuck_on_input() {
    let mut config = ElementConfig::new("starved");
    config.open = Some(Box::new(|_el| IoStatus::Ok));
    config.process = Some(Box::new(|el, buf| match el.input(buf) {
        IoStatus::Bytes(n) => el.output(&buf[..n]),
        other => other,
    }));
    let el = Element::init(config).unwrap();
    // An input port that never receives data: the worker will block inside
    // read with an unbounded budget.
    let input: Arc<dyn Port> = Arc::new(StreamPort::new("empty", 64));
    el.set_input_port(Some(input));

    el.run().unwrap();
    el.resume(0.0, CONTROL_TIMEOUT).unwrap();
    thread::sleep(Duration::from_millis(50));

    // stop() aborts the port first, so the blocked read returns ABORT and the
    // worker reaches command processing.
    let start = Instant::now();
    el.stop().unwrap();
    el.wait_for_stop().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(el.state(), State::Stopped);

    el.deinit().unwrap();
}
