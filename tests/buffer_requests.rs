use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use trigflow::{
    BoundedQueue, BufferModule, DataRequest, FragmentDispatch, IssueLog, StreamId, SystemKind,
    TimeSlice, TriggerPrimitive, ERROR_DATA_NOT_FOUND, ERROR_INCOMPLETE,
};

type TpSlice = TimeSlice<TriggerPrimitive>;

fn tp(time_start: u64) -> TriggerPrimitive {
    TriggerPrimitive {
        time_start,
        ..TriggerPrimitive::default()
    }
}

fn slice(start: u64, end: u64, times: &[u64]) -> TpSlice {
    TimeSlice::payload(
        StreamId::new(SystemKind::Detector, 0, 2),
        5,
        start,
        end,
        times.iter().copied().map(tp).collect(),
    )
}

fn request(trigger_number: u64, window_begin: u64, window_end: u64) -> DataRequest {
    DataRequest {
        trigger_number,
        run_number: 5,
        sequence_number: trigger_number,
        trigger_timestamp: window_begin,
        component: StreamId::data_selection(0, 5),
        window_begin,
        window_end,
        destination: "readout".into(),
    }
}

struct Fixture {
    module: BufferModule<TriggerPrimitive>,
    slices: Arc<BoundedQueue<TpSlice>>,
    requests: Arc<BoundedQueue<DataRequest>>,
    fragments: Arc<BoundedQueue<FragmentDispatch>>,
}

fn fixture() -> Fixture {
    let slices = BoundedQueue::new(16);
    let requests = BoundedQueue::new(16);
    let fragments = BoundedQueue::new(16);
    let mut module = BufferModule::new(
        "tp-buffer",
        slices.clone(),
        requests.clone(),
        fragments.clone(),
        IssueLog::new(),
    );
    module
        .configure(&json!({"capacity": 1000, "region_id": 0, "element_id": 5}))
        .expect("valid config");
    module.start().expect("configured");
    Fixture {
        module,
        slices,
        requests,
        fragments,
    }
}

fn pop_fragment(fragments: &Arc<BoundedQueue<FragmentDispatch>>) -> FragmentDispatch {
    fragments
        .recv(Duration::from_secs(2))
        .expect("fragment should arrive")
}

#[test]
fn in_window_request_is_answered_immediately() {
    let mut fx = fixture();
    fx.slices
        .send(slice(100, 200, &[100, 150, 199]), Duration::from_millis(100))
        .unwrap();
    fx.requests
        .send(request(1, 120, 199), Duration::from_millis(100))
        .unwrap();

    let dispatch = pop_fragment(&fx.fragments);
    assert_eq!(dispatch.destination, "readout");
    let header = &dispatch.fragment.header;
    assert_eq!(header.trigger_number, 1);
    assert_eq!(header.run_number, 5);
    assert_eq!((header.window_begin, header.window_end), (120, 199));
    assert_eq!(header.error_bits, 0);
    let objects: Vec<TriggerPrimitive> = dispatch.fragment.objects().expect("well-formed payload");
    let starts: Vec<u64> = objects.iter().map(|tp| tp.time_start).collect();
    assert_eq!(starts, vec![150, 199]);

    fx.module.stop();
}

#[test]
fn evicted_window_yields_an_empty_fragment() {
    let mut fx = fixture();
    fx.slices
        .send(slice(100, 200, &[100, 150]), Duration::from_millis(100))
        .unwrap();
    fx.requests
        .send(request(2, 0, 50), Duration::from_millis(100))
        .unwrap();

    let dispatch = pop_fragment(&fx.fragments);
    assert!(dispatch.fragment.has_error_bit(ERROR_DATA_NOT_FOUND));
    assert_eq!(dispatch.fragment.payload_len(), 0);

    fx.module.stop();
}

#[test]
fn late_request_completes_when_its_window_closes() {
    let mut fx = fixture();
    fx.slices
        .send(slice(100, 200, &[100, 150]), Duration::from_millis(100))
        .unwrap();
    fx.requests
        .send(request(3, 300, 400), Duration::from_millis(100))
        .unwrap();
    assert!(
        fx.fragments.recv(Duration::from_millis(300)).is_err(),
        "request window has not arrived: nothing is sent yet"
    );

    // Data within the window arrives, then data past the window closes it.
    fx.slices
        .send(slice(300, 400, &[350]), Duration::from_millis(100))
        .unwrap();
    fx.slices
        .send(slice(400, 500, &[450]), Duration::from_millis(100))
        .unwrap();

    let dispatch = pop_fragment(&fx.fragments);
    assert_eq!(dispatch.fragment.header.trigger_number, 3);
    assert_eq!(dispatch.fragment.header.error_bits, 0);
    let objects: Vec<TriggerPrimitive> = dispatch.fragment.objects().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].time_start, 350);

    fx.module.stop();
}

#[test]
fn late_request_with_no_data_resolves_empty() {
    let mut fx = fixture();
    fx.slices
        .send(slice(100, 200, &[100]), Duration::from_millis(100))
        .unwrap();
    fx.requests
        .send(request(4, 300, 400), Duration::from_millis(100))
        .unwrap();

    // The newest arrival jumps past the window without covering it.
    fx.slices
        .send(slice(500, 600, &[500]), Duration::from_millis(100))
        .unwrap();

    let dispatch = pop_fragment(&fx.fragments);
    assert!(dispatch.fragment.has_error_bit(ERROR_DATA_NOT_FOUND));
    assert_eq!(dispatch.fragment.payload_len(), 0);

    fx.module.stop();
}

#[test]
fn stop_flushes_held_requests_as_incomplete() {
    let mut fx = fixture();
    fx.slices
        .send(slice(100, 200, &[100, 150]), Duration::from_millis(100))
        .unwrap();
    // Partially covered: 150 is in the window, the tail never arrives.
    fx.requests
        .send(request(5, 150, 800), Duration::from_millis(100))
        .unwrap();
    // Never covered at all.
    fx.requests
        .send(request(6, 900, 950), Duration::from_millis(100))
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));

    fx.module.stop();

    let first = pop_fragment(&fx.fragments);
    let second = pop_fragment(&fx.fragments);
    let by_trigger = |n: u64| {
        [&first, &second]
            .into_iter()
            .find(|dispatch| dispatch.fragment.header.trigger_number == n)
            .expect("fragment for trigger")
            .clone()
    };

    let partial = by_trigger(5);
    assert!(partial.fragment.has_error_bit(ERROR_INCOMPLETE));
    let objects: Vec<TriggerPrimitive> = partial.fragment.objects().unwrap();
    assert_eq!(objects.len(), 1);

    let empty = by_trigger(6);
    assert!(empty.fragment.has_error_bit(ERROR_DATA_NOT_FOUND));
    assert_eq!(empty.fragment.payload_len(), 0);

    let info = fx.module.info();
    assert_eq!(info.requests_received, 2);
    assert_eq!(info.requests_on_hold, 2);
    assert_eq!(info.fragments_sent, 2);
}
