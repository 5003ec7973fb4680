//! InferRequest state machine tests

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{add_network, iota, single_thread, PoolBlocker, SHAPE, TIMEOUT};
use snippetforge::request::{HostTensor, RemoteTensor, RequestState, StatusCode, Tensor};
use snippetforge::{RuntimeConfig, SnippetForgeError, TensorDesc};

fn filled(base: f32) -> Tensor {
    let data: Vec<f32> = iota(16).iter().map(|v| v + base).collect();
    HostTensor::from_f32(&SHAPE, &data).unwrap().into()
}

#[test]
fn test_infer_adds_inputs() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();
    request.set_tensor("x", filled(0.0)).unwrap();
    request.set_tensor("y", filled(100.0)).unwrap();

    request.infer().unwrap();

    assert_eq!(request.state().unwrap(), RequestState::Completed);
    let z = request.get_tensor("z").unwrap().to_f32_vec().unwrap();
    let expected: Vec<f32> = (0..16).map(|i| 2.0 * i as f32 + 100.0).collect();
    assert_eq!(z, expected);
}

#[test]
fn test_output_tensor_shares_caller_buffer() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();
    let out = HostTensor::zeros(TensorDesc::f32(&SHAPE)).unwrap();
    request
        .set_input([("x", filled(1.0)), ("y", filled(2.0))])
        .unwrap();
    request.set_output([("z", Tensor::from(out.clone()))]).unwrap();

    request.infer().unwrap();

    assert_eq!(out.to_f32_vec().unwrap()[15], 15.0 + 1.0 + 15.0 + 2.0);
}

#[test]
fn test_wait_on_never_started_request() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();

    assert!(!request.wait_for(Duration::ZERO).unwrap());
    assert_eq!(request.state().unwrap(), RequestState::Idle);
    assert!(matches!(
        request.wait(),
        Err(SnippetForgeError::InferNotStarted)
    ));

    request.start_async().unwrap();
    request.wait().unwrap();
    assert!(request.wait_for(Duration::ZERO).unwrap());
}

#[test]
fn test_start_then_cancel_ends_cancelled_with_one_callback() {
    let network = add_network(single_thread());
    let blocker = PoolBlocker::engage(&network);

    let request = network.create_infer_request().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let (code_tx, code_rx) = mpsc::channel();
    let code_tx = Mutex::new(code_tx);
    let counter = Arc::clone(&calls);
    request
        .set_callback(move |_, code| {
            counter.fetch_add(1, Ordering::SeqCst);
            code_tx.lock().unwrap().send(code).ok();
        })
        .unwrap();

    request.start_async().unwrap();
    request.cancel().unwrap();
    blocker.release();

    assert!(matches!(
        request.wait(),
        Err(SnippetForgeError::InferCancelled)
    ));
    assert_eq!(request.state().unwrap(), RequestState::Cancelled);
    assert_eq!(
        code_rx.recv_timeout(TIMEOUT).unwrap(),
        StatusCode::InferCancelled
    );
    assert!(code_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_busy_request_rejects_mutation() {
    let network = add_network(single_thread());
    let blocker = PoolBlocker::engage(&network);

    let request = network.create_infer_request().unwrap();
    request.start_async().unwrap();
    assert_eq!(request.state().unwrap(), RequestState::Busy);

    assert!(matches!(
        request.get_tensor("x"),
        Err(SnippetForgeError::RequestBusy)
    ));
    assert!(matches!(
        request.set_tensor("x", filled(0.0)),
        Err(SnippetForgeError::RequestBusy)
    ));
    assert!(matches!(
        request.set_callback(|_, _| {}),
        Err(SnippetForgeError::RequestBusy)
    ));
    assert!(matches!(
        request.start_async(),
        Err(SnippetForgeError::RequestBusy)
    ));
    assert!(!request.wait_for(Duration::from_millis(10)).unwrap());
    assert!(request.query_state().is_ok());

    blocker.release();
    request.wait().unwrap();
    assert!(request.get_tensor("x").is_ok());
}

#[test]
fn test_cancel_on_completed_request_is_noop() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();
    request.cancel().unwrap();
    request.infer().unwrap();

    request.cancel().unwrap();
    assert_eq!(request.state().unwrap(), RequestState::Completed);
    request.wait().unwrap();

    // A new run starts with a cleared flag.
    request.infer().unwrap();
    assert_eq!(request.state().unwrap(), RequestState::Completed);
}

#[test]
fn test_failure_is_replayed_to_waiters() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();
    let remote = RemoteTensor::new(TensorDesc::f32(&SHAPE), "gpu0", 7);
    request.set_tensor("y", remote.into()).unwrap();

    let (code_tx, code_rx) = mpsc::channel();
    let code_tx = Mutex::new(code_tx);
    request
        .set_callback(move |_, code| {
            code_tx.lock().unwrap().send(code).ok();
        })
        .unwrap();

    let first = request.infer().unwrap_err();
    assert!(matches!(first, SnippetForgeError::ParameterMismatch(_)));
    assert_eq!(request.state().unwrap(), RequestState::Failed);
    assert!(matches!(
        request.wait(),
        Err(SnippetForgeError::ParameterMismatch(_))
    ));
    assert!(matches!(
        request.wait_for(Duration::ZERO),
        Err(SnippetForgeError::ParameterMismatch(_))
    ));
    assert_eq!(
        code_rx.recv_timeout(TIMEOUT).unwrap(),
        StatusCode::ParameterMismatch
    );

    // Rebinding a host tensor recovers the request.
    request.set_tensor("y", filled(0.0)).unwrap();
    request.infer().unwrap();
    assert_eq!(request.state().unwrap(), RequestState::Completed);
}

#[test]
fn test_callback_resolves_request_through_handle() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();
    request.set_tensor("x", filled(1.0)).unwrap();
    request.set_tensor("y", filled(1.0)).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let expected_id = request.id();
    request
        .set_callback(move |handle, code| {
            assert_eq!(handle.id(), expected_id);
            let z = handle
                .request()
                .and_then(|r| r.get_tensor("z"))
                .and_then(|t| t.to_f32_vec());
            tx.lock().unwrap().send((code, z)).ok();
        })
        .unwrap();

    request.start_async().unwrap();
    let (code, z) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(code, StatusCode::Ok);
    assert_eq!(z.unwrap()[0], 2.0);
}

#[test]
fn test_replaced_callback_keeps_previous_run_delivery() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();

    let (old_tx, old_rx) = mpsc::channel();
    let old_tx = Mutex::new(old_tx);
    request
        .set_callback(move |_, code| {
            old_tx.lock().unwrap().send(code).ok();
        })
        .unwrap();
    request.infer().unwrap();

    // The first run may still be delivering; it must go to the old callback.
    let (new_tx, new_rx) = mpsc::channel();
    let new_tx = Mutex::new(new_tx);
    request
        .set_callback(move |_, code| {
            new_tx.lock().unwrap().send(code).ok();
        })
        .unwrap();

    assert_eq!(old_rx.recv_timeout(TIMEOUT).unwrap(), StatusCode::Ok);
    assert!(new_rx.try_recv().is_err());

    request.infer().unwrap();
    assert_eq!(new_rx.recv_timeout(TIMEOUT).unwrap(), StatusCode::Ok);
    assert!(old_rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_callbacks_of_consecutive_runs_do_not_overlap() {
    let network = add_network(RuntimeConfig::default().with_num_threads(2));
    let request = network.create_infer_request().unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let runs = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();
    let done_tx = Mutex::new(done_tx);
    {
        let events = Arc::clone(&events);
        let runs = Arc::clone(&runs);
        request
            .set_callback(move |_, _| {
                let run = runs.fetch_add(1, Ordering::SeqCst);
                events.lock().unwrap().push(("enter", run));
                if run == 0 {
                    std::thread::sleep(Duration::from_millis(50));
                }
                events.lock().unwrap().push(("leave", run));
                done_tx.lock().unwrap().send(()).ok();
            })
            .unwrap();
    }

    // The second run starts while the first callback is still sleeping.
    request.infer().unwrap();
    request.infer().unwrap();
    done_rx.recv_timeout(TIMEOUT).unwrap();
    done_rx.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![("enter", 0), ("leave", 0), ("enter", 1), ("leave", 1)]
    );
}

#[test]
fn test_tensor_binding_errors() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();

    assert!(matches!(
        request.get_tensor("missing"),
        Err(SnippetForgeError::NotFound(_))
    ));
    assert!(matches!(
        request.set_tensor("missing", filled(0.0)),
        Err(SnippetForgeError::NotFound(_))
    ));

    let wrong_shape = HostTensor::zeros(TensorDesc::f32(&[4, 4])).unwrap();
    assert!(matches!(
        request.set_tensor("x", wrong_shape.into()),
        Err(SnippetForgeError::ParameterMismatch(_))
    ));

    let unallocated = HostTensor::unallocated(TensorDesc::f32(&SHAPE));
    request.set_tensor("x", unallocated.into()).unwrap();
    assert!(matches!(
        request.get_tensor("x"),
        Err(SnippetForgeError::NotAllocated(_))
    ));
    assert!(matches!(
        request.infer(),
        Err(SnippetForgeError::NotAllocated(_))
    ));

    assert!(matches!(
        request.set_input([("z", filled(0.0))]),
        Err(SnippetForgeError::NotFound(_))
    ));
}

#[test]
fn test_released_network_invalidates_request() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();
    drop(network);

    assert!(matches!(
        request.start_async(),
        Err(SnippetForgeError::NotAllocated(_))
    ));
    assert!(matches!(
        request.get_tensor("x"),
        Err(SnippetForgeError::NotAllocated(_))
    ));
    assert!(matches!(
        request.cancel(),
        Err(SnippetForgeError::NotAllocated(_))
    ));
}

#[test]
fn test_profiling_info_ordered_by_execution() {
    let network = add_network(RuntimeConfig::default().with_profiling(true));
    let request = network.create_infer_request().unwrap();

    let before = request.get_profiling_info().unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].status.to_string(), "NOT_RUN");

    request.infer().unwrap();
    let info = request.get_profiling_info().unwrap();
    assert_eq!(info[0].node_name, "add0");
    assert_eq!(info[0].node_type, "Subgraph");
    assert_eq!(info[0].exec_type, "reference_add");
    assert_eq!(info[0].status.to_string(), "EXECUTED");
    assert_eq!(info[0].exec_index, 0);
}

#[tokio::test]
async fn test_wait_async_completes() {
    let network = add_network(RuntimeConfig::default());
    let request = network.create_infer_request().unwrap();
    request.set_tensor("x", filled(3.0)).unwrap();
    request.set_tensor("y", filled(4.0)).unwrap();

    assert!(matches!(
        request.wait_async().await,
        Err(SnippetForgeError::InferNotStarted)
    ));

    request.start_async().unwrap();
    tokio::time::timeout(TIMEOUT, request.wait_async())
        .await
        .unwrap()
        .unwrap();
    let z = request.get_tensor("z").unwrap().to_f32_vec().unwrap();
    assert_eq!(z[0], 7.0);
}

#[tokio::test]
async fn test_wait_async_reports_cancellation() {
    let network = add_network(single_thread());
    let blocker = PoolBlocker::engage(&network);
    let request = network.create_infer_request().unwrap();
    request.start_async().unwrap();
    request.cancel().unwrap();

    let waiter = {
        let request = request.clone();
        tokio::spawn(async move { request.wait_async().await })
    };
    blocker.release();

    let outcome = tokio::time::timeout(TIMEOUT, waiter).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(SnippetForgeError::InferCancelled)));
}
