//! Admission queue behavior under load and caller disconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use harvester::admission::{Admission, AdmissionQueue};
use harvester::CancelSignal;
use tokio::sync::{mpsc, oneshot};

/// A task that blocks until its sender is dropped or triggered.
fn blocker() -> (oneshot::Sender<()>, impl std::future::Future<Output = ()> + Send) {
    let (tx, rx) = oneshot::channel::<()>();
    (tx, async move {
        let _ = rx.await;
    })
}

#[tokio::test]
async fn runs_start_immediately_up_to_the_limit() {
    let queue = AdmissionQueue::new(3);
    let mut holds = Vec::new();
    for _ in 0..3 {
        let (hold, task) = blocker();
        holds.push(hold);
        assert_eq!(queue.submit(CancelSignal::new(), task), Admission::Started);
    }
    assert_eq!(queue.active(), 3);
    assert_eq!(queue.waiting(), 0);
}

#[tokio::test]
async fn overflow_is_queued_with_increasing_positions_and_runs_in_fifo_order() {
    let queue = AdmissionQueue::new(1);
    let (hold, task) = blocker();
    assert_eq!(queue.submit(CancelSignal::new(), task), Admission::Started);

    let (order_tx, mut order_rx) = mpsc::unbounded_channel();
    for i in 0..3u32 {
        let tx = order_tx.clone();
        let admission = queue.submit(CancelSignal::new(), async move {
            let _ = tx.send(i);
        });
        assert_eq!(admission, Admission::Queued(i as usize + 1));
    }
    assert_eq!(queue.waiting(), 3);

    drop(hold);

    assert_eq!(order_rx.recv().await, Some(0));
    assert_eq!(order_rx.recv().await, Some(1));
    assert_eq!(order_rx.recv().await, Some(2));
}

#[tokio::test]
async fn abandoned_queued_run_never_starts_and_does_not_block_others() {
    let queue = AdmissionQueue::new(1);
    let (hold, task) = blocker();
    assert_eq!(queue.submit(CancelSignal::new(), task), Admission::Started);

    let ran = Arc::new(AtomicBool::new(false));
    let ran_probe = ran.clone();
    let abandoned = CancelSignal::new();
    assert_eq!(
        queue.submit(abandoned.clone(), async move {
            ran_probe.store(true, Ordering::SeqCst);
        }),
        Admission::Queued(1)
    );

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    assert_eq!(
        queue.submit(CancelSignal::new(), async move {
            let _ = done_tx.send(());
        }),
        Admission::Queued(2)
    );

    // The first queued caller disconnects before being started.
    abandoned.cancel();
    drop(hold);

    assert_eq!(done_rx.recv().await, Some(()));
    // Give the abandoned task a moment to (wrongly) run if it were going to.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn completion_of_any_kind_frees_the_slot() {
    let queue = AdmissionQueue::new(1);
    queue.submit(CancelSignal::new(), async {});

    // Wait for the slot to free, then confirm a new task starts immediately.
    for _ in 0..100 {
        if queue.active() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(queue.active(), 0);
    assert_eq!(queue.submit(CancelSignal::new(), async {}), Admission::Started);
}
