//! Memory backend: the full adapter contract, including visibility-based
//! redelivery, delivery counts, and idempotent settles.

use crawlq::model::{Request, SourceSpec};
use crawlq::queue::memory::MemoryQueue;
use crawlq::queue::{Priority, Queue};
use std::sync::Arc;
use std::time::Duration;

fn request(name: &str) -> Request {
    Request::new(
        "fetch",
        SourceSpec::new("npm", "npmjs", name).revision("1.0.0"),
    )
}

// ---------------------------------------------------------------------------
// Ordering and channels
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fifo_within_a_channel() {
    let queue = MemoryQueue::new(Duration::from_secs(30));
    queue
        .push(&request("first"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    queue
        .push(&request("second"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();

    let a = queue.pop(Priority::Normal).await.unwrap().unwrap();
    let b = queue.pop(Priority::Normal).await.unwrap().unwrap();
    assert_eq!(a.request.spec.name, "first");
    assert_eq!(b.request.spec.name, "second");
    assert!(queue.pop(Priority::Normal).await.unwrap().is_none());
}

#[tokio::test]
async fn channels_are_independent() {
    let queue = MemoryQueue::new(Duration::from_secs(30));
    queue
        .push(&request("urgent"), Priority::Immediate, Duration::ZERO)
        .await
        .unwrap();

    assert!(queue.pop(Priority::Soon).await.unwrap().is_none());
    let entry = queue.pop(Priority::Immediate).await.unwrap().unwrap();
    assert_eq!(entry.priority, Priority::Immediate);
    assert_eq!(entry.request.spec.name, "urgent");
}

#[tokio::test]
async fn payload_round_trips_intact() {
    let queue = MemoryQueue::new(Duration::from_secs(30));
    let mut pushed = request("lodash");
    pushed.add_meta("fileCount", serde_json::json!(7));
    queue
        .push(&pushed, Priority::Later, Duration::ZERO)
        .await
        .unwrap();

    let entry = queue.pop(Priority::Later).await.unwrap().unwrap();
    assert_eq!(entry.request.id, pushed.id);
    assert_eq!(entry.request.request_type, "fetch");
    assert_eq!(entry.request.meta["fileCount"], serde_json::json!(7));
}

#[test]
fn priority_names_parse_both_ways() {
    for priority in Priority::ALL {
        let parsed: Priority = priority.channel().parse().unwrap();
        assert_eq!(parsed, priority);
    }
    assert!("urgent".parse::<Priority>().is_err());
    assert_eq!(Priority::Soon.queue_name(), "crawl_soon");
}

// ---------------------------------------------------------------------------
// Visibility and redelivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn popped_message_is_locked_until_visibility_expires() {
    let queue = MemoryQueue::new(Duration::from_millis(100));
    let pushed = request("lodash");
    queue
        .push(&pushed, Priority::Normal, Duration::ZERO)
        .await
        .unwrap();

    let first = queue.pop(Priority::Normal).await.unwrap().unwrap();
    assert_eq!(first.delivery.delivery_count, 1);
    assert!(queue.pop(Priority::Normal).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = queue.pop(Priority::Normal).await.unwrap().unwrap();
    assert_eq!(second.request.id, pushed.id);
    assert_eq!(second.delivery.delivery_count, 2);
}

#[tokio::test]
async fn delivery_count_keeps_counting_across_requeues() {
    let queue = MemoryQueue::new(Duration::from_secs(30));
    queue
        .push(&request("flaky"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();

    for expected in 1..=3 {
        let entry = queue.pop(Priority::Normal).await.unwrap().unwrap();
        assert_eq!(entry.delivery.delivery_count, expected);
        queue.requeue(&entry, Duration::ZERO).await.unwrap();
    }
}

#[tokio::test]
async fn push_delay_holds_the_message_invisible() {
    let queue = MemoryQueue::new(Duration::from_secs(30));
    queue
        .push(&request("later"), Priority::Normal, Duration::from_millis(100))
        .await
        .unwrap();

    assert!(queue.pop(Priority::Normal).await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(queue.pop(Priority::Normal).await.unwrap().is_some());
}

#[tokio::test]
async fn requeue_delay_holds_the_message_invisible() {
    let queue = MemoryQueue::new(Duration::from_secs(30));
    queue
        .push(&request("flaky"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();

    let entry = queue.pop(Priority::Normal).await.unwrap().unwrap();
    queue
        .requeue(&entry, Duration::from_millis(100))
        .await
        .unwrap();

    assert!(queue.pop(Priority::Normal).await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(200)).await;
    let back = queue.pop(Priority::Normal).await.unwrap().unwrap();
    assert_eq!(back.delivery.delivery_count, 2);
}

#[tokio::test]
async fn renew_extends_the_lock() {
    let queue = MemoryQueue::new(Duration::from_millis(150));
    queue
        .push(&request("slow"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();

    let entry = queue.pop(Priority::Normal).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    queue
        .renew(&entry, Duration::from_millis(500))
        .await
        .unwrap();

    // Past the original deadline but inside the renewed window.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(queue.pop(Priority::Normal).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(queue.pop(Priority::Normal).await.unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Settles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ack_settles_for_good() {
    let queue = MemoryQueue::new(Duration::from_millis(80));
    queue
        .push(&request("done"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();

    let entry = queue.pop(Priority::Normal).await.unwrap().unwrap();
    queue.ack(&entry).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(queue.pop(Priority::Normal).await.unwrap().is_none());
}

#[tokio::test]
async fn settles_are_idempotent() {
    let queue = MemoryQueue::new(Duration::from_secs(30));
    queue
        .push(&request("done"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();

    let entry = queue.pop(Priority::Normal).await.unwrap().unwrap();
    queue.ack(&entry).await.unwrap();
    queue.ack(&entry).await.unwrap();
    queue.requeue(&entry, Duration::ZERO).await.unwrap();
    queue.deadletter(&entry).await.unwrap();
    queue.renew(&entry, Duration::from_secs(1)).await.unwrap();

    assert!(queue.pop(Priority::Normal).await.unwrap().is_none());
}

#[tokio::test]
async fn deadletter_removes_from_live_delivery() {
    let queue = MemoryQueue::new(Duration::from_millis(80));
    queue
        .push(&request("poison"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();

    let entry = queue.pop(Priority::Normal).await.unwrap().unwrap();
    queue.deadletter(&entry).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(queue.pop(Priority::Normal).await.unwrap().is_none());
    assert_eq!(queue.depth(Priority::Normal).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Depth and arrival signaling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn depth_counts_waiting_not_inflight() {
    let queue = MemoryQueue::new(Duration::from_secs(30));
    queue
        .push(&request("a"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    queue
        .push(&request("b"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(queue.depth(Priority::Normal).await.unwrap(), 2);

    let _entry = queue.pop(Priority::Normal).await.unwrap().unwrap();
    assert_eq!(queue.depth(Priority::Normal).await.unwrap(), 1);
}

#[tokio::test]
async fn push_wakes_waiters() {
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));

    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            queue.wait_for_work(Duration::from_secs(30)).await;
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    queue
        .push(&request("wake"), Priority::Normal, Duration::ZERO)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should wake on push")
        .unwrap();
}
