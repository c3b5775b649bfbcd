//! Receive-task to worker-thread handoff through the queue primitives.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use procbus::bus::topic::{heads, methods};
use procbus::bus::{BusError, BusMessage};
use procbus::queue::{BoundedMessageQueue, Envelope, FixedSlotRingQueue};

use crate::common::{TestBus, Transport};

const REPORT_KIND: i32 = 7;

/// Drain `queue` on a plain thread until `done` is set and the queue is empty.
fn spawn_envelope_worker(
    queue: Arc<BoundedMessageQueue>,
    done: Arc<AtomicBool>,
) -> thread::JoinHandle<Vec<Envelope>> {
    thread::spawn(move || {
        let mut drained = Vec::new();
        loop {
            match queue.dequeue_head() {
                Some(envelope) => drained.push(envelope),
                None if done.load(Ordering::SeqCst) => break,
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        drained
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bounded_queue_handoff_preserves_order() {
    let bus = TestBus::start(Transport::Ipc).await;
    let queue = Arc::new(BoundedMessageQueue::new(8));
    let done = Arc::new(AtomicBool::new(false));
    let worker = spawn_envelope_worker(Arc::clone(&queue), Arc::clone(&done));

    let delivered = Arc::new(AtomicUsize::new(0));

    let mut sub = bus.subscriber().await;
    {
        let queue = Arc::clone(&queue);
        let delivered = Arc::clone(&delivered);
        let handler = move |msg: &BusMessage| -> procbus::bus::Result<()> {
            let envelope = Envelope::new(REPORT_KIND, msg.payload())
                .map_err(|e| BusError::Handler(e.to_string()))?;
            queue
                .enqueue_tail(&envelope)
                .map_err(|e| BusError::Handler(e.to_string()))?;
            delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        sub.add_topic(heads::HAL, methods::REPORT, handler).unwrap();
    }
    sub.arm_routed().unwrap();
    bus.wait_for_subscribers(1).await;

    let mut publisher = bus.publisher().await;
    for i in 0..100u32 {
        publisher
            .publish(heads::HAL, methods::REPORT, i.to_be_bytes().to_vec())
            .await
            .unwrap();
    }

    // Tail admission is unconditional, so nothing is dropped even though
    // the worker may lag behind max_length.
    for _ in 0..400 {
        if delivered.load(Ordering::SeqCst) >= 100 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    sub.stop().await.unwrap();
    done.store(true, Ordering::SeqCst);

    let drained = worker.join().unwrap();
    assert_eq!(drained.len(), 100);
    for (i, envelope) in drained.iter().enumerate() {
        assert_eq!(envelope.kind, REPORT_KIND);
        assert_eq!(envelope.payload(), (i as u32).to_be_bytes());
        assert_eq!(envelope.sequence, i as u64 + 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ring_queue_handoff_reports_overflow() {
    let bus = TestBus::start(Transport::Ipc).await;
    let ring = Arc::new(FixedSlotRingQueue::new(4, 16).unwrap());
    let rejected = Arc::new(Mutex::new(0usize));

    let mut sub = bus.subscriber().await;
    {
        let ring = Arc::clone(&ring);
        let rejected = Arc::clone(&rejected);
        let handler = move |msg: &BusMessage| -> procbus::bus::Result<()> {
            if let Err(e) = ring.put(msg.payload()) {
                if e.is_capacity() {
                    *rejected.lock().unwrap() += 1;
                }
            }
            Ok(())
        };
        sub.add_topic(heads::MEDIA, methods::STREAM, handler).unwrap();
    }
    sub.arm_routed().unwrap();
    bus.wait_for_subscribers(1).await;

    // Nobody consumes: 4 fit, the rest are rejected with a status. The
    // oversized frame is rejected whole rather than truncated.
    let mut publisher = bus.publisher().await;
    for i in 0..6u8 {
        publisher
            .publish(heads::MEDIA, methods::STREAM, vec![i; 4])
            .await
            .unwrap();
    }
    publisher
        .publish(heads::MEDIA, methods::STREAM, vec![0xff; 32])
        .await
        .unwrap();

    for _ in 0..400 {
        if *rejected.lock().unwrap() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    sub.stop().await.unwrap();

    assert_eq!(*rejected.lock().unwrap(), 3);
    assert_eq!(ring.used_count(), 4);

    let consumer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            let mut got = Vec::new();
            while ring.get() {
                got.push(ring.with_consumed(|bytes| bytes.to_vec()));
            }
            got
        })
    };
    let got = consumer.join().unwrap();
    assert_eq!(got, (0..4u8).map(|i| vec![i; 4]).collect::<Vec<_>>());
    assert_eq!(ring.free_count(), 4);
}
