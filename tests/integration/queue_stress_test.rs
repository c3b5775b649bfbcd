//! Randomized operation sequences checked against a plain model, plus
//! multi-threaded producer/consumer runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use rand::Rng;

use procbus::queue::{BoundedMessageQueue, Envelope, FixedSlotRingQueue, ThreadSafeDeque};

#[test]
fn test_deque_matches_model_under_random_ops() {
    let mut rng = rand::rng();
    let deque: ThreadSafeDeque<Vec<u8>> = ThreadSafeDeque::new();
    let mut model: VecDeque<Vec<u8>> = VecDeque::new();

    for _ in 0..5_000 {
        let blob: Vec<u8> = (0..rng.random_range(0..16)).map(|_| rng.random()).collect();
        match rng.random_range(0..4) {
            0 => {
                deque.push_head_copy(&blob).unwrap();
                model.push_front(blob);
            }
            1 => {
                deque.push_tail_copy(&blob).unwrap();
                model.push_back(blob);
            }
            2 => assert_eq!(deque.pop_head(), model.pop_front()),
            _ => assert_eq!(deque.pop_tail(), model.pop_back()),
        }
        assert_eq!(deque.size(), model.len());
        assert_eq!(deque.is_empty(), model.is_empty());
    }
}

#[test]
fn test_bounded_queue_length_tracks_operations() {
    let mut rng = rand::rng();
    let queue = BoundedMessageQueue::new(16);
    let mut expected = 0usize;

    for i in 0..5_000 {
        let envelope = Envelope::new(i, &[i as u8]).unwrap();
        match rng.random_range(0..4) {
            0 => {
                queue.enqueue_tail(&envelope).unwrap();
                expected += 1;
            }
            1 => match queue.enqueue_head_if_not_full(&envelope) {
                Ok(()) => expected += 1,
                Err(e) => {
                    assert!(e.is_capacity());
                    assert!(expected >= queue.max_len());
                }
            },
            2 => {
                if queue.dequeue_head().is_some() {
                    expected -= 1;
                }
            }
            _ => {
                if queue.dequeue_tail().is_some() {
                    expected -= 1;
                }
            }
        }
        assert_eq!(queue.len(), expected);
    }
}

#[test]
fn test_deque_concurrent_producers_and_consumers() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 2_000;

    let deque: Arc<ThreadSafeDeque<Vec<u8>>> = Arc::new(ThreadSafeDeque::new());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let deque = Arc::clone(&deque);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let blob = [p as u8, (i >> 8) as u8, i as u8];
                    if i % 2 == 0 {
                        deque.push_tail_copy(&blob).unwrap();
                    } else {
                        deque.push_head_copy(&blob).unwrap();
                    }
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..2)
        .map(|c| {
            let deque = Arc::clone(&deque);
            thread::spawn(move || {
                let mut popped = 0usize;
                for _ in 0..PER_PRODUCER {
                    let item = if c == 0 {
                        deque.pop_head()
                    } else {
                        deque.pop_tail()
                    };
                    if item.is_some() {
                        popped += 1;
                    }
                }
                popped
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let popped: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();

    assert_eq!(deque.size(), PRODUCERS * PER_PRODUCER - popped);
}

#[test]
fn test_ring_single_producer_single_consumer() {
    const MESSAGES: u32 = 10_000;

    let ring = Arc::new(FixedSlotRingQueue::new(8, 4).unwrap());

    let producer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            let mut rejected = 0u64;
            for i in 0..MESSAGES {
                while ring.put(&i.to_be_bytes()).is_err() {
                    rejected += 1;
                    thread::yield_now();
                }
            }
            rejected
        })
    };

    let mut received = Vec::with_capacity(MESSAGES as usize);
    while received.len() < MESSAGES as usize {
        if ring.get() {
            let value = ring.with_consumed(|bytes| {
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            });
            received.push(value);
        } else {
            thread::yield_now();
        }
    }
    producer.join().unwrap();

    assert_eq!(received, (0..MESSAGES).collect::<Vec<_>>());
    assert_eq!(ring.free_count() + ring.used_count(), ring.num_slots());
    assert_eq!(ring.used_count(), 0);
}
