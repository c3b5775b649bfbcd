//! Publish on one endpoint, receive on another, through a real proxy.

use std::sync::Arc;

use bytes::Bytes;
use procbus::bus::topic::{heads, methods};
use procbus::bus::{EndpointState, ReceiveState};

use crate::common::{recorder, settle, wait_for_len, Seen, TestBus, Transport};

async fn button_press_delivered_once(transport: Transport) {
    let bus = TestBus::start(transport).await;
    let button: Seen = Arc::default();

    let mut sub = bus.subscriber().await;
    sub.add_topic(heads::HAL, methods::BUTTON, recorder(&button))
        .unwrap();
    sub.arm_routed().unwrap();
    bus.wait_for_subscribers(1).await;

    let mut publisher = bus.publisher().await;
    publisher
        .publish(heads::HAL, methods::BLE, &b"adv"[..])
        .await
        .unwrap();
    publisher
        .publish(heads::HAL, methods::BUTTON, &b"press"[..])
        .await
        .unwrap();

    wait_for_len(&button, 1).await;
    settle().await;

    // Exactly one delivery, and nothing for hal/ble.
    assert_eq!(
        *button.lock().unwrap(),
        vec![("hal/button".to_string(), Bytes::from("press"))]
    );

    sub.close().await.unwrap();
    publisher.close().await.unwrap();
}

#[tokio::test]
async fn test_button_press_over_ipc() {
    button_press_delivered_once(Transport::Ipc).await;
}

#[tokio::test]
async fn test_button_press_over_tcp() {
    button_press_delivered_once(Transport::Tcp).await;
}

#[tokio::test]
async fn test_every_subscriber_receives_in_publish_order() {
    let bus = TestBus::start(Transport::Ipc).await;
    let first: Seen = Arc::default();
    let second: Seen = Arc::default();

    let mut sub_a = bus.subscriber().await;
    sub_a
        .add_topic(heads::MEDIA, methods::STREAM, recorder(&first))
        .unwrap();
    sub_a.arm_routed().unwrap();

    let mut sub_b = bus.subscriber().await;
    sub_b
        .add_topic(heads::MEDIA, methods::STREAM, recorder(&second))
        .unwrap();
    sub_b.arm_routed().unwrap();
    bus.wait_for_subscribers(2).await;

    let mut publisher = bus.publisher().await;
    for i in 0..20u8 {
        publisher
            .publish(heads::MEDIA, methods::STREAM, vec![i])
            .await
            .unwrap();
    }

    wait_for_len(&first, 20).await;
    wait_for_len(&second, 20).await;
    for seen in [&first, &second] {
        let payloads: Vec<u8> = seen.lock().unwrap().iter().map(|(_, p)| p[0]).collect();
        assert_eq!(payloads, (0..20).collect::<Vec<_>>());
    }

    sub_a.stop().await.unwrap();
    sub_b.stop().await.unwrap();
}

#[tokio::test]
async fn test_registered_topic_publish() {
    let bus = TestBus::start(Transport::Ipc).await;
    let seen: Seen = Arc::default();

    let mut sub = bus.subscriber().await;
    sub.add_topic(heads::KVS, methods::REPORT, recorder(&seen))
        .unwrap();
    sub.arm_routed().unwrap();
    bus.wait_for_subscribers(1).await;

    let mut publisher = bus.publisher().await;
    let index = publisher.add_topic(heads::KVS, methods::REPORT).unwrap();
    publisher
        .publish_registered(index, &b"online"[..])
        .await
        .unwrap();
    assert!(publisher.publish_registered(index + 1, &b"x"[..]).await.is_err());

    wait_for_len(&seen, 1).await;
    assert_eq!(seen.lock().unwrap()[0].0, "kvs/report");
    sub.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_mid_flight_does_not_invoke_handler() {
    let bus = TestBus::start(Transport::Ipc).await;
    let seen: Seen = Arc::default();

    let mut sub = bus.subscriber().await;
    sub.add_topic(heads::LVGL, methods::NOTIFY, recorder(&seen))
        .unwrap();
    sub.arm_routed().unwrap();
    bus.wait_for_subscribers(1).await;
    assert_eq!(sub.receive_state(), ReceiveState::Armed);

    // Nothing published: the pending receive is canceled, not delivered.
    let outcome = sub.stop().await.unwrap();
    assert!(outcome.is_canceled());
    assert_eq!(sub.receive_state(), ReceiveState::Idle);
    assert_eq!(sub.state(), EndpointState::Connected);

    let mut publisher = bus.publisher().await;
    publisher
        .publish(heads::LVGL, methods::NOTIFY, &b"late"[..])
        .await
        .unwrap();
    settle().await;
    assert!(seen.lock().unwrap().is_empty());

    sub.close().await.unwrap();
}

#[tokio::test]
async fn test_publish_before_dial_is_rejected() {
    let bus = TestBus::start(Transport::Ipc).await;
    let mut publisher = procbus::bus::PubEndpoint::from_url(bus.front.clone());
    assert!(publisher.publish("hal", "button", &b"x"[..]).await.is_err());
    publisher.open().unwrap();
    assert!(publisher.publish("hal", "button", &b"x"[..]).await.is_err());
}
