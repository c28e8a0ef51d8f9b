use bytes::Bytes;
use peerlink::capability::ExecutionContext;
use peerlink::peer::backend::Frame;
use peerlink::peer::types::IceCandidate;
use peerlink::{DataMessage, PeerError, PeerEvent, PeerSession, SessionOptions, SignalPayload};
use serde::{Deserialize, Serialize};

mod common;
use common::{connected_pair, drain, errors, settle, wait_for, FakePlatform};

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Chat {
    from: String,
    text: String,
}

fn data(events: &[PeerEvent]) -> Vec<DataMessage> {
    events
        .iter()
        .filter_map(|e| match e {
            PeerEvent::Data(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn send_before_open_is_silent() {
    let platform = FakePlatform::new();
    let (a, mut events) =
        PeerSession::create(SessionOptions::initiator(), &platform, &ExecutionContext::native())
            .await
            .unwrap();

    a.send("too early").await;
    a.send_json(&Chat {
        from: "a".into(),
        text: "hi".into(),
    })
    .await;
    settle().await;

    assert!(errors(&drain(&mut events)).is_empty());
    assert!(platform.backend(0).channel(0).sent().is_empty());
}

#[tokio::test]
async fn responder_without_channel_drops_sends() {
    let platform = FakePlatform::new();
    let (b, mut events) =
        PeerSession::create(SessionOptions::responder(), &platform, &ExecutionContext::native())
            .await
            .unwrap();

    b.send(Bytes::from_static(b"\x00\x01")).await;
    settle().await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn messages_cross_in_both_directions() {
    let platform = FakePlatform::new();
    let mut pair = connected_pair(&platform, SessionOptions::initiator(), SessionOptions::responder()).await;
    assert!(platform.backend(1).channel(0).is_incoming());

    pair.a
        .send_json(&Chat {
            from: "a".into(),
            text: "hello".into(),
        })
        .await;
    pair.b.send("plain text").await;
    pair.b.send(vec![1u8, 2, 3]).await;

    let b_seen = wait_for(&mut pair.b_events, "data").await;
    let chat: Chat = data(&b_seen)[0].parse().unwrap();
    assert_eq!(chat.text, "hello");

    let mut a_seen = wait_for(&mut pair.a_events, "data").await;
    a_seen.extend(wait_for(&mut pair.a_events, "data").await);
    let received = data(&a_seen);
    assert_eq!(received[0], DataMessage::Text("plain text".into()));
    assert_eq!(received[1], DataMessage::Binary(Bytes::from_static(&[1, 2, 3])));
    assert_eq!(platform.backend(0).channel(0).sent().len(), 1);
}

#[tokio::test]
async fn frames_right_after_incoming_channel_are_kept() {
    let platform = FakePlatform::new();
    let (b, mut events) =
        PeerSession::create(SessionOptions::responder(), &platform, &ExecutionContext::native())
            .await
            .unwrap();

    b.signal(SignalPayload::Offer {
        sdp: "v=0\r\no=offer 7 1\r\nm=application\r\na=channel:700\r\n".into(),
    })
    .await;
    b.signal(SignalPayload::Candidate {
        candidate: IceCandidate::new("candidate:7 1 udp 2122260223 10.0.0.7 50007 typ host", None, Some(0)),
    })
    .await;

    // канал только что появился, сессия его ещё не разобрала
    let channel = platform.backend(0).channel(0);
    channel.deliver(Frame::Text(r#"{"type":"text","body":"first"}"#.into()));

    let seen = wait_for(&mut events, "data").await;
    assert_eq!(data(&seen), vec![DataMessage::Text("first".into())]);
    assert!(errors(&seen).is_empty(), "{:?}", errors(&seen));
    assert!(b.has_data_channel());
}

#[tokio::test]
async fn malformed_frame_is_reported_and_channel_stays_usable() {
    let platform = FakePlatform::new();
    let mut pair = connected_pair(&platform, SessionOptions::initiator(), SessionOptions::responder()).await;
    let b_channel = platform.backend(1).channel(0);

    b_channel.deliver(Frame::Text("not an envelope".into()));
    let seen = wait_for(&mut pair.b_events, "error").await;
    assert!(matches!(errors(&seen)[0], PeerError::Frame(_)));

    b_channel.deliver(Frame::Text(r#"{"type":"text","body":"still here"}"#.into()));
    let seen = wait_for(&mut pair.b_events, "data").await;
    assert_eq!(data(&seen), vec![DataMessage::Text("still here".into())]);
    assert!(!pair.b.is_destroyed());
}
