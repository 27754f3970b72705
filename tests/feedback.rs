mod common;

use std::time::Duration;

use common::wait_until;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use ur_fabrication::{AckToken, FeedbackListener, ListenerConfig, ListenerError, Payload};

#[tokio::test]
async fn controller_lines_become_typed_messages() {
    let mut listener = FeedbackListener::new(ListenerConfig::new("127.0.0.1", 0));
    let addr = listener.start().await.unwrap();
    let store = listener.store();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"hello world\n[1, 2.5, -3]\n[1, x]\n")
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || store.len() == 3).await);
    assert_eq!(
        store.payloads(),
        vec![
            Payload::text("hello world"),
            Payload::numbers(&[1.0, 2.5, -3.0]),
            Payload::text("[1, x]"),
        ]
    );
    assert!(store.contains(&AckToken::close_to(&[1.0, 2.5, -3.0001], 1e-3)));
    listener.shutdown().await;
}

#[tokio::test]
async fn every_line_is_echoed_back() {
    let mut listener = FeedbackListener::new(ListenerConfig::new("127.0.0.1", 0));
    let addr = listener.start().await.unwrap();

    let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
    client.get_mut().write_all(b"Task_0_received\n").await.unwrap();
    let mut reply = String::new();
    client.read_line(&mut reply).await.unwrap();
    assert_eq!(reply.trim_end(), "Message from client: Task_0_received");
    listener.shutdown().await;
}

#[tokio::test]
async fn listen_gives_up_after_silence() {
    let mut config = ListenerConfig::new("127.0.0.1", 0);
    config.echo_replies = false;
    let mut listener = FeedbackListener::new(config);
    listener.start().await.unwrap();

    let result = listener
        .listen(&CancellationToken::new(), Some(Duration::from_millis(100)))
        .await;
    assert!(matches!(result, Err(ListenerError::ListenTimeout(_))));
    listener.shutdown().await;
}

#[tokio::test]
async fn invalid_utf8_line_does_not_drop_the_connection() {
    let mut listener = FeedbackListener::new(ListenerConfig::new("127.0.0.1", 0));
    let addr = listener.start().await.unwrap();
    let store = listener.store();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"first\n\xff\xfe bad\n").await.unwrap();
    client.write_all(b"Task_0_received\n").await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || store.len() == 3).await);
    assert_eq!(store.payloads()[1], Payload::text("\u{FFFD}\u{FFFD} bad"));
    assert!(store.contains(&AckToken::exact("Task_0_received")));
    listener.shutdown().await;
}

#[tokio::test]
async fn overlong_line_is_stored_and_reading_continues() {
    let mut config = ListenerConfig::new("127.0.0.1", 0);
    config.max_line_length = 16;
    config.echo_replies = false;
    let mut listener = FeedbackListener::new(config);
    let addr = listener.start().await.unwrap();
    let store = listener.store();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&[b'x'; 40]).await.unwrap();
    client.write_all(b"\nTask_0_complete\n").await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            store.contains(&AckToken::exact("Task_0_complete"))
        })
        .await
    );
    let stored: usize = store
        .payloads()
        .iter()
        .filter_map(|p| p.as_text())
        .filter(|t| t.starts_with('x'))
        .map(str::len)
        .sum();
    assert_eq!(stored, 40);
    listener.shutdown().await;
}
