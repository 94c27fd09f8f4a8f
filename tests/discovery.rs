use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::net::UdpSocket;

const WINDOW: Duration = Duration::from_millis(300);

fn config_for(target: SocketAddr) -> jebao::DiscoveryConfig {
    jebao::DiscoveryConfig::builder()
        .target(target)
        .bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .window(WINDOW)
        .build()
}

#[tokio::test]
async fn every_answering_pump_is_reported() -> anyhow::Result<()> {
    let responder = jebao::FakeDiscoveryResponder::spawn(vec![
        jebao::discovery_response("did-reef-1"),
        jebao::discovery_response("did-reef-2"),
    ])
    .await?;

    let found = jebao::discover(&config_for(responder.addr())).await;

    let mut ids: Vec<&str> = found.keys().map(String::as_str).collect();
    ids.sort_unstable();
    assert_eq!(vec!["did-reef-1", "did-reef-2"], ids);
    assert_eq!(Some(&IpAddr::V4(Ipv4Addr::LOCALHOST)), found.get("did-reef-1"));
    Ok(())
}

/// Answers one probe from 127.0.0.1 and then again from 127.0.0.2.
async fn answer_twice_from_two_hosts(device_id: &'static str) -> anyhow::Result<SocketAddr> {
    let first = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let second = UdpSocket::bind((Ipv4Addr::new(127, 0, 0, 2), 0)).await?;
    let addr = first.local_addr()?;
    tokio::spawn(async move {
        let mut probe = [0u8; 64];
        let Ok((_read, peer)) = first.recv_from(&mut probe).await else {
            return;
        };
        let answer = jebao::discovery_response(device_id);
        let _ = first.send_to(&answer, peer).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = second.send_to(&answer, peer).await;
    });
    Ok(addr)
}

#[tokio::test]
async fn latest_answer_wins_for_a_repeated_identifier() -> anyhow::Result<()> {
    let target = answer_twice_from_two_hosts("did-reef-1").await?;

    let found = jebao::discover(&config_for(target)).await;

    assert_eq!(1, found.len());
    assert_eq!(
        Some(&IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2))),
        found.get("did-reef-1")
    );
    Ok(())
}

#[tokio::test]
async fn repeated_answers_collapse_to_one_entry() -> anyhow::Result<()> {
    let responder = jebao::FakeDiscoveryResponder::spawn(vec![
        jebao::discovery_response("did-reef-1"),
        jebao::discovery_response("did-reef-1"),
    ])
    .await?;

    let found = jebao::discover(&config_for(responder.addr())).await;

    assert_eq!(1, found.len());
    Ok(())
}

#[tokio::test]
async fn short_datagrams_are_skipped() -> anyhow::Result<()> {
    let responder = jebao::FakeDiscoveryResponder::spawn(vec![
        vec![0x00, 0x00, 0x00, 0x03, 0x01],
        jebao::discovery_response("did-reef-3"),
    ])
    .await?;

    let found = jebao::discover(&config_for(responder.addr())).await;

    assert_eq!(vec!["did-reef-3"], found.keys().map(String::as_str).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn silence_yields_an_empty_map_after_the_window() -> anyhow::Result<()> {
    let responder = jebao::FakeDiscoveryResponder::spawn(Vec::new()).await?;
    let started = tokio::time::Instant::now();

    let found = jebao::discover(&config_for(responder.addr())).await;

    assert!(found.is_empty());
    assert!(started.elapsed() >= WINDOW);
    Ok(())
}
