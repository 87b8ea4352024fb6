use chordring_integration_tests::build_ring;
use chordring_integration_tests::integration::NetworkInvariants;
use chordring_lib::{key_of, position_of, ring::MODULUS, MessageType};

#[tokio::test]
async fn test_lookup_scenario_on_small_ring() {
    let (mut harness, addresses) = build_ring(&[(10, 8010), (50, 8050), (90, 8090)]).await;
    let (n10, n50, n90) = (&addresses[0], &addresses[1], &addresses[2]);

    assert_eq!(harness.lookup(n10, 95).await.unwrap().id, 10);
    assert_eq!(harness.lookup(n10, 30).await.unwrap().id, 50);
    assert_eq!(harness.lookup(n50, 95).await.unwrap().id, 10);
    assert_eq!(harness.lookup(n90, 30).await.unwrap().id, 50);

    harness.depart_node(n50).await.unwrap();

    assert_eq!(harness.lookup(n10, 30).await.unwrap().id, 90);
    assert_eq!(harness.lookup(n90, 30).await.unwrap().id, 90);
    assert_eq!(harness.lookup(n10, 95).await.unwrap().id, 10);
}

#[tokio::test]
async fn test_node_owns_its_own_position() {
    let (harness, addresses) = build_ring(&[(10, 8010), (50, 8050), (90, 8090)]).await;

    for address in &addresses {
        let node = harness.get_node(address).await.unwrap();
        for from in &addresses {
            let owner = harness.lookup(from, node.info.id).await.unwrap();
            assert_eq!(owner, node.info);
        }
    }
}

#[tokio::test]
async fn test_single_member_owns_everything() {
    let (harness, addresses) = build_ring(&[(1_000, 8000)]).await;

    for key in [0, 999, 1_000, 1_001, MODULUS - 1] {
        assert_eq!(harness.lookup(&addresses[0], key).await.unwrap().id, 1_000);
    }
    assert!(harness.network().deliveries().await.is_empty());
}

#[tokio::test]
async fn test_ownership_with_hashed_positions() {
    let members: Vec<(u64, u16)> = (0..8)
        .map(|i| {
            let port = 8200 + i;
            (position_of(&format!("127.0.0.1:{}", port)), port)
        })
        .collect();
    let (harness, _) = build_ring(&members).await;

    let mut keys: Vec<u64> = ["apple", "Love is in the air", "query", "*", ""]
        .iter()
        .map(|name| key_of(name))
        .collect();
    for (id, _) in &members {
        keys.extend([*id, (id + 1) % MODULUS, (id + MODULUS - 1) % MODULUS]);
    }
    keys.extend([0, MODULUS - 1]);

    let violations = NetworkInvariants::check_ownership(&harness, &keys).await;
    assert!(violations.is_empty(), "Ownership violated: {:?}", violations);
}

#[tokio::test]
async fn test_lookup_visits_each_member_at_most_once() {
    let members: Vec<(u64, u16)> = (1..=8).map(|i| (i * 10, 8300 + i as u16)).collect();
    let (harness, addresses) = build_ring(&members).await;

    for key in [5, 15, 45, 79, 80, 81, 1_000] {
        harness.network().clear_deliveries().await;
        harness.lookup(&addresses[0], key).await.unwrap();

        let deliveries = harness.network().deliveries().await;
        assert!(deliveries.len() < members.len(), "key {} took {:?}", key, deliveries);
        assert!(deliveries.iter().all(|d| d.kind == MessageType::Lookup));
        assert!(deliveries.iter().all(|d| d.to != addresses[0]));
    }
}

#[tokio::test]
async fn test_two_node_lookup_never_returns_to_origin() {
    let (harness, addresses) = build_ring(&[(10, 8010), (50, 8050)]).await;

    for origin in &addresses {
        for key in [0, 10, 11, 30, 50, 51, 70, MODULUS - 1] {
            harness.network().clear_deliveries().await;
            let owner = harness.lookup(origin, key).await.unwrap();
            let expected = if key > 10 && key <= 50 { 50 } else { 10 };
            assert_eq!(owner.id, expected, "key {} from {}", key, origin);

            let deliveries = harness.network().deliveries().await;
            assert!(deliveries.len() <= 2, "key {} took {:?}", key, deliveries);
            assert!(deliveries.iter().all(|d| &d.to != origin));
        }
    }
}

#[tokio::test]
async fn test_lookup_forwards_one_hop_at_a_time() {
    let (harness, addresses) = build_ring(&[(10, 8010), (50, 8050), (90, 8090)]).await;
    harness.network().clear_deliveries().await;

    assert_eq!(harness.lookup(&addresses[0], 95).await.unwrap().id, 10);

    let hops: Vec<(String, String)> = harness
        .network()
        .deliveries()
        .await
        .into_iter()
        .map(|d| (d.from, d.to))
        .collect();
    assert_eq!(
        hops,
        vec![
            ("127.0.0.1:8010".to_string(), "127.0.0.1:8050".to_string()),
            ("127.0.0.1:8050".to_string(), "127.0.0.1:8090".to_string()),
        ]
    );
}
