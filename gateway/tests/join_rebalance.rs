mod common;
use common::*;

/// Two targets self-register concurrently: both land in the map, the RMD
/// moves once per rebalance-requiring addition, and the metasync waves are
/// monotone in Smap version.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_target_joins_settle() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();

    let t1 = MockTarget::with_objects("t1", &[]).await?;
    let t2 = MockTarget::with_objects("t2", &[]).await?;

    let (r1, r2) = tokio::join!(t1.join(&client, &gw), t2.join(&client, &gw));
    r1?;
    r2?;

    wait_until(5000, || {
        let smap = gw.state.owners.smap.get();
        smap.contains_id("t1") && smap.contains_id("t2")
    })
    .await?;

    // Each target addition required a rebalance.
    wait_until(5000, || gw.state.owners.rmd.get().version == 2).await?;

    // Waves each target observed never go backwards in Smap version.
    wait_until(5000, || !t2.wave_versions().is_empty()).await?;
    for t in [&t1, &t2] {
        let versions = t.wave_versions();
        for pair in versions.windows(2) {
            assert!(pair[0] <= pair[1], "wave versions must be monotone: {:?}", versions);
        }
    }

    t1.shutdown();
    t2.shutdown();
    gw.shutdown();
    Ok(())
}

/// A keepalive from a known, unchanged node only records the heartbeat.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keepalive_records_heartbeat_without_remap() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();
    let t1 = MockTarget::with_objects("t1", &[]).await?;
    t1.join(&client, &gw).await?;

    let version_before = gw.state.owners.smap.get().version;
    let req = gateway_join_req(&t1);
    let resp = client
        .post(format!("{}/v1/cluster/keepalive", gw.url()))
        .json(&req)
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(gw.state.owners.smap.get().version, version_before);
    assert!(gw.state.keepalive.silent_for("t1").is_some());

    t1.shutdown();
    gw.shutdown();
    Ok(())
}

/// Joining with the URL of an existing member is rejected as a duplicate.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_url_join_is_rejected() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();
    let t1 = MockTarget::with_objects("t1", &[]).await?;
    t1.join(&client, &gw).await?;

    let mut impostor = t1.node.clone();
    impostor.id = "t-impostor".to_string();
    let req = gateway::core::membership::JoinReq { node: impostor, smap: None, bmd: None };
    let resp = client
        .post(format!("{}/v1/cluster/autoreg", gw.url()))
        .json(&req)
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
    assert!(!gw.state.owners.smap.get().contains_id("t-impostor"));

    t1.shutdown();
    gw.shutdown();
    Ok(())
}

fn gateway_join_req(t: &MockTarget) -> gateway::core::membership::JoinReq {
    gateway::core::membership::JoinReq { node: t.node.clone(), smap: None, bmd: None }
}
