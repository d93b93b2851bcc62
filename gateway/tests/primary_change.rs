mod common;
use common::*;

/// Happy path: prepare everywhere, local commit, commit everywhere; the
/// designated proxy takes over with a +100 version jump.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_phase_primary_change_happy_path() -> anyhow::Result<()> {
    let p1 = TestGateway::primary("p1").await?;
    let p2 = TestGateway::standalone("p2").await?;
    let client = no_redirect_client();
    p2.join(&client, &p1).await?;

    let t1 = MockTarget::with_objects("t1", &[]).await?;
    t1.join(&client, &p1).await?;

    let version_before = p1.state.owners.smap.get().version;

    let resp = client.put(format!("{}/v1/cluster/proxy/p2", p1.url())).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    // Both phases reached the target.
    wait_until(5000, || t1.calls("set-primary-prepare") == 1).await?;
    wait_until(5000, || t1.calls("set-primary-commit") == 1).await?;

    // p2 took over and told everyone with a +100 wave.
    wait_until(5000, || p2.state.is_primary()).await?;
    assert!(!p1.state.is_primary());
    wait_until(5000, || p1.state.owners.smap.get().version >= version_before + 100).await?;
    assert_eq!(p1.state.owners.smap.get().primary_id, "p2");

    t1.shutdown();
    p2.shutdown();
    p1.shutdown();
    Ok(())
}

/// If any node fails the prepare phase, no node changes its primary.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn prepare_failure_aborts_without_state_change() -> anyhow::Result<()> {
    let p1 = TestGateway::primary("p1").await?;
    let p2 = TestGateway::standalone("p2").await?;
    let client = no_redirect_client();
    p2.join(&client, &p1).await?;

    let t1 = MockTarget::with_objects("t1", &[]).await?;
    t1.join(&client, &p1).await?;
    t1.set_fail_set_primary(true);

    let resp = client.put(format!("{}/v1/cluster/proxy/p2", p1.url())).send().await?;
    assert!(!resp.status().is_success());

    // Nothing moved: p1 is still primary everywhere and no commit was sent.
    assert!(p1.state.is_primary());
    assert!(!p2.state.is_primary());
    assert_eq!(p1.state.owners.smap.get().primary_id, "p1");
    assert_eq!(p2.state.owners.smap.get().primary_id, "p1");
    assert_eq!(t1.calls("set-primary-commit"), 0);

    t1.shutdown();
    p2.shutdown();
    p1.shutdown();
    Ok(())
}

/// Designating an unknown proxy is a structured node-not-found error.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_primary_unknown_proxy_is_404() -> anyhow::Result<()> {
    let p1 = TestGateway::primary("p1").await?;
    let client = no_redirect_client();
    let resp = client.put(format!("{}/v1/cluster/proxy/ghost", p1.url())).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    p1.shutdown();
    Ok(())
}
