mod common;
use common::*;

/// A bucket create sent to a non-primary is reverse-proxied to the primary,
/// the BMD version moves forward by one, and the wave reaches every node.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_bucket_forwards_to_primary_and_syncs() -> anyhow::Result<()> {
    let p1 = TestGateway::primary("p1").await?;
    let p2 = TestGateway::standalone("p2").await?;
    let client = no_redirect_client();
    p2.join(&client, &p1).await?;

    let t1 = MockTarget::with_objects("t1", &[]).await?;
    t1.join(&client, &p1).await?;

    let bmd_before = p1.state.owners.bmd.get().version;

    // To the NON-primary: must be forwarded, not answered locally.
    let status = create_bucket(&client, &p2.url(), "b").await?;
    assert_eq!(status, 200);

    let bmd_after = p1.state.owners.bmd.get();
    assert_eq!(bmd_after.version, bmd_before + 1);
    assert!(bmd_after.buckets.keys().any(|b| b.name == "b"));

    // Forward-to-primary must not leave local state behind on p2; the entry
    // arrives via the metasync wave instead.
    wait_until(5000, || {
        let bmd = p2.state.owners.bmd.get();
        bmd.version == bmd_after.version && bmd.buckets.keys().any(|b| b.name == "b")
    })
    .await?;
    wait_until(5000, || t1.calls("metasync") > 0).await?;

    // Create again: conflict.
    let status = create_bucket(&client, &p1.url(), "b").await?;
    assert_eq!(status, 409);

    t1.shutdown();
    p2.shutdown();
    p1.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn destroy_bucket_removes_and_syncs() -> anyhow::Result<()> {
    let p1 = TestGateway::primary("p1").await?;
    let client = no_redirect_client();
    assert_eq!(create_bucket(&client, &p1.url(), "doomed").await?, 200);

    let resp = client.delete(format!("{}/v1/buckets/doomed", p1.url())).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(p1.state.owners.bmd.get().buckets.is_empty());

    // Destroying twice: 404.
    let resp = client.delete(format!("{}/v1/buckets/doomed", p1.url())).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    p1.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn head_bucket_returns_props() -> anyhow::Result<()> {
    let p1 = TestGateway::primary("p1").await?;
    let client = no_redirect_client();
    assert_eq!(create_bucket(&client, &p1.url(), "b").await?, 200);

    let resp = client.head(format!("{}/v1/buckets/b", p1.url())).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(resp.headers().contains_key("x-bucket-props"));

    p1.shutdown();
    Ok(())
}
