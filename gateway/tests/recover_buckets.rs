mod common;
use common::*;

use gateway::core::bmd::Bmd;

fn bmd(uuid: &str, version: i64) -> Bmd {
    Bmd { version, uuid: uuid.to_string(), ..Default::default() }
}

async fn recover(
    client: &reqwest::Client,
    url: &str,
    force: bool,
) -> anyhow::Result<reqwest::Response> {
    let msg = schemas::ActionMsg::new(schemas::ACT_RECOVER_BMD);
    let q = if force { "?force=true" } else { "" };
    Ok(client.put(format!("{}/v1/cluster{}", url, q)).json(&msg).send().await?)
}

/// Targets report BMDs {A,v3}, {A,v5}, {B,v7}: without force the majority
/// disagreement is a cluster-integrity error; with force the majority UUID
/// wins at max version and is re-installed +100.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recover_buckets_majority_and_force() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();

    let t1 = MockTarget::spawn(
        "t1",
        MockConfig { bmd_reply: Some(bmd("uuid-a", 3)), ..Default::default() },
    )
    .await?;
    let t2 = MockTarget::spawn(
        "t2",
        MockConfig { bmd_reply: Some(bmd("uuid-a", 5)), ..Default::default() },
    )
    .await?;
    let t3 = MockTarget::spawn(
        "t3",
        MockConfig { bmd_reply: Some(bmd("uuid-b", 7)), ..Default::default() },
    )
    .await?;
    for t in [&t1, &t2, &t3] {
        t.join(&client, &gw).await?;
    }

    let resp = recover(&client, &gw.url(), false).await?;
    assert!(!resp.status().is_success());
    let body = resp.text().await?;
    assert!(body.contains("cie#"), "expected a cluster-integrity error, got: {}", body);

    let resp = recover(&client, &gw.url(), true).await?;
    assert!(resp.status().is_success(), "force recovery must succeed");
    let recovered: Bmd = resp.json().await?;
    assert_eq!(recovered.uuid, "uuid-a");
    assert_eq!(recovered.version, 105);
    assert_eq!(gw.state.owners.bmd.get().version, 105);

    for t in [t1, t2, t3] {
        t.shutdown();
    }
    gw.shutdown();
    Ok(())
}

/// Same-UUID targets recover on the fast path: max version + 100.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recover_buckets_same_uuid_fast_path() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();
    let t1 = MockTarget::spawn(
        "t1",
        MockConfig { bmd_reply: Some(bmd("u", 4)), ..Default::default() },
    )
    .await?;
    let t2 = MockTarget::spawn(
        "t2",
        MockConfig { bmd_reply: Some(bmd("u", 9)), ..Default::default() },
    )
    .await?;
    t1.join(&client, &gw).await?;
    t2.join(&client, &gw).await?;

    let resp = recover(&client, &gw.url(), false).await?;
    assert!(resp.status().is_success());
    let recovered: Bmd = resp.json().await?;
    assert_eq!((recovered.uuid.as_str(), recovered.version), ("u", 109));

    t1.shutdown();
    t2.shutdown();
    gw.shutdown();
    Ok(())
}
