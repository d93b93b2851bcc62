mod common;
use common::*;

use schemas::{DlJobInfo, DlJobMap, DlStatusResp, DlTaskProgress, NotifMsg};

fn status(finished: u64, task: &str) -> DlStatusResp {
    DlStatusResp {
        job_id: "job".to_string(),
        total: 10,
        finished_cnt: finished,
        scheduled_cnt: 10,
        current_tasks: vec![DlTaskProgress { name: task.to_string(), downloaded: 1, total: 2 }],
        ..Default::default()
    }
}

/// When the proxy holds the listener and only active tasks are wanted, the
/// reply is aggregated from in-process snapshots with no broadcast at all.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_active_status_answers_from_listener_without_broadcast() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();
    let t1 = MockTarget::with_objects("t1", &[]).await?;
    let t2 = MockTarget::with_objects("t2", &[]).await?;
    t1.join(&client, &gw).await?;
    t2.join(&client, &gw).await?;

    // Start a download job: fans out to both targets, registers a listener.
    let resp = client
        .post(format!("{}/v1/download", gw.url()))
        .json(&serde_json::json!({"description": "test job"}))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let id = resp.json::<serde_json::Value>().await?["id"].as_str().unwrap().to_string();
    assert_eq!(t1.calls("download-post"), 1);
    assert_eq!(t2.calls("download-post"), 1);

    // Targets report progress through /v1/notifs.
    let (s1, s2) = (status(3, "x"), status(4, "y"));
    for (node, st) in [("t1", &s1), ("t2", &s2)] {
        let msg = NotifMsg {
            uuid: id.clone(),
            node_id: node.to_string(),
            kind: "download".to_string(),
            stats: serde_json::to_value(st)?,
            finished: false,
            err: String::new(),
        };
        let resp = client.post(format!("{}/v1/notifs", gw.url())).json(&msg).send().await?;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    let resp = client
        .get(format!("{}/v1/download?id={}&only-active=true", gw.url(), id))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let got: DlStatusResp = resp.json().await?;
    let expected = s1.clone().aggregate(&s2);
    assert_eq!(got, expected);
    // The fast path must not have touched the targets.
    assert_eq!(t1.calls("download-get"), 0);
    assert_eq!(t2.calls("download-get"), 0);

    t1.shutdown();
    t2.shutdown();
    gw.shutdown();
    Ok(())
}

/// With an empty id the per-target job maps are merged via the commutative
/// aggregate.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_id_merges_job_maps_from_targets() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();

    let mut jobs1 = DlJobMap::new();
    jobs1.insert(
        "j1".to_string(),
        DlJobInfo { id: "j1".to_string(), num_pending: 2, started_ms: 100, ..Default::default() },
    );
    let mut jobs2 = DlJobMap::new();
    jobs2.insert(
        "j1".to_string(),
        DlJobInfo { id: "j1".to_string(), num_pending: 3, started_ms: 50, ..Default::default() },
    );
    let t1 = MockTarget::spawn(
        "t1",
        MockConfig { dl_jobs: Some(jobs1), ..Default::default() },
    )
    .await?;
    let t2 = MockTarget::spawn(
        "t2",
        MockConfig { dl_jobs: Some(jobs2), ..Default::default() },
    )
    .await?;
    t1.join(&client, &gw).await?;
    t2.join(&client, &gw).await?;

    let resp = client.get(format!("{}/v1/download", gw.url())).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let jobs: Vec<DlJobInfo> = resp.json().await?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].num_pending, 5);
    assert_eq!(jobs[0].started_ms, 50);

    t1.shutdown();
    t2.shutdown();
    gw.shutdown();
    Ok(())
}

/// All targets replying 404 elevates to a single 404.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_404_propagates_404() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();
    let t1 = MockTarget::with_objects("t1", &[]).await?; // no dl state: replies 404
    t1.join(&client, &gw).await?;

    let resp = client
        .get(format!("{}/v1/download?id=unknown-job", gw.url()))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    t1.shutdown();
    gw.shutdown();
    Ok(())
}
