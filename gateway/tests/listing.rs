mod common;
use common::*;

async fn list_page(
    client: &reqwest::Client,
    url: &str,
    uuid: &str,
    token: &str,
    page_size: u32,
) -> anyhow::Result<schemas::ObjectList> {
    let resp = client
        .get(format!(
            "{}/v1/buckets/b?page-size={}&uuid={}&token={}",
            url, page_size, uuid, token
        ))
        .send()
        .await?;
    anyhow::ensure!(resp.status().is_success(), "listing failed: {}", resp.status());
    Ok(resp.json().await?)
}

/// Paginating with a fixed uuid yields a globally sorted, unique
/// enumeration of everything the targets hold, with no repeats between
/// successive pages.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paged_listing_is_sorted_unique_and_complete() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();

    let t1 = MockTarget::with_objects("t1", &["a", "d", "g", "j"]).await?;
    let t2 = MockTarget::with_objects("t2", &["b", "e", "h", "k"]).await?;
    let t3 = MockTarget::with_objects("t3", &["c", "f", "i", "l"]).await?;
    for t in [&t1, &t2, &t3] {
        t.join(&client, &gw).await?;
    }
    assert_eq!(create_bucket(&client, &gw.url(), "b").await?, 200);

    // First page assigns the uuid.
    let first = list_page(&client, &gw.url(), "", "", 5).await?;
    assert!(!first.uuid.is_empty());
    let uuid = first.uuid.clone();
    assert_eq!(first.entries.len(), 5);

    let mut all: Vec<String> = first.entries.iter().map(|e| e.name.clone()).collect();
    let mut token = first.continuation_token.clone();
    while !token.is_empty() {
        let page = list_page(&client, &gw.url(), &uuid, &token, 5).await?;
        all.extend(page.entries.iter().map(|e| e.name.clone()));
        token = page.continuation_token;
    }

    let expected: Vec<String> = ('a'..='l').map(|c| c.to_string()).collect();
    assert_eq!(all, expected, "concatenated pages must enumerate every object exactly once");

    for t in [t1, t2, t3] {
        t.shutdown();
    }
    gw.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listing_respects_prefix() -> anyhow::Result<()> {
    let gw = TestGateway::primary("p1").await?;
    let client = no_redirect_client();

    let t1 = MockTarget::with_objects("t1", &["logs/1", "logs/3", "data/1"]).await?;
    let t2 = MockTarget::with_objects("t2", &["logs/2", "data/2"]).await?;
    t1.join(&client, &gw).await?;
    t2.join(&client, &gw).await?;
    assert_eq!(create_bucket(&client, &gw.url(), "b").await?, 200);

    let resp = client
        .get(format!("{}/v1/buckets/b?page-size=10&prefix=logs/", gw.url()))
        .send()
        .await?;
    let list: schemas::ObjectList = resp.json().await?;
    let names: Vec<&str> = list.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["logs/1", "logs/2", "logs/3"]);
    assert!(list.continuation_token.is_empty());

    t1.shutdown();
    t2.shutdown();
    gw.shutdown();
    Ok(())
}
