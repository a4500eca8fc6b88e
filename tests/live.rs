//! Smoke test against a running server (`quill --seed`). Run with
//! `QUILL_URL=http://127.0.0.1:8080 cargo test -- --ignored`.

use std::time::Instant;

fn base_url() -> String {
    std::env::var("QUILL_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[ignore]
#[tokio::test]
async fn seeded_user_can_log_in_and_post() {
    let client = client();
    let base = base_url();
    let start = Instant::now();

    let resp = client
        .post(format!("{}/auth/login/", base))
        .form(&[("username", "test"), ("password", "test"), ("next", "/follow/")])
        .send()
        .await
        .expect("server reachable");
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers()["location"], "/follow/");
    let token = resp.headers()["set-cookie"]
        .to_str()
        .unwrap()
        .trim_start_matches("quill_session=")
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let text = format!("smoke {}", uuid::Uuid::new_v4());
    let resp = client
        .post(format!("{}/new/", base))
        .bearer_auth(&token)
        .form(&[("text", text.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);

    let page = client.get(format!("{}/test/", base)).send().await.unwrap().text().await.unwrap();
    assert!(page.contains(&text));

    let followings: Vec<String> = client
        .get(format!("{}/followings/test", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(followings.contains(&"bob".to_string()));

    println!("smoke test finished in {:?}", start.elapsed());
}

#[ignore]
#[tokio::test]
async fn anonymous_posting_redirects_to_login() {
    let resp = client()
        .post(format!("{}/new/", base_url()))
        .form(&[("text", "nope")])
        .send()
        .await
        .expect("server reachable");
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers()["location"], "/auth/login/?next=/new/");
}
