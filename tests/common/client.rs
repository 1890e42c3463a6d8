use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde_json::Value;

use super::TestServer;

/// Thin HTTP client around the test server's public API.
pub struct TestClient {
    client: Client,
    base_url: String,
}

impl TestClient {
    pub fn new(server: &TestServer) -> Self {
        TestClient {
            client: Client::new(),
            base_url: format!("http://127.0.0.1:{}", server.port),
        }
    }

    pub async fn post_import_json(&self, user: &str, body: &Value) -> Response {
        self.client
            .post(format!("{}/user/{}/import", self.base_url, user))
            .json(body)
            .send()
            .await
            .expect("Import request failed")
    }

    pub async fn post_import_raw(&self, user: &str, body: Vec<u8>) -> Response {
        self.client
            .post(format!("{}/user/{}/import", self.base_url, user))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Import request failed")
    }

    pub async fn post_import_multipart(&self, user: &str, files: Vec<Vec<u8>>) -> Response {
        let mut form = Form::new();
        for (i, bytes) in files.into_iter().enumerate() {
            form = form.part(
                format!("file{}", i),
                Part::bytes(bytes).file_name(format!("history{}.json", i)),
            );
        }
        self.client
            .post(format!("{}/user/{}/import", self.base_url, user))
            .multipart(form)
            .send()
            .await
            .expect("Import request failed")
    }

    pub async fn post_sync(&self, user: &str) -> Response {
        self.client
            .post(format!("{}/user/{}/import/sync", self.base_url, user))
            .send()
            .await
            .expect("Sync request failed")
    }

    pub async fn get_import_status(&self, user: &str) -> Response {
        self.client
            .get(format!("{}/user/{}/import/status", self.base_url, user))
            .send()
            .await
            .expect("Status request failed")
    }

    pub async fn get_stats(&self, user: &str, query: &str) -> Response {
        let url = if query.is_empty() {
            format!("{}/user/{}/stats", self.base_url, user)
        } else {
            format!("{}/user/{}/stats?{}", self.base_url, user, query)
        };
        self.client
            .get(url)
            .send()
            .await
            .expect("Stats request failed")
    }

    pub async fn get_recommendations(&self, user: &str) -> Response {
        self.client
            .get(format!("{}/user/{}/recommendations", self.base_url, user))
            .send()
            .await
            .expect("Recommendations request failed")
    }

    pub async fn post_recommendations(&self, user: &str, force: bool) -> Response {
        self.client
            .post(format!("{}/user/{}/recommendations", self.base_url, user))
            .json(&serde_json::json!({ "force": force }))
            .send()
            .await
            .expect("Recommendations request failed")
    }
}

pub async fn json_body(response: Response) -> Value {
    response.json().await.expect("Failed to parse JSON body")
}
