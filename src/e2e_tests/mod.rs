#[cfg(test)]
mod tests {

    use std::collections::HashSet;
    use std::sync::Arc;

    use futures::lock::Mutex;
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};
    use serde_json::{json, Value};

    const BASE_URL: &str = "http://localhost:5001";

    #[tokio::test]
    async fn test_e2e_add_tasks() {
        let mut titles = vec![];

        for _x in 0..10 {
            let rand_string: String = thread_rng()
                .sample_iter(&Alphanumeric)
                .take(30)
                .map(char::from)
                .collect();
            titles.push(rand_string);
        }

        let mut handles = vec![];
        let shared_ids = Arc::new(Mutex::new(vec![]));
        for title in titles.iter() {
            handles.push(tokio::spawn(add_task(title.clone(), shared_ids.clone())));
        }
        futures::future::join_all(handles).await;

        let list = task_list().await;
        let ids: HashSet<String> = shared_ids.lock().await.iter().cloned().collect();
        assert_eq!(
            list["tasks"]
                .as_array()
                .unwrap()
                .iter()
                .filter(|task| ids.contains(task["id"].as_str().unwrap_or_default()))
                .count(),
            titles.len()
        );

        for id in ids.iter() {
            delete_task(id).await;
        }
    }

    async fn add_task(title: String, ids: Arc<Mutex<Vec<String>>>) {
        let response: Value = reqwest::Client::new()
            .post(format!("{}/addTask", BASE_URL))
            .header("correlation-id", "b7b054ca-0d37-418b-ab16-ebe8aa409285")
            .json(&json!({"board": "e2e", "item": {"title": title}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let id = response["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .find(|task| task["title"] == title.as_str())
            .and_then(|task| task["id"].as_str())
            .unwrap()
            .to_string();
        ids.lock().await.push(id);
    }

    async fn delete_task(id: &str) {
        let response = reqwest::Client::new()
            .delete(format!("{}/deleteTask?board=e2e&id={}", BASE_URL, id))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    async fn task_list() -> Value {
        reqwest::Client::new()
            .get(format!("{}/getTasks?board=e2e", BASE_URL))
            .header("correlation-id", "b7b054ca-0d37-418b-ab16-ebe8aa409285")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}
