use scotusfeed::llm::remote::RemoteLlmProvider;
use scotusfeed::llm::{LlmProvider, LlmRequest};

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model": "gemini-2.5-flash-lite",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "Background:\nA dispute.\n\nHolding:\nAffirmed."
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 5,
                    "total_tokens": 15
                }
            }"#,
        )
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gemini-2.5-flash-lite");

    let request = LlmRequest {
        prompt: "Summarize".to_string(),
        max_tokens: Some(650),
        temperature: Some(0.2),
        timeout_seconds: Some(10),
    };

    let response = provider.generate(request).await.expect("response");
    assert_eq!(response.content, "Background:\nA dispute.\n\nHolding:\nAffirmed.");
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.completion_tokens, 5);
    assert_eq!(response.usage.total_tokens, 15);
    assert_eq!(response.model, "gemini-2.5-flash-lite");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_without_usage_or_model() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "configured-model");
    let request = LlmRequest {
        prompt: "Summarize".to_string(),
        max_tokens: None,
        temperature: None,
        timeout_seconds: None,
    };

    let response = provider.generate(request).await.expect("response");
    assert_eq!(response.content, "");
    assert_eq!(response.model, "configured-model");
    assert_eq!(response.usage.total_tokens, 0);
}

#[tokio::test]
async fn test_remote_provider_error_handling() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gemini-2.5-flash-lite");

    let request = LlmRequest {
        prompt: "Test".to_string(),
        max_tokens: None,
        temperature: None,
        timeout_seconds: None,
    };

    let err = provider.generate(request).await.expect_err("429 must fail");
    assert!(err.to_string().contains("429"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_timeout() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gemini-2.5-flash-lite");

    let request = LlmRequest {
        prompt: "Test".to_string(),
        max_tokens: None,
        temperature: None,
        timeout_seconds: Some(1),
    };

    let result = provider.generate(request).await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("timed out"));
}

#[test]
fn test_from_config_requires_api_key() {
    let config = common::RemoteLlmConfig {
        api_key_env: Some("SCOTUSFEED_TEST_UNSET_KEY".to_string()),
        ..common::RemoteLlmConfig::default()
    };
    let err = match RemoteLlmProvider::from_config(&config) {
        Ok(_) => panic!("provider must not build without a key"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("SCOTUSFEED_TEST_UNSET_KEY"));
}
