use super::*;

fn sh_client(script: &str, timeout_secs: u64) -> CommandLlmClient {
    CommandLlmClient::new(LlmConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        timeout_secs,
        model: None,
    })
}

fn params() -> LlmParams {
    LlmParams::for_purpose("test")
}

#[tokio::test]
async fn test_prompt_goes_to_stdin_and_answer_comes_back() {
    let client = sh_client("cat", 30);
    let answer = client.invoke("  analyse this  ", &params()).await.unwrap();
    assert_eq!(answer, "analyse this");
}

#[tokio::test]
async fn test_throttling_output_is_throttled() {
    let client = sh_client("echo 'ThrottlingException: Rate exceeded' >&2; exit 1", 30);
    let err = client.invoke("p", &params()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Throttled(_)), "got: {:?}", err);
}

#[tokio::test]
async fn test_unavailable_output_is_unavailable() {
    let client = sh_client("echo 'HTTP 503 Service Unavailable' >&2; exit 2", 30);
    let err = client.invoke("p", &params()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Unavailable(_)), "got: {:?}", err);
}

#[tokio::test]
async fn test_credential_output_is_credentials() {
    let client = sh_client("echo 'Error: invalid API key' >&2; exit 1", 30);
    let err = client.invoke("p", &params()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Credentials(_)), "got: {:?}", err);
}

#[tokio::test]
async fn test_unknown_failure_is_other() {
    let client = sh_client("echo 'segmentation fault' >&2; exit 139", 30);
    let err = client.invoke("p", &params()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Other(_)), "got: {:?}", err);
}

#[tokio::test]
async fn test_empty_output_is_unavailable() {
    let client = sh_client("cat > /dev/null", 30);
    let err = client.invoke("p", &params()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Unavailable(_)), "got: {:?}", err);
}

#[tokio::test]
async fn test_missing_command_is_misconfigured() {
    let client = CommandLlmClient::new(LlmConfig {
        command: "archflow-no-such-llm-cli".to_string(),
        ..LlmConfig::default()
    });
    let err = client.invoke("p", &params()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Misconfigured(_)), "got: {:?}", err);
}

#[tokio::test]
async fn test_slow_command_times_out_as_unavailable() {
    let client = sh_client("sleep 5", 1);
    let err = client.invoke("p", &params()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Unavailable(_)), "got: {:?}", err);
}

#[test]
fn test_model_override_is_appended() {
    let client = CommandLlmClient::new(LlmConfig {
        command: "claude".to_string(),
        args: vec!["-p".to_string()],
        timeout_secs: 10,
        model: Some("default-model".to_string()),
    });
    assert_eq!(
        client.build_args(&params()),
        vec!["-p", "--model", "default-model"]
    );
    let custom = params().with_model(Some("other".to_string()));
    assert_eq!(client.build_args(&custom), vec!["-p", "--model", "other"]);
}
