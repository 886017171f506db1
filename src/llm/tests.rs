use super::*;
use crate::failure::ErrorKind;
use std::sync::Mutex;
use std::time::Duration;

struct ScriptedLlm {
    replies: Mutex<Vec<Result<String, ServiceError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Result<String, ServiceError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn invoke(&self, prompt: &str, _params: &LlmParams) -> Result<String, ServiceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            Ok("default".to_string())
        } else {
            replies.remove(0)
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_throttling() {
    let llm = ScriptedLlm::new(vec![
        Err(ServiceError::Throttled("429".into())),
        Ok("analysis".into()),
    ]);

    let start = tokio::time::Instant::now();
    let answer = invoke_with_retry(
        &llm,
        &RetryPolicy::default(),
        "prompt",
        &LlmParams::for_purpose("analysis"),
        None,
    )
    .await
    .unwrap();

    assert_eq!(answer, "analysis");
    assert_eq!(llm.prompts.lock().unwrap().len(), 2);
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_credentials_fail_fast() {
    let llm = ScriptedLlm::new(vec![Err(ServiceError::Credentials("expired".into()))]);

    let err = invoke_with_retry(
        &llm,
        &RetryPolicy::default(),
        "prompt",
        &LlmParams::for_purpose("analysis"),
        None,
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert_eq!(llm.prompts.lock().unwrap().len(), 1);
}

#[test]
fn test_service_errors_classify() {
    use crate::failure::classify;
    let kind = |e: ServiceError| classify(&e.signal()).kind;
    assert_eq!(kind(ServiceError::Throttled("x".into())), ErrorKind::Transient);
    assert_eq!(kind(ServiceError::Unavailable("x".into())), ErrorKind::Transient);
    assert_eq!(kind(ServiceError::Credentials("x".into())), ErrorKind::Permanent);
    assert_eq!(kind(ServiceError::Misconfigured("x".into())), ErrorKind::Permanent);
    assert_eq!(kind(ServiceError::Other("x".into())), ErrorKind::Permanent);
}
