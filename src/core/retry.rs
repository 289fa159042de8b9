use crate::core::response::parse_json_response;
use crate::core::usage::UsageLedger;
use crate::domain::model::{LlmRequest, LlmResponse};
use crate::domain::ports::LlmClient;
use crate::utils::error::ReviewError;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// base * (attempt + 1)
    Linear,
    /// base * 2^attempt
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Linear,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// 第 `attempt` 次（從 0 起算）失敗後的等待時間
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay * (attempt + 1),
            Backoff::Exponential => self.base_delay * 2u32.saturating_pow(attempt.min(16)),
        }
    }

    /// 廠商有給 retry-after 時取較長者
    pub fn error_delay(&self, attempt: u32, error: &ReviewError) -> Duration {
        let backoff = self.delay_for(attempt);
        match error {
            ReviewError::RateLimited { retry_after_ms, .. } => {
                backoff.max(Duration::from_millis(*retry_after_ms))
            }
            _ => backoff,
        }
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }
}

/// 一次帶重試的 JSON 呼叫結果
#[derive(Debug)]
pub enum JsonCall {
    Parsed { value: Value, response: LlmResponse },
    /// 用盡重試，最後一次回應仍無法解析
    Unparseable { response: LlmResponse },
    Failed(ReviewError),
}

/// 每次收到回應都記到哪一層、哪一筆
#[derive(Clone, Copy)]
pub struct UsageTag<'a> {
    pub ledger: &'a UsageLedger,
    pub layer: &'a str,
    pub record_id: Option<&'a str>,
}

impl<'a> UsageTag<'a> {
    pub fn new(ledger: &'a UsageLedger, layer: &'a str, record_id: Option<&'a str>) -> Self {
        Self {
            ledger,
            layer,
            record_id,
        }
    }
}

/// 任何 JSON 物件都接受
pub fn any_json(_: &Value) -> bool {
    true
}

/// 篩選回應必須帶 `decision`
pub fn has_decision(value: &Value) -> bool {
    value.get("decision").is_some()
}

/// 呼叫模型直到取得 `accept` 認可的 JSON；解析失敗等待 base_delay，傳輸錯誤依 backoff 等待。
/// 每次收到的回應都計入 `usage`，包含之後被重試掉的。
pub async fn generate_json_with_retry(
    client: &dyn LlmClient,
    request: &LlmRequest,
    policy: &RetryPolicy,
    context: &str,
    usage: UsageTag<'_>,
    accept: fn(&Value) -> bool,
) -> JsonCall {
    let mut attempt = 0;
    loop {
        match client.generate(request).await {
            Ok(response) => {
                usage
                    .ledger
                    .log(client.model_name(), usage.layer, usage.record_id, &response.usage);
                match parse_json_response(&response.text).filter(|v| accept(v)) {
                    Some(value) => return JsonCall::Parsed { value, response },
                    None if policy.is_last(attempt) => {
                        tracing::warn!(
                            "⚠️ {} [{}] no usable JSON after {} attempts",
                            context,
                            client.model_name(),
                            attempt + 1
                        );
                        return JsonCall::Unparseable { response };
                    }
                    None => {
                        tracing::debug!(
                            "{} [{}] attempt {} returned invalid JSON, retrying",
                            context,
                            client.model_name(),
                            attempt + 1
                        );
                        tokio::time::sleep(policy.base_delay).await;
                    }
                }
            }
            Err(e) if policy.is_last(attempt) || !e.is_retryable() => {
                tracing::warn!(
                    "⚠️ {} [{}] failed after {} attempts: {}",
                    context,
                    client.model_name(),
                    attempt + 1,
                    e
                );
                return JsonCall::Failed(e);
            }
            Err(e) => {
                let delay = policy.error_delay(attempt, &e);
                tracing::debug!(
                    "{} [{}] attempt {} failed ({}), retrying in {:?}",
                    context,
                    client.model_name(),
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::ScriptedLlm;
    use crate::core::usage::Pricing;

    #[test]
    fn test_linear_and_exponential_delays() {
        let linear = RetryPolicy::linear(3, Duration::from_secs(2));
        assert_eq!(linear.delay_for(0), Duration::from_secs(2));
        assert_eq!(linear.delay_for(2), Duration::from_secs(6));

        let exponential = RetryPolicy::exponential(3, Duration::from_secs(1));
        assert_eq!(exponential.delay_for(0), Duration::from_secs(1));
        assert_eq!(exponential.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_rate_limit_delay_honours_retry_after() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(10));
        let err = ReviewError::RateLimited {
            provider: "gemini".to_string(),
            retry_after_ms: 500,
        };
        assert_eq!(policy.error_delay(0, &err), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retries_until_json_parses() {
        let llm = ScriptedLlm::new("gemini-flash-latest")
            .respond("not json")
            .respond("{\"decision\": \"exclude\"}");
        let policy = RetryPolicy::linear(3, Duration::ZERO);
        let ledger = UsageLedger::new(Pricing::default());

        let call = generate_json_with_retry(
            &llm,
            &LlmRequest::new("p"),
            &policy,
            "L1",
            UsageTag::new(&ledger, "L1", Some("7")),
            has_decision,
        )
        .await;

        match call {
            JsonCall::Parsed { value, .. } => assert_eq!(value["decision"], "exclude"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(llm.calls(), 2);
        // 被重試掉的那次回應也要計費
        assert_eq!(ledger.call_count(), 2);
    }

    #[tokio::test]
    async fn test_json_without_decision_is_retried() {
        let llm = ScriptedLlm::new("gemini-flash-latest")
            .respond("{\"reasoning\": \"no decision key\"}")
            .respond("{\"decision\": \"pass\"}");
        let policy = RetryPolicy::linear(3, Duration::ZERO);
        let ledger = UsageLedger::new(Pricing::default());

        let call = generate_json_with_retry(
            &llm,
            &LlmRequest::new("p"),
            &policy,
            "L1",
            UsageTag::new(&ledger, "L1", None),
            has_decision,
        )
        .await;

        assert!(matches!(call, JsonCall::Parsed { .. }));
        assert_eq!(llm.calls(), 2);
        assert_eq!(ledger.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_after_all_attempts() {
        let llm = ScriptedLlm::new("m").respond("a").respond("b").respond("c");
        let policy = RetryPolicy::linear(3, Duration::ZERO);
        let ledger = UsageLedger::new(Pricing::default());

        let call = generate_json_with_retry(
            &llm,
            &LlmRequest::new("p"),
            &policy,
            "quick_screen",
            UsageTag::new(&ledger, "quick_screen", Some("paper.txt")),
            any_json,
        )
        .await;

        match call {
            JsonCall::Unparseable { response } => assert_eq!(response.text, "c"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(ledger.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let llm = ScriptedLlm::new("m")
            .fail(ReviewError::ConfigError {
                message: "bad".to_string(),
            })
            .respond("{}");
        let policy = RetryPolicy::linear(3, Duration::ZERO);
        let ledger = UsageLedger::new(Pricing::default());

        let call = generate_json_with_retry(
            &llm,
            &LlmRequest::new("p"),
            &policy,
            "L2",
            UsageTag::new(&ledger, "L2", Some("1")),
            has_decision,
        )
        .await;

        assert!(matches!(call, JsonCall::Failed(ReviewError::ConfigError { .. })));
        assert_eq!(llm.calls(), 1);
        assert!(ledger.is_empty());
    }
}
