//! Council collaborators against a mockall `CompletionProvider`.

use async_trait::async_trait;
use futures::StreamExt;
use mockall::mock;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use coordination::events::{agent_stage, STAGE_DONE};
use coordination::{
    AgentContext, AgentError, AnalysisAgent, ChatMessage, CompletionProvider, ErrorKind, Evidence,
    EventStatus, ProviderError, Query, WorkflowEvent, WorkflowOrchestrator,
};
use council_agents::{
    build_registry, collaborators_with, AnalystKind, AppConfig, PromptedAnalyst,
};

mock! {
    pub Provider {}

    #[async_trait]
    impl CompletionProvider for Provider {
        async fn complete(
            &self,
            prompt: &str,
            history: &[ChatMessage],
            timeout: Duration,
        ) -> Result<String, ProviderError>;
    }
}

const QUERY: &str = "What is the unemployment rate in March 2024?";

fn context_with_fact() -> AgentContext {
    AgentContext {
        keywords: vec!["unemployment".into(), "rate".into()],
        periods: vec!["March 2024".into()],
        facts: vec![Evidence {
            text: "The unemployment rate was 3.9% in March 2024".into(),
            source: "bls".into(),
            score: 0.9,
        }],
        ..AgentContext::default()
    }
}

// ── PromptedAnalyst ────────────────────────────────────────────────

#[tokio::test]
async fn test_analyst_prompt_carries_query_and_facts() {
    let mut provider = MockProvider::new();
    provider
        .expect_complete()
        .withf(|prompt, history, timeout| {
            prompt.contains(QUERY)
                && prompt.contains("[bls] The unemployment rate was 3.9%")
                && prompt.contains("Periods: March 2024")
                && history.is_empty()
                && *timeout == Duration::from_secs(30)
        })
        .times(1)
        .returning(|_, _, _| {
            Ok("CLAIM: Unemployment was 3.9% in March 2024 | value: 3.9 | source: bls\nCONFIDENCE: 0.9".into())
        });

    let analyst = PromptedAnalyst::new(AnalystKind::Labor, Arc::new(provider), Duration::from_secs(30));
    let finding = analyst
        .analyze(&Query::new(QUERY), &context_with_fact())
        .await
        .unwrap();

    assert_eq!(finding.agent_name, "labor");
    assert_eq!(finding.claims.len(), 1);
    assert_eq!(finding.claims[0].value, Some(3.9));
    assert!((finding.confidence - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_provider_timeout_surfaces_as_transient() {
    let mut provider = MockProvider::new();
    provider
        .expect_complete()
        .returning(|_, _, _| Err(ProviderError::Timeout(30)));

    let analyst = PromptedAnalyst::new(AnalystKind::Housing, Arc::new(provider), Duration::from_secs(30));
    let err = analyst
        .analyze(&Query::new(QUERY), &AgentContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Timeout(30)));
    assert_eq!(err.kind(), ErrorKind::TransientProvider);
}

#[tokio::test]
async fn test_unstructured_reply_is_validation_failure() {
    let mut provider = MockProvider::new();
    provider
        .expect_complete()
        .returning(|_, _, _| Ok("Rates are probably fine.".into()));

    let analyst = PromptedAnalyst::new(AnalystKind::Markets, Arc::new(provider), Duration::from_secs(5));
    let err = analyst
        .analyze(&Query::new(QUERY), &AgentContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Validation(_)));
}

#[test]
fn test_registry_built_from_names() {
    let provider: Arc<dyn CompletionProvider> = Arc::new(MockProvider::new());
    let registry = build_registry(
        &["labor".into(), "Fed Policy".into()],
        provider.clone(),
        Duration::from_secs(5),
    )
    .unwrap();
    assert_eq!(registry.len(), 2);
    assert!(registry.get("fed_policy").is_some());

    assert!(build_registry(&["tarot".into()], provider, Duration::from_secs(5)).is_err());
}

// ── Full council run ───────────────────────────────────────────────

fn scripted_provider() -> MockProvider {
    let mut provider = MockProvider::new();
    provider.expect_complete().returning(|prompt, _, _| {
        let reply = if prompt.contains("Reply with AGREE or DISAGREE") {
            "AGREE\nThe reconciled unemployment figure holds."
        } else if prompt.contains("Write a concise, direct answer") {
            "Unemployment rose modestly since 2022."
        } else if prompt.contains("You are the labor analyst") {
            "CLAIM: Unemployment rose to 3.9% since 2022 | value: 3.9 | source: bls\nCONFIDENCE: 0.8"
        } else if prompt.contains("You are the inflation analyst") {
            "CLAIM: Inflation cooled to 3.5% since 2022 | value: 3.5 | source: bls\nCONFIDENCE: 0.7"
        } else {
            "Unemployment and inflation data since 2022 support the reported figures."
        };
        Ok(reply.to_string())
    });
    provider
}

#[tokio::test]
async fn test_council_run_with_mocked_provider_completes() {
    let mut facts = tempfile::NamedTempFile::new().unwrap();
    write!(
        facts,
        r#"[{{"text": "Unemployment rose to 3.9% in 2024", "source": "bls"}}]"#
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.restrict_analysts(&["labor".into(), "inflation".into()]).unwrap();
    config.evidence_path = Some(facts.path().to_path_buf());
    config.engine.rate_limits.default_calls_per_second = 0.0;

    let collaborators = collaborators_with(&config, Arc::new(scripted_provider())).unwrap();
    let orchestrator = WorkflowOrchestrator::new(config.engine.clone(), collaborators);
    let events: Vec<WorkflowEvent> = orchestrator
        .run_workflow("Why did unemployment rise since 2022, and what should the Fed do about inflation?")
        .collect()
        .await;

    let last = events.last().unwrap();
    assert_eq!(last.stage, STAGE_DONE);
    assert_eq!(
        last.payload["synthesis"]["answer"],
        "Unemployment rose modestly since 2022."
    );
    for name in ["labor", "inflation"] {
        let stage = agent_stage(name);
        assert!(
            events
                .iter()
                .any(|e| e.stage == stage && e.status == EventStatus::Complete),
            "{name} should complete"
        );
    }
}
