//! The process-wide default key. Kept in its own test binary so no other test
//! observes the global being set.

use std::sync::Arc;

use relay_engine::{
    default_api_key, set_default_api_key, Agent, CountingHooks, RelayError, RunOptions, Runner,
    StubModel,
};

#[tokio::test]
async fn runs_need_a_credential_and_the_default_is_set_once() {
    let hooks = CountingHooks::new("guarded");
    let agent = Arc::new(Agent::new("Guarded").with_hooks(hooks.clone()));
    let model = StubModel::new(vec![r#"{"action":"respond","content":"hello"}"#.into()]);
    let runner = Runner::new(model.clone());

    let failure = runner
        .run(&agent, "hi", RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, RelayError::MissingCredential));
    assert_eq!(failure.turn, 0);
    assert!(failure.history.is_empty());
    assert_eq!(model.invocations(), 0);
    assert_eq!(hooks.count(), 0);

    assert!(matches!(set_default_api_key(""), Err(RelayError::MissingCredential)));
    assert!(default_api_key().is_none());

    set_default_api_key("sk-process-wide").unwrap();
    assert_eq!(default_api_key().unwrap().expose(), "sk-process-wide");
    assert!(matches!(
        set_default_api_key("sk-another"),
        Err(RelayError::Config(_))
    ));

    let result = runner
        .run(&agent, "hi", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(result.final_output.to_string(), "hello");
    assert_eq!(hooks.count(), 2);
}
