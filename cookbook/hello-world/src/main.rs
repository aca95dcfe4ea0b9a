use std::error::Error;
use std::sync::Arc;

use relay_engine::{init_tracing, Agent, AppConfig, RunOptions, Runner, StubModel};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging)?;

    let model = StubModel::new(vec![
        "Code within the code,\nFunctions calling themselves,\nInfinite loop's dance.".into(),
    ]);
    let agent = Arc::new(Agent::new("Assistant").with_instructions("You only respond in haikus."));

    let runner = Runner::new(model)
        .with_api_key(config.model.api_key.unwrap_or_else(|| "local-stub".into()))?;
    let result = runner
        .run(
            &agent,
            "Tell me about recursion in programming.",
            RunOptions::from_config(&config.runner),
        )
        .await?;

    println!("{}", result.final_output);
    Ok(())
}
