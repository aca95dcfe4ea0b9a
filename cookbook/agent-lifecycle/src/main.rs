use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use rand::Rng;
use relay_engine::{
    init_tracing, set_default_api_key, Agent, CountingHooks, FieldType, FnModel, FunctionTool,
    LoggingConfig, ModelRequest, ModelResponse, RelayError, RunOptions, Runner, Schema,
};
use serde_json::{json, Value};
use tracing::info;

fn random_number() -> FunctionTool {
    FunctionTool::from_fn(
        "random_number",
        "Generate a random number up to the provided maximum.",
        Schema::new("random_number").field("max", FieldType::Integer),
        |args: Value| {
            let max = args["max"].as_i64().unwrap_or_default();
            if max < 0 {
                return Err(RelayError::tool("random_number", "max must not be negative"));
            }
            Ok(rand::thread_rng().gen_range(0..=max))
        },
    )
}

fn multiply_by_two() -> FunctionTool {
    FunctionTool::from_fn(
        "multiply_by_two",
        "Simple multiplication by two.",
        Schema::new("multiply_by_two").field("x", FieldType::Integer),
        |args: Value| Ok(args["x"].as_i64().unwrap_or_default() * 2),
    )
}

fn final_result() -> Schema {
    Schema::new("FinalResult")
        .with_field(relay_engine::Field::required("number", FieldType::Integer).describe("The final number"))
}

/// Plays the part of the language model: draw, then stop on even numbers or
/// hand odd ones to the multiply agent.
fn scripted_model(
    max: i64,
) -> impl Fn(&ModelRequest<'_>) -> relay_engine::Result<ModelResponse> + Send + Sync {
    move |request: &ModelRequest<'_>| {
        let last_output = request
            .history
            .last()
            .and_then(|entry| entry.tool_result.as_ref())
            .and_then(|result| result.output.as_i64());
        let latest_number = || {
            request
                .history
                .iter()
                .rev()
                .find_map(|entry| entry.tool_result.as_ref())
                .and_then(|result| result.output.as_i64())
                .ok_or_else(|| RelayError::Protocol("no number has been drawn yet".into()))
        };

        match (request.agent.name.as_str(), last_output) {
            ("Start Agent", None) => Ok(ModelResponse::tool_call("random_number", json!({ "max": max }))),
            ("Start Agent", Some(number)) if number % 2 == 0 => {
                Ok(ModelResponse::FinalStructured(json!({ "number": number })))
            }
            ("Start Agent", Some(_)) => Ok(ModelResponse::handoff("Multiply Agent")),
            ("Multiply Agent", None) => Ok(ModelResponse::tool_call(
                "multiply_by_two",
                json!({ "x": latest_number()? }),
            )),
            ("Multiply Agent", Some(number)) => {
                Ok(ModelResponse::FinalStructured(json!({ "number": number })))
            }
            (other, _) => Err(RelayError::Protocol(format!("no script for agent `{other}`"))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing(&LoggingConfig::default())?;

    let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| "OPENAI_API_KEY is not set")?;
    set_default_api_key(api_key)?;

    print!("Enter a max number: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let max: i64 = line
        .trim()
        .parse()
        .map_err(|_| format!("`{}` is not a number", line.trim()))?;

    let multiply_agent = Arc::new(
        Agent::new("Multiply Agent")
            .with_instructions("Multiply the number by 2 and then return the final result.")
            .with_handoff_description("Multiplies odd numbers by two.")
            .with_tool(multiply_by_two())?
            .with_output_schema(final_result())
            .with_hooks(CountingHooks::new("Multiply Agent")),
    );
    let start_agent = Arc::new(
        Agent::new("Start Agent")
            .with_instructions(
                "Generate a random number. If it's even, stop. If it's odd, hand off to the multiply agent.",
            )
            .with_tool(random_number())?
            .with_output_schema(final_result())
            .with_handoff(multiply_agent)
            .with_hooks(CountingHooks::new("Start Agent")),
    );

    let runner = Runner::new(FnModel::new(scripted_model(max)));
    let result = runner
        .run(
            &start_agent,
            format!("Generate a random number between 0 and {max}."),
            RunOptions::default(),
        )
        .await?;

    info!(run_id = %result.run_id, turns = result.turns, "run complete");
    println!("{}", result.final_output);
    println!("Done!");
    Ok(())
}
