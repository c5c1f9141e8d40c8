//! Tool-calling loop over ModelSocket.
//!
//! Registers a weather tool, asks the model a question that needs it, and
//! answers the model's tool calls until the generation finishes.

use std::{env, sync::Arc};

use anyhow::{Context, Result};
use modelsocket::{
    AppendOptions, Client, ClientConfig, FuncTool, GenOptions, OpenOptions, ToolDefinition,
    ToolParameters, ToolProperty, Toolbox,
};

fn weather_tool() -> FuncTool {
    let mut parameters = ToolParameters {
        kind: "object".to_string(),
        ..ToolParameters::default()
    };
    parameters.properties.insert(
        "city".to_string(),
        ToolProperty {
            kind: "string".to_string(),
            description: "City to look up".to_string(),
            r#enum: Vec::new(),
        },
    );
    parameters.required.push("city".to_string());

    FuncTool::new(
        ToolDefinition {
            name: "get_weather".to_string(),
            description: "Returns the current weather for a city".to_string(),
            parameters,
        },
        |args| async move {
            let city = serde_json::from_str::<serde_json::Value>(&args)
                .ok()
                .and_then(|value| {
                    value
                        .get("city")
                        .and_then(|city| city.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "somewhere".to_string());
            Ok(format!("72F and sunny in {city}"))
        },
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = env::var("MODELSOCKET_URL")
        .unwrap_or_else(|_| "wss://models.mixlayer.ai/ws".to_string());
    let api_key = env::var("MODELSOCKET_API_KEY")
        .context("MODELSOCKET_API_KEY environment variable required")?;
    let model = env::var("MODELSOCKET_MODEL")
        .unwrap_or_else(|_| "meta/llama3.1-8b-instruct-free".to_string());

    let toolbox = Arc::new(Toolbox::new());
    toolbox.add(weather_tool());
    toolbox.set_tool_instructions(toolbox.tool_definition_prompt());

    let client = Client::connect(&url, Some(&api_key), ClientConfig::default()).await?;
    let seq = client
        .open(&model, OpenOptions::default().with_toolbox(Arc::clone(&toolbox)))
        .await?;

    seq.append("What's the weather in NYC right now?", AppendOptions::user())
        .await?;

    let mut stream = seq.generate(GenOptions::assistant()).await?;
    while let Some(chunk) = stream.next().await? {
        if !chunk.hidden && !chunk.text.is_empty() {
            print!("{}", chunk.text);
        }
        if !chunk.tool_calls.is_empty() {
            let results = toolbox.call_tools(&chunk.tool_calls).await;
            seq.tool_return(results).await?;
        }
    }
    println!();
    println!(
        "({} input tokens, {} output tokens)",
        stream.input_tokens(),
        stream.output_tokens()
    );

    seq.close().await?;
    client.close().await?;
    Ok(())
}
