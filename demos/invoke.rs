//! Resolve a provider identifier and send it one prompt.
//!
//! Run with:
//! ```sh
//! OPENAI_API_KEY=sk-... cargo run --example invoke -- openai:chat:gpt-4 "Say hello"
//! cargo run --example invoke -- "exec:echo" "hello from a script"
//! ```

use uni_invoke::api::ProviderOptions;
use uni_invoke::registry::ProviderRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(identifier), Some(prompt)) = (args.next(), args.next()) else {
        eprintln!("usage: invoke <provider-identifier> <prompt>");
        std::process::exit(2);
    };

    // 1. Build a registry over the process environment and the default cache
    let registry = ProviderRegistry::builder().build()?;

    // 2. Resolve the identifier (raises on unknown vendors or bad config)
    let provider = registry.load_api_provider(&identifier, &ProviderOptions::default())?;
    println!("provider: {}", provider.id());

    // 3. Call it; ordinary failures come back in `error`
    let response = provider.call_api(&prompt, None).await?;
    match (&response.error, &response.output) {
        (Some(error), _) => eprintln!("error: {}", error),
        (None, Some(output)) => println!("{}", output),
        (None, None) => println!("(no output)"),
    }
    if let Some(usage) = &response.token_usage {
        println!("usage: {}", serde_json::to_string(usage)?);
    }
    if response.cached {
        println!("(served from cache)");
    }
    Ok(())
}
