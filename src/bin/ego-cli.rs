use clap::{Parser, Subcommand};
use reqwest::StatusCode;
use serde_json::Value;

use ego::job::{HEADER_JOB_ERR, HEADER_JOB_NAME, HEADER_JOB_RUN_ID};

#[derive(Parser)]
#[command(name = "ego-cli")]
#[command(about = "Operator CLI for an Ego application's governor", long_about = None)]
struct Cli {
    /// Governor base URL.
    #[arg(short, long, default_value = "http://localhost:9003")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a registered job
    Job {
        name: String,
        /// Run id sent with the trigger (random by default)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// List governor routes
    Routes,
    /// Show the loaded configuration
    Configs,
    /// Show the process environment
    Env,
    /// Show build and identity information
    BuildInfo,
    /// Dump Prometheus metrics
    Metrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Job { name, run_id } => {
            let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let res = client
                .post(format!("{base}/jobs"))
                .header(HEADER_JOB_NAME, name.as_str())
                .header(HEADER_JOB_RUN_ID, run_id.as_str())
                .send()
                .await?;

            if res.status() == StatusCode::OK {
                println!("job {name} dispatched (run id {run_id})");
            } else {
                let reason = res
                    .headers()
                    .get(HEADER_JOB_ERR)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown error")
                    .to_string();
                eprintln!("Error: governor returned {}: {reason}", res.status());
                std::process::exit(1);
            }
        }
        Commands::Routes => get_json(&client, base, "/routes").await?,
        Commands::Configs => get_json(&client, base, "/configs").await?,
        Commands::Env => get_json(&client, base, "/debug/env").await?,
        Commands::BuildInfo => get_json(&client, base, "/build/info").await?,
        Commands::Metrics => {
            let res = client.get(format!("{base}/metrics")).send().await?;
            let status = res.status();
            let text = res.text().await?;
            if !status.is_success() {
                eprintln!("Error: governor returned status {status}: {text}");
                std::process::exit(1);
            }
            print!("{text}");
        }
    }

    Ok(())
}

async fn get_json(
    client: &reqwest::Client,
    base: &str,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let res = client.get(format!("{base}{path}")).send().await?;
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: governor returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("{}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
