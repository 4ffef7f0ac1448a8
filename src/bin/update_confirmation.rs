//! Set or inspect the Callback API confirmation code of a running bot.
//!
//! Usage:
//!   update_confirmation <code> [base_url]
//!   update_confirmation --status [base_url]

use serde_json::Value;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

fn usage(program: &str) {
    eprintln!("Usage: {program} <code> [base_url]");
    eprintln!("       {program} --status [base_url]");
    eprintln!();
    eprintln!("Update or inspect the VK Callback API confirmation code.");
    eprintln!("base_url defaults to {DEFAULT_BASE_URL}");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {program} 9a624bd2");
    eprintln!("  {program} --status https://bot.example.org");
}

async fn fetch_json(url: &str) -> Result<Value, String> {
    let response = reqwest::get(url).await.map_err(|e| {
        if e.is_connect() {
            "could not connect to the bot, is it running?".to_string()
        } else {
            format!("request failed: {e}")
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("server answered {status}: {body}"));
    }

    response
        .json()
        .await
        .map_err(|e| format!("failed to parse response: {e}"))
}

async fn update_code(base_url: &str, code: &str) -> Result<(), String> {
    println!("🔄 Updating confirmation code: {code}");
    let json = fetch_json(&format!("{base_url}/update_confirmation/{code}")).await?;
    println!(
        "✅ Confirmation code updated: {}",
        json["code"].as_str().unwrap_or(code)
    );
    Ok(())
}

async fn show_status(base_url: &str) -> Result<(), String> {
    let json = fetch_json(&format!("{base_url}/confirmation_status")).await?;
    let pretty = serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?;
    println!("📊 Confirmation code status:");
    println!("{pretty}");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("update_confirmation");

    if args.len() < 2 || args.len() > 3 {
        usage(program);
        std::process::exit(1);
    }

    let base_url = args
        .get(2)
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let result = match args[1].as_str() {
        "--status" | "status" => show_status(&base_url).await,
        flag if flag.starts_with('-') => {
            usage(program);
            std::process::exit(1);
        }
        code => update_code(&base_url, code).await,
    };

    if let Err(e) = result {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
}
