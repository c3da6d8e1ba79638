//! `agtdash exec` and `agtdash model`: the command path.

use agtdash_client::ClientConfig;
use agtdash_client::clock::SessionClock;
use agtdash_client::data_access::{DataAccess, ExecuteReceipt};

/// Entry point for `agtdash exec`.
pub async fn cmd_exec(config: &ClientConfig, words: &[String], json: bool) -> anyhow::Result<()> {
    let data = DataAccess::from_config(config, SessionClock::start())?;
    let receipt = data.execute_task(words.join(" ")).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        println!("{}", receipt_line(&receipt));
    }
    Ok(())
}

/// Entry point for `agtdash model`.
pub async fn cmd_model(config: &ClientConfig, name: &str) -> anyhow::Result<()> {
    let data = DataAccess::from_config(config, SessionClock::start())?;
    let message = data.set_model(name).await?;
    println!("{message}");
    Ok(())
}

fn receipt_line(receipt: &ExecuteReceipt) -> String {
    let mut line = receipt
        .message
        .clone()
        .unwrap_or_else(|| "Task submitted".to_string());
    if let Some(model) = &receipt.model {
        line.push_str(&format!(" (model {model})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_with_message_and_model() {
        let receipt = ExecuteReceipt {
            message: Some("Task queued".into()),
            task: Some("build".into()),
            model: Some("gpt-4o".into()),
        };
        assert_eq!(receipt_line(&receipt), "Task queued (model gpt-4o)");
    }

    #[test]
    fn empty_receipt_has_default_line() {
        assert_eq!(receipt_line(&ExecuteReceipt::default()), "Task submitted");
    }
}
