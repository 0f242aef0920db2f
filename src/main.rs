//! agentloop 终端对话
//!
//! 入口：初始化日志、按配置构建对话门面，逐行读取输入并打印回复。
//! 命令：/new 开新会话，/history 查看当前会话，/stats 会话统计，/quit 退出；
//! 回复生成中按 Ctrl-C 取消本轮（已写入的检查点保留）。

use anyhow::Context;
use agentloop::agent::{new_session_id, ChatAgent};
use agentloop::config::{load_config, AppConfig};
use agentloop::memory::Message;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agentloop::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let agent = ChatAgent::from_config(&cfg).await?;
    let mut session_id = cfg.app.default_session_id.clone();
    tracing::info!(session_id = %session_id, model = %agent.model_name(), "agentloop ready");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await.context("read stdin")? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                session_id = new_session_id();
                println!("new session: {}", session_id);
                continue;
            }
            "/history" => {
                print_history(&agent, &session_id).await;
                continue;
            }
            "/stats" => {
                match agent.session_stats(&session_id).await {
                    Ok(Some(stats)) => println!("{}", serde_json::to_string_pretty(&stats)?),
                    Ok(None) => println!("(empty session)"),
                    Err(e) => eprintln!("error: {}", e),
                }
                continue;
            }
            _ => {}
        }

        let cancel = CancellationToken::new();
        let turn = agent.chat_with_cancel(input, &session_id, cancel.clone());
        tokio::pin!(turn);
        let result = tokio::select! {
            r = &mut turn => r,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                turn.await
            }
        };
        match result {
            Ok(reply) => {
                println!("{}", reply.response);
                if !reply.tools_used.is_empty() {
                    println!("  [tools: {}]", reply.tools_used.join(", "));
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    Ok(())
}

async fn print_history(agent: &ChatAgent, session_id: &str) {
    match agent.history(session_id).await {
        Ok(Some(state)) => {
            for m in state.messages() {
                match m {
                    Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                        let names: Vec<_> = tool_calls.iter().map(|c| c.name.as_str()).collect();
                        println!("assistant -> {}", names.join(", "));
                    }
                    Message::Tool(r) => {
                        let mark = if r.success { "ok" } else { "failed" };
                        println!("tool[{}] {}: {}", r.name, mark, r.content);
                    }
                    other => println!("{}: {}", other.role().as_str(), other.text().unwrap_or("")),
                }
            }
        }
        Ok(None) => println!("(empty session)"),
        Err(e) => eprintln!("error: {}", e),
    }
}
