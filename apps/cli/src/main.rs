use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use watchbridge_core_sdk::bridge::Bridge;
use watchbridge_core_sdk::db::SqliteSettingsStore;
use watchbridge_core_sdk::llm::HttpTransport;
use watchbridge_core_sdk::models::InboundPayload;
use watchbridge_core_sdk::settings::{self, Settings};
use watchbridge_core_sdk::{server, telemetry};

/**
 * \brief CLI 程序入口：在终端模拟手表事件，或启动本地设备通道。
 */
#[derive(Parser, Debug)]
#[command(name = "watchbridge", version, about = "Watch-to-LLM bridge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 直接写入设置（整体覆盖）。
     * \param provider Provider 标识：claude / openai / gemini / grok
     * \param api_key  API Key
     */
    Init {
        #[arg(long, default_value = "claude")]
        provider: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        system_message: Option<String>,
        #[arg(long, default_value_t = false)]
        web_search: bool,
        /** \brief MCP 服务器 JSON 数组原文 */
        #[arg(long)]
        mcp_servers: Option<String>,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /**
     * \brief 模拟配置页关闭：传入配置页回传的原始字符串。
     */
    Configure {
        #[arg(long)]
        response: String,
    },

    /**
     * \brief 模拟手表提问（QUESTION）。
     */
    Ask {
        #[arg(long)]
        question: String,
    },

    /**
     * \brief 模拟手表发送编码对话（CHAT），如 "[U]Hello[A]Hi[U]How are you?"。
     */
    Chat {
        #[arg(long)]
        transcript: String,
    },

    /** \brief 显示当前设置，API Key 打码。 */
    Status,

    /** \brief 打印配置页地址。 */
    ConfigUrl,

    /** \brief 清空设置。 */
    Reset,

    /**
     * \brief 启动本地 HTTP 服务，作为手表的设备通道。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[derive(Serialize, Debug)]
struct StatusView {
    provider: String,
    ready: bool,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    system_message: Option<String>,
    web_search_enabled: bool,
    mcp_servers: Option<String>,
    telemetry_enabled: bool,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value).context("encode output failed")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store = Arc::new(SqliteSettingsStore::open_default().context("open database failed")?);
    let telemetry_enabled = store.telemetry_enabled().unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    let transport = Arc::new(HttpTransport::from_env().context("build http client failed")?);
    let bridge = Bridge::new(store.clone(), transport);

    match cli.command {
        Commands::Init {
            provider,
            api_key,
            base_url,
            model,
            system_message,
            web_search,
            mcp_servers,
            enable_telemetry,
        } => {
            let snapshot = Settings {
                provider: Some(provider),
                api_key: Some(api_key),
                base_url,
                model,
                system_message,
                web_search_enabled: web_search,
                mcp_servers,
            };
            settings::save(store.as_ref(), &snapshot).context("save settings failed")?;
            store
                .set_telemetry_enabled(enable_telemetry)
                .context("save telemetry failed")?;
            telemetry::set_enabled(enable_telemetry);
            telemetry::log_event(
                "cli.init",
                &format!(
                    "provider={} api_key={}",
                    snapshot.provider_id(),
                    snapshot.api_key().map(telemetry::mask_secret).unwrap_or_default()
                ),
            );
            println!(
                "Saved settings (provider={} | web_search={})",
                snapshot.provider_id(),
                snapshot.web_search_enabled
            );
        }
        Commands::Configure { response } => {
            for message in bridge.on_configuration_closed(&response) {
                print_json(&message)?;
            }
        }
        Commands::Ask { question } => {
            let payload = InboundPayload {
                question: Some(question),
                chat: None,
            };
            if let Some(reply) = bridge.on_message(&payload).await {
                print_json(&reply)?;
            }
        }
        Commands::Chat { transcript } => {
            let payload = InboundPayload {
                question: None,
                chat: Some(transcript),
            };
            if let Some(reply) = bridge.on_message(&payload).await {
                print_json(&reply)?;
            }
        }
        Commands::Status => {
            let current = settings::load(store.as_ref()).context("load settings failed")?;
            print_json(&StatusView {
                provider: current.provider_id().to_string(),
                ready: current.has_api_key(),
                api_key: current.api_key().map(telemetry::mask_secret),
                base_url: current.base_url.clone(),
                model: current.model.clone(),
                system_message: current.system_message.clone(),
                web_search_enabled: current.web_search_enabled,
                mcp_servers: current.mcp_servers.clone(),
                telemetry_enabled,
            })?;
        }
        Commands::ConfigUrl => {
            println!("{}", bridge.configuration_url());
        }
        Commands::Reset => {
            bridge.reset().context("reset settings failed")?;
            print_json(&bridge.on_ready())?;
        }
        Commands::Serve { addr } => {
            server::run(&addr, bridge).await?;
        }
    }

    Ok(())
}
