use std::time::Duration;

use hub_rpc::{init_logging, ClientConfig, HubClient, LogLevel, Result, RpcError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Ping {
    n: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Pong {
    n: u64,
}

/// Two services on the in-process hub: `pong` answers `ping`, and a third
/// client takes the `pong` name a second time to show the hub rejecting it.
#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let config = ClientConfig::memory("pong")
        .with_heartbeat_interval(Duration::from_secs(1))
        .with_log_level(LogLevel::Info);
    init_logging(config.log_level);

    let pong = HubClient::connect(&config).await?;
    pong.on_request("ping", |req: Ping| Ok::<_, String>(Pong { n: req.n + 1 }));
    pong.on_request("explode", |_: Ping| Err::<Pong, _>("explode handler always fails"));

    let ping = HubClient::connect(&ClientConfig::memory("ping")).await?;

    for n in 0..3 {
        let resp: Pong = ping.send_request("pong", "ping", Ping { n }).await?;
        println!("ping {n} -> pong {}", resp.n);
    }

    match ping.send_request::<_, Pong>("pong", "explode", Ping { n: 0 }).await {
        Err(err) => println!("explode -> {err}"),
        Ok(resp) => println!("explode unexpectedly answered {resp:?}"),
    }

    match ping.send_request::<_, Pong>("pong", "missing", Ping { n: 0 }).await {
        Err(err) => println!("missing -> {err}"),
        Ok(resp) => println!("missing unexpectedly answered {resp:?}"),
    }

    let impostor = HubClient::connect(&ClientConfig::memory("pong")).await?;
    match impostor.closed().await {
        Err(RpcError::DuplicateService(name)) => println!("second '{name}' rejected by hub"),
        other => println!("impostor closed with {other:?}"),
    }

    ping.shutdown().await;
    pong.shutdown().await;
    Ok(())
}
