use std::time::Duration;

use hub_rpc::protocol::ResponseMessage;
use hub_rpc::{
    // ---
    create_memory_transport,
    init_logging,
    ChannelEvent,
    ClientConfig,
    HubClient,
    LogLevel,
    OutboundMessage,
    RequestOptions,
    Result,
    TransportConfig,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// A slow service answers after the caller gave up. The caller opted in to
/// late replies, so the answer still reaches its observer.
#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let config = ClientConfig::memory("impatient")
        .with_request_timeout(Duration::from_millis(100))
        .with_log_level(LogLevel::Info);
    init_logging(config.log_level);

    // The slow service is a bare transport so the demo controls reply timing.
    let slow = create_memory_transport(TransportConfig {
        hub_url: "memory://".into(),
        service_name: "slow".into(),
    })
    .await?;
    let mut inbox = slow.connect().await?.inbox;

    let responder = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            if let ChannelEvent::Request(req) = event {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let reply = ResponseMessage::ok(req.id, json!({"report": "ready"}));
                if let Err(err) = slow.emit(OutboundMessage::Response(reply)).await {
                    eprintln!("slow: reply failed: {err}");
                }
                break;
            }
        }
    });

    let client = HubClient::connect(&config).await?;

    let (tx, rx) = oneshot::channel();
    let options = RequestOptions::new()
        .allow_late_response()
        .on_late_response(move |late| {
            let _ = tx.send(late);
        });

    match client
        .send_request_with::<_, Value>("slow", "report", json!({"id": 7}), options)
        .await
    {
        Ok(resp) => println!("answered in time: {resp}"),
        Err(err) => println!("gave up: {err}"),
    }
    println!("timed-out calls still tracked: {}", client.timed_out_count());

    match tokio::time::timeout(Duration::from_secs(1), rx).await {
        Ok(Ok(Ok(late))) => println!(
            "late reply {} for request {}",
            late.response, late.original_payload.id
        ),
        Ok(Ok(Err(body))) => println!("late error {}: {}", body.code, body.message),
        _ => println!("no late reply"),
    }

    let _ = responder.await;
    client.shutdown().await;
    Ok(())
}
