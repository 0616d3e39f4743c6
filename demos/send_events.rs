use std::sync::Arc;

use ld_common::{
    Context, EventSender, EventSenderConfig, InMemoryStorage, ReqwestPlatform,
    TransientContextProcessor,
};
use serde_json::json;

#[tokio::main]
pub async fn main() -> ld_common::Result<()> {
    env_logger::init();

    let environment_id = std::env::var("LD_ENVIRONMENT_ID").unwrap();
    let config = EventSenderConfig::from_environment_id(&environment_id);

    // Give the anonymous user a stable key.
    let processor = TransientContextProcessor::new(Arc::new(InMemoryStorage::new()));
    let context: Context = serde_json::from_value(json!({"kind": "user", "anonymous": true}))?;
    let context = processor.process_context(Some(&context)).await?;

    let sender = EventSender::new(Arc::new(ReqwestPlatform::new()?), &config);
    let events = vec![json!({
        "kind": "identify",
        "creationDate": chrono::Utc::now().timestamp_millis(),
        "context": context,
    })];

    let url = format!(
        "{}/events/bulk/{}",
        EventSenderConfig::DEFAULT_EVENTS_URL,
        environment_id
    );
    let results = sender.send_events(&events, &url).await;

    println!("Results: {:?}", results);
    Ok(())
}
