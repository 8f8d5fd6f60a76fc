//! Filter scenarios against live nodes.

use uuid::Uuid;
use waku_interop_steps::{
    filter::{subscription, Filter, CONTENT_TOPIC, PUBSUB_TOPIC, SECOND_CONTENT_TOPIC},
    Phase, Topology,
};

async fn setup() -> Filter {
    let filter = Filter::setup(Topology::from_env().unwrap()).await.unwrap();
    assert_eq!(filter.topology().phase(), Phase::Ready);
    filter
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_subscribed_client_receives_message() {
    let filter = setup().await;
    let message = filter.create_message();
    filter
        .check_published_message_reaches_filter_peer(&message, None)
        .await
        .unwrap();
    filter.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_unsubscribed_content_topic_is_not_delivered() {
    let filter = setup().await;
    let mut message = filter.create_message();
    message.content_topic = SECOND_CONTENT_TOPIC.to_string();
    filter
        .check_publish_without_filter_subscription(&message, None)
        .await
        .unwrap();
    filter.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_unsubscribe_stops_delivery() {
    let filter = setup().await;
    let request_id = Uuid::new_v4().to_string();
    filter
        .delete_filter_subscription(
            &subscription(&request_id, &[CONTENT_TOPIC], PUBSUB_TOPIC),
            None,
            None,
        )
        .await
        .unwrap();
    filter
        .check_publish_without_filter_subscription(&filter.create_message(), None)
        .await
        .unwrap();
    filter.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_ping_with_and_without_subscription() {
    let filter = setup().await;
    let request_id = Uuid::new_v4().to_string();
    filter
        .ping_filter_subscriptions(&request_id, None)
        .await
        .unwrap();

    let request_id = Uuid::new_v4().to_string();
    filter
        .delete_all_filter_subscriptions(&serde_json::json!({ "requestId": request_id }), None)
        .await
        .unwrap();
    filter.ping_without_filter_subscription(None).await.unwrap();
    filter.teardown().await.unwrap();
}
