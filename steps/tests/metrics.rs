//! Metrics scenarios against live nodes.

use waku_interop_node::{Capability, Message};
use waku_interop_steps::{
    metrics::{check_metric, wait_for_metric},
    relay::{Relay, CONTENT_TOPIC, PAYLOAD},
    Topology,
};

#[tokio::test]
#[ignore = "requires docker"]
async fn test_metrics_after_relay_publish() {
    let relay = Relay::setup(Topology::from_env().unwrap()).await.unwrap();
    let message = Message::new(PAYLOAD, CONTENT_TOPIC);
    relay
        .node1
        .send_relay_message(&message, &relay.pubsub_topic)
        .await
        .unwrap();
    relay
        .node2
        .get_relay_messages(&relay.pubsub_topic)
        .await
        .unwrap();

    for node in relay.nodes() {
        if !node.supports(Capability::Metrics) {
            continue;
        }
        wait_for_metric(&node, "libp2p_peers", 1.0, None)
            .await
            .unwrap();
        check_metric(&node, "libp2p_pubsub_topics", 1.0)
            .await
            .unwrap();
        check_metric(&node, "waku_peer_store_size", 1.0)
            .await
            .unwrap();
    }
    relay.teardown().await.unwrap();
}
