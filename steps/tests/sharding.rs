//! Static and auto sharding scenarios against live nodes.

use waku_interop_steps::{
    common::wait_for_autoconnection,
    sharding::{ShardedRelay, Sharding, Topics, CONTENT_TOPIC, PUBSUB_TOPIC},
    Topology,
};

#[tokio::test]
#[ignore = "requires docker"]
async fn test_static_sharding_delivers_on_shard() {
    let mut relay = ShardedRelay::new(Topology::from_env().unwrap());
    relay
        .setup_main_relay_nodes(&Sharding::pubsub(&[PUBSUB_TOPIC]))
        .await
        .unwrap();
    relay
        .subscribe_main_relay_nodes(Topics::Pubsub(&[PUBSUB_TOPIC]))
        .await
        .unwrap();
    wait_for_autoconnection(relay.main_nodes(), None)
        .await
        .unwrap();

    let message = relay.create_message();
    relay
        .check_published_message_reaches_relay_peer(&message, None, Some(PUBSUB_TOPIC), None, None)
        .await
        .unwrap();
    relay.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_auto_sharding_delivers_on_content_topic() {
    let mut relay = ShardedRelay::new(Topology::from_env().unwrap());
    relay
        .setup_main_relay_nodes(&Sharding::content("2", &[CONTENT_TOPIC]))
        .await
        .unwrap();
    relay
        .subscribe_main_relay_nodes(Topics::Content(&[CONTENT_TOPIC]))
        .await
        .unwrap();
    wait_for_autoconnection(relay.main_nodes(), None)
        .await
        .unwrap();

    let message = relay.create_message();
    relay
        .check_published_message_reaches_relay_peer(&message, Some(CONTENT_TOPIC), None, None, None)
        .await
        .unwrap();
    relay.teardown().await.unwrap();
}
