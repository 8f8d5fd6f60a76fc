//! Light push scenarios against live nodes.

use waku_interop_steps::{
    light_push::{LightPush, PUBSUB_TOPIC},
    Topology,
};

#[tokio::test]
#[ignore = "requires docker"]
async fn test_light_pushed_message_reaches_receiver() {
    let light_push = LightPush::setup(Topology::from_env().unwrap())
        .await
        .unwrap();
    let message = light_push.create_message();
    light_push
        .check_light_pushed_message_reaches_receiving_peer(&message, None)
        .await
        .unwrap();
    light_push.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_light_push_through_two_receivers() {
    let mut light_push = LightPush::setup(Topology::from_env().unwrap())
        .await
        .unwrap();
    let receiver = light_push
        .setup_second_receiving_node(Default::default())
        .await
        .unwrap();
    light_push
        .subscribe_to_pubsub_topics_via_relay(Some(receiver.as_ref()), Some(&[PUBSUB_TOPIC][..]))
        .await
        .unwrap();
    let message = light_push.create_message();
    light_push
        .check_light_pushed_message_reaches_receiving_peer(&message, None)
        .await
        .unwrap();
    light_push.teardown().await.unwrap();
}
