// Deprovisioning and shared-resource cleanup through the broker facade

mod fixtures;

use application_broker::broker::{
    BrokerError, DeprovisionRequest, LastOperationRequest, ProvisionRequest,
};
use application_broker::model::{
    InstanceId, Namespace, OperationState, OperationType, DEPROVISIONING_SUCCEEDED,
};
use application_broker::storage::InstanceStorage;
use fixtures::{BrokerHarness, PLAN_ID, SERVICE_ID};
use std::time::Duration;

async fn provisioned(harness: &BrokerHarness, req: &ProvisionRequest) {
    harness.broker.provision(req).await.unwrap();
    harness.settle().await;
    assert!(harness.broker.state().is_provisioned(&req.instance_id).await.unwrap());
}

async fn last_state(harness: &BrokerHarness, instance_id: &str) -> OperationState {
    harness
        .broker
        .last_operation(&LastOperationRequest {
            instance_id: instance_id.into(),
            operation_key: None,
        })
        .await
        .unwrap()
        .state
}

#[tokio::test]
async fn test_deprovision_removes_instance_and_event_activation() {
    let harness = BrokerHarness::builder().build();
    harness.grant("ns-a").await;
    provisioned(&harness, &ProvisionRequest::new("I1", SERVICE_ID, PLAN_ID, "ns-a")).await;

    let resp = harness
        .broker
        .deprovision(&DeprovisionRequest::new("I1", SERVICE_ID, PLAN_ID))
        .await
        .unwrap();
    assert!(resp.is_async);
    harness.settle().await;

    let last = harness
        .broker
        .last_operation(&LastOperationRequest {
            instance_id: "I1".into(),
            operation_key: resp.operation_key,
        })
        .await
        .unwrap();
    assert_eq!(last.state, OperationState::Succeeded);
    assert_eq!(last.description.as_deref(), Some(DEPROVISIONING_SUCCEEDED));

    assert!(harness
        .instances
        .get(&InstanceId::from("I1"))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(harness.event_activations.list(&Namespace::from("ns-a")).await.is_empty());
    assert!(harness.eventing.subscriptions().await.is_empty());

    // The log keeps the create and remove entries
    let kinds: Vec<OperationType> = harness.history("I1").await.iter().map(|op| op.op_type).collect();
    assert_eq!(kinds, vec![OperationType::Create, OperationType::Remove]);
}

#[tokio::test]
async fn test_event_activation_kept_until_last_instance_of_kind() {
    let harness = BrokerHarness::builder().api_packages(true).build();
    harness.grant("ns-a").await;
    for id in ["I1", "I2"] {
        provisioned(&harness, &ProvisionRequest::new(id, "class-1", SERVICE_ID, "ns-a")).await;
    }
    assert_eq!(harness.credentials.len().await, 2);

    harness
        .broker
        .deprovision(&DeprovisionRequest::new("I1", "class-1", SERVICE_ID))
        .await
        .unwrap();
    harness.settle().await;
    assert_eq!(last_state(&harness, "I1").await, OperationState::Succeeded);
    assert_eq!(harness.event_activations.list(&Namespace::from("ns-a")).await.len(), 1);
    assert_eq!(harness.credentials.len().await, 1);

    harness
        .broker
        .deprovision(&DeprovisionRequest::new("I2", "class-1", SERVICE_ID))
        .await
        .unwrap();
    harness.settle().await;
    assert_eq!(last_state(&harness, "I2").await, OperationState::Succeeded);
    assert!(harness.event_activations.list(&Namespace::from("ns-a")).await.is_empty());
    assert!(harness.credentials.is_empty().await);
}

#[tokio::test]
async fn test_repeated_deprovision_is_synchronous() {
    let harness = BrokerHarness::builder().build();
    harness.grant("ns-a").await;
    provisioned(&harness, &ProvisionRequest::new("I1", SERVICE_ID, PLAN_ID, "ns-a")).await;

    let req = DeprovisionRequest::new("I1", SERVICE_ID, PLAN_ID);
    harness.broker.deprovision(&req).await.unwrap();
    harness.settle().await;
    let before = harness.history("I1").await;

    let again = harness.broker.deprovision(&req).await.unwrap();
    assert!(!again.is_async);
    assert_eq!(again.operation_key, None);
    assert_eq!(harness.history("I1").await, before);
}

#[tokio::test]
async fn test_deprovision_of_unknown_instance() {
    let harness = BrokerHarness::builder().build();

    let err = harness
        .broker
        .deprovision(&DeprovisionRequest::new("missing", SERVICE_ID, PLAN_ID))
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::InstanceNotFound { .. }));
    assert!(harness.history("missing").await.is_empty());
}

#[tokio::test]
async fn test_reprovision_after_deprovision() {
    let harness = BrokerHarness::builder().build();
    harness.grant("ns-a").await;
    let req = ProvisionRequest::new("I1", SERVICE_ID, PLAN_ID, "ns-a");
    provisioned(&harness, &req).await;

    harness
        .broker
        .deprovision(&DeprovisionRequest::new("I1", SERVICE_ID, PLAN_ID))
        .await
        .unwrap();
    harness.settle().await;
    assert!(!harness.broker.state().is_provisioned(&"I1".into()).await.unwrap());

    let resp = harness.broker.provision(&req).await.unwrap();
    assert!(resp.is_async);
    harness.settle().await;
    assert_eq!(last_state(&harness, "I1").await, OperationState::Succeeded);
    assert_eq!(harness.event_activations.list(&Namespace::from("ns-a")).await.len(), 1);
}

#[tokio::test]
async fn test_deprovision_refused_while_provisioning_runs() {
    let harness = BrokerHarness::builder()
        .api_packages(true)
        .max_wait(Duration::from_secs(5))
        .build();

    // No mapping yet: the create stays in progress
    let req = ProvisionRequest::new("I1", "class-1", SERVICE_ID, "ns-a");
    let accepted = harness.broker.provision(&req).await.unwrap();

    let err = harness
        .broker
        .deprovision(&DeprovisionRequest::new("I1", "class-1", SERVICE_ID))
        .await
        .unwrap_err();
    match err {
        BrokerError::ProvisioningInProgress { operation_id, .. } => {
            assert_eq!(Some(operation_id), accepted.operation_key)
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.history("I1").await.len(), 1);

    harness.grant("ns-a").await;
    harness.settle().await;
    assert_eq!(last_state(&harness, "I1").await, OperationState::Succeeded);
    assert_eq!(harness.event_activations.list(&Namespace::from("ns-a")).await.len(), 1);
    assert_eq!(harness.credentials.len().await, 1);

    // Once the create is done the instance can go, with everything it created
    harness
        .broker
        .deprovision(&DeprovisionRequest::new("I1", "class-1", SERVICE_ID))
        .await
        .unwrap();
    harness.settle().await;
    assert_eq!(last_state(&harness, "I1").await, OperationState::Succeeded);
    assert!(harness.event_activations.list(&Namespace::from("ns-a")).await.is_empty());
    assert!(harness.credentials.is_empty().await);
    assert!(harness.eventing.subscriptions().await.is_empty());
}

#[tokio::test]
async fn test_subscription_survives_until_last_instance_of_kind() {
    let harness = BrokerHarness::builder().api_packages(true).build();
    harness.grant("ns-a").await;
    for id in ["I1", "I2"] {
        provisioned(&harness, &ProvisionRequest::new(id, "class-1", SERVICE_ID, "ns-a")).await;
    }
    // Both instances share one subscription for the namespace
    assert_eq!(harness.eventing.subscriptions().await.len(), 1);

    harness
        .broker
        .deprovision(&DeprovisionRequest::new("I1", "class-1", SERVICE_ID))
        .await
        .unwrap();
    harness.settle().await;
    assert_eq!(harness.eventing.subscriptions().await.len(), 1);

    harness
        .broker
        .deprovision(&DeprovisionRequest::new("I2", "class-1", SERVICE_ID))
        .await
        .unwrap();
    harness.settle().await;
    assert!(harness.eventing.subscriptions().await.is_empty());
}
