//! Event subscriptions that chain the saga steps
//!
//! | Event                      | Step                      |
//! |----------------------------|---------------------------|
//! | `BackupRequestAccepted`    | `ReceiveBackupRequest`    |
//! | `BackupRequestReceived`    | `CheckAllowed`            |
//! | `BackupRequestAllowed`     | `SendToInterface`         |
//! | `StoreStatusReplyReceived` | `ReceiveStoreStatusReply` |

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    BackupRequestSaga, CheckAllowed, ReceiveBackupRequest, ReceiveStoreStatusReply,
    SendToInterface,
};
use crate::domain::events::{
    BackupRequestAccepted, BackupRequestAllowed, BackupRequestReceived, Event, EventEnvelope,
    StoreStatusReplyReceived,
};
use crate::event_bus::{EventBus, EventHandler};
use crate::{CoreError, CoreResult};

/// A saga step that runs when an event of type `E` is delivered
#[async_trait]
pub trait SagaStep<E: Event>: Send + Sync {
    /// Run the step for one event
    async fn on_event(&self, event: E) -> CoreResult<()>;
}

#[async_trait]
impl SagaStep<BackupRequestAccepted> for ReceiveBackupRequest {
    async fn on_event(&self, event: BackupRequestAccepted) -> CoreResult<()> {
        self.execute(event).await.map(|_| ())
    }
}

#[async_trait]
impl SagaStep<BackupRequestReceived> for CheckAllowed {
    async fn on_event(&self, event: BackupRequestReceived) -> CoreResult<()> {
        self.execute(&event.backup_request_id).await.map(|_| ())
    }
}

#[async_trait]
impl SagaStep<BackupRequestAllowed> for SendToInterface {
    async fn on_event(&self, event: BackupRequestAllowed) -> CoreResult<()> {
        self.execute(&event.backup_request_id).await.map(|_| ())
    }
}

#[async_trait]
impl SagaStep<StoreStatusReplyReceived> for ReceiveStoreStatusReply {
    async fn on_event(&self, event: StoreStatusReplyReceived) -> CoreResult<()> {
        self.execute(event.reply).await.map(|_| ())
    }
}

/// Decodes the envelope and forwards it to a step
struct StepHandler<E, S> {
    step: Arc<S>,
    _event: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E, S> EventHandler for StepHandler<E, S>
where
    E: Event + 'static,
    S: SagaStep<E> + 'static,
{
    async fn handle(&self, envelope: EventEnvelope) -> CoreResult<()> {
        let event = envelope
            .decode::<E>()
            .map_err(|e| CoreError::Unrecoverable(e.to_string()))?;
        self.step.on_event(event).await
    }
}

/// Subscribe one step to its event type
pub fn subscribe_step<E, S>(bus: &dyn EventBus, step: Arc<S>)
where
    E: Event + 'static,
    S: SagaStep<E> + 'static,
{
    bus.subscribe(
        E::EVENT_TYPE,
        Arc::new(StepHandler::<E, S> {
            step,
            _event: PhantomData,
        }),
    );
}

/// Subscribe every step of the saga
pub fn subscribe_saga(bus: &dyn EventBus, saga: &BackupRequestSaga) {
    subscribe_step::<BackupRequestAccepted, _>(bus, saga.receive.clone());
    subscribe_step::<BackupRequestReceived, _>(bus, saga.check_allowed.clone());
    subscribe_step::<BackupRequestAllowed, _>(bus, saga.send_to_interface.clone());
    subscribe_step::<StoreStatusReplyReceived, _>(bus, saga.receive_store_status_reply.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::MemoryEventBus;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl SagaStep<BackupRequestReceived> for Recorder {
        async fn on_event(&self, event: BackupRequestReceived) -> CoreResult<()> {
            self.0.lock().push(event.backup_request_id.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_step_receives_decoded_event() {
        let bus = MemoryEventBus::new();
        let recorder = Arc::new(Recorder::default());
        subscribe_step::<BackupRequestReceived, _>(&bus, recorder.clone());

        crate::event_bus::publish(
            &bus,
            &BackupRequestReceived::new(crate::BackupRequestId("r1".to_string())),
        )
        .await
        .unwrap();

        assert_eq!(*recorder.0.lock(), vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_mismatched_payload_is_unrecoverable() {
        let handler = StepHandler::<BackupRequestReceived, Recorder> {
            step: Arc::new(Recorder::default()),
            _event: PhantomData,
        };
        let mut envelope =
            EventEnvelope::wrap(&BackupRequestReceived::new(crate::BackupRequestId("r1".to_string()))).unwrap();
        envelope.event_data = serde_json::json!({ "unexpected": true });

        let err = handler.handle(envelope).await.unwrap_err();
        assert!(matches!(err, CoreError::Unrecoverable(_)));
    }
}
