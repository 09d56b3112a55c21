//! `AgentActor`: serializes lifecycle events onto the engine
//!
//! The mailbox delivers one message at a time, so a reconcile pass always
//! runs to completion before the next event is looked at.

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::{ActorStopReason, SendError};
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tracing::{error, info};

use crate::config::DesiredConfig;
use crate::engine::{Engine, Trigger};
use crate::error::CoreError;
use crate::message::{
    AgentStatus, ConfigChanged, FirstActivation, GetStatus, PeerCredentialsAvailable,
    PeerDeparted, ReconcileReport, RegisterAction, UnregisterAction, UpgradeAction,
};

/// Arguments for spawning an `AgentActor`
pub struct AgentActorArgs {
    /// Engine with an opened state store
    pub engine: Engine,
    /// Declared configuration at startup
    pub desired: DesiredConfig,
}

/// Owns the engine and the current declared configuration
pub struct AgentActor {
    engine: Engine,
    desired: DesiredConfig,
}

impl AgentActor {
    async fn run(&mut self, trigger: Trigger) -> Result<ReconcileReport, CoreError> {
        let result = self.engine.reconcile(trigger, &self.desired).await;
        if let Err(e) = &result {
            error!(host = %self.engine.host_name(), error = %e, "reconcile failed");
        }
        result
    }
}

impl Actor for AgentActor {
    type Args = AgentActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        args.desired.validate()?;
        info!(host = %args.engine.host_name(), id = %actor_ref.id(), "AgentActor starting");

        Ok(Self {
            engine: args.engine,
            desired: args.desired,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(host = %self.engine.host_name(), reason = ?reason, "AgentActor stopping");
        Ok(())
    }
}

/// Unwrap the handler's own error from a failed `ask`
///
/// # Errors
/// Returns the handler error as is, or `CoreError::ActorError` if the message
/// never reached a handler
pub fn reply<M, T>(result: Result<T, SendError<M, CoreError>>) -> Result<T, CoreError> {
    match result {
        Ok(value) => Ok(value),
        Err(SendError::HandlerError(e)) => Err(e),
        Err(_) => Err(CoreError::ActorError("agent actor is not running".to_string())),
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<FirstActivation> for AgentActor {
    type Reply = Result<ReconcileReport, CoreError>;

    async fn handle(
        &mut self,
        _msg: FirstActivation,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.run(Trigger::FirstActivation).await
    }
}

impl Message<ConfigChanged> for AgentActor {
    type Reply = Result<ReconcileReport, CoreError>;

    async fn handle(
        &mut self,
        msg: ConfigChanged,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        msg.desired.validate()?;
        self.desired = msg.desired;
        self.run(Trigger::ConfigChanged).await
    }
}

impl Message<PeerCredentialsAvailable> for AgentActor {
    type Reply = Result<ReconcileReport, CoreError>;

    async fn handle(
        &mut self,
        msg: PeerCredentialsAvailable,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.run(Trigger::PeerCredentialsAvailable {
            uri: msg.uri,
            token: msg.token,
        })
        .await
    }
}

impl Message<PeerDeparted> for AgentActor {
    type Reply = Result<ReconcileReport, CoreError>;

    async fn handle(
        &mut self,
        _msg: PeerDeparted,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.run(Trigger::PeerDeparted).await
    }
}

impl Message<RegisterAction> for AgentActor {
    type Reply = Result<ReconcileReport, CoreError>;

    async fn handle(
        &mut self,
        _msg: RegisterAction,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.run(Trigger::ManualRegister).await
    }
}

impl Message<UnregisterAction> for AgentActor {
    type Reply = Result<ReconcileReport, CoreError>;

    async fn handle(
        &mut self,
        _msg: UnregisterAction,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.run(Trigger::ManualUnregister).await
    }
}

impl Message<UpgradeAction> for AgentActor {
    type Reply = Result<ReconcileReport, CoreError>;

    async fn handle(
        &mut self,
        _msg: UpgradeAction,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.run(Trigger::Upgrade).await
    }
}

impl Message<GetStatus> for AgentActor {
    type Reply = Result<AgentStatus, CoreError>;

    async fn handle(
        &mut self,
        _msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.engine.snapshot()
    }
}
