//! Orchestration Facade (spec.md §4.6).
//!
//! Public entry points `send`, `publish`, `send_batch`, `publish_batch`,
//! `enqueue`, plus lifecycle `start`/`stop` for the background outbox and
//! inbox processors. The facade owns the registry, the per-type pipelines
//! built by [`crate::pipeline::PipelineBuilder`], and the background
//! processors; it is the only thing that starts or stops them.

use crate::context::{ProcessingContext, ProcessingResult};
use crate::error::{ErrorInfo, ErrorKind, HeroMessagingError};
use crate::inbox::{InboxProcessor, InboxProcessorHandle};
use crate::message::{Command, Envelope, Event, Query};
use crate::outbox::{OutboxProcessor, OutboxProcessorHandle};
use crate::pipeline::Processor;
use crate::registry::Registry;
use crate::time::TimeProvider;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Terminal processor adapter that hands a command off to the registry.
/// Constructed once per command type and installed as the innermost
/// processor when building that type's pipeline.
pub struct TerminalCommandProcessor<C: Command> {
    registry: Arc<Registry>,
    time_provider: Arc<dyn TimeProvider>,
    _marker: std::marker::PhantomData<C>,
}

impl<C: Command> TerminalCommandProcessor<C> {
    pub fn new(registry: Arc<Registry>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            registry,
            time_provider,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<C: Command> Processor<C, C::Response> for TerminalCommandProcessor<C> {
    async fn process(
        &self,
        envelope: &Envelope<C>,
        _context: ProcessingContext,
        _cancellation: &CancellationToken,
    ) -> ProcessingResult<C::Response> {
        let start = self.time_provider.now();
        let time_provider = &self.time_provider;
        match self
            .registry
            .send_command(&envelope.payload, || time_provider.elapsed(start))
            .await
        {
            Ok(response) => ProcessingResult::with_response(response),
            Err(err) => ProcessingResult::failed(ErrorInfo::new(ErrorKind::HandlerError, err.to_string()), "handler failed"),
        }
    }
}

pub struct TerminalQueryProcessor<Q: Query> {
    registry: Arc<Registry>,
    time_provider: Arc<dyn TimeProvider>,
    _marker: std::marker::PhantomData<Q>,
}

impl<Q: Query> TerminalQueryProcessor<Q> {
    pub fn new(registry: Arc<Registry>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            registry,
            time_provider,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<Q: Query> Processor<Q, Q::Response> for TerminalQueryProcessor<Q> {
    async fn process(
        &self,
        envelope: &Envelope<Q>,
        _context: ProcessingContext,
        _cancellation: &CancellationToken,
    ) -> ProcessingResult<Q::Response> {
        let start = self.time_provider.now();
        let time_provider = &self.time_provider;
        match self
            .registry
            .send_query(&envelope.payload, || time_provider.elapsed(start))
            .await
        {
            Ok(response) => ProcessingResult::with_response(response),
            Err(err) => ProcessingResult::failed(ErrorInfo::new(ErrorKind::HandlerError, err.to_string()), "handler failed"),
        }
    }
}

pub struct TerminalEventProcessor<E: Event> {
    registry: Arc<Registry>,
    time_provider: Arc<dyn TimeProvider>,
    _marker: std::marker::PhantomData<E>,
}

impl<E: Event> TerminalEventProcessor<E> {
    pub fn new(registry: Arc<Registry>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            registry,
            time_provider,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<E: Event> Processor<E, ()> for TerminalEventProcessor<E> {
    async fn process(
        &self,
        envelope: &Envelope<E>,
        _context: ProcessingContext,
        _cancellation: &CancellationToken,
    ) -> ProcessingResult<()> {
        let start = self.time_provider.now();
        let time_provider = &self.time_provider;
        self.registry.publish_event(&envelope.payload, || time_provider.elapsed(start)).await
    }
}

struct ProcessorLifecycle {
    outbox: Option<Arc<OutboxProcessor>>,
    outbox_handle: Option<OutboxProcessorHandle>,
    inbox: Option<Arc<InboxProcessor>>,
    inbox_handle: Option<InboxProcessorHandle>,
}

/// Public entry point for the messaging core. One instance per process
/// (or per logical bounded context); cheap to clone via `Arc<HeroMessaging>`.
pub struct HeroMessaging {
    registry: Arc<Registry>,
    time_provider: Arc<dyn TimeProvider>,
    pipelines: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    lifecycle: Mutex<ProcessorLifecycle>,
}

impl HeroMessaging {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(Registry::new()),
            time_provider,
            pipelines: DashMap::new(),
            lifecycle: Mutex::new(ProcessorLifecycle {
                outbox: None,
                outbox_handle: None,
                inbox: None,
                inbox_handle: None,
            }),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn time_provider(&self) -> &Arc<dyn TimeProvider> {
        &self.time_provider
    }

    pub fn with_outbox(&self, outbox: Arc<OutboxProcessor>) {
        self.lifecycle.lock().outbox = Some(outbox);
    }

    pub fn with_inbox(&self, inbox: Arc<InboxProcessor>) {
        self.lifecycle.lock().inbox = Some(inbox);
    }

    /// Installs the fully built decorator chain for message type `T` with
    /// response type `R`. Call once per registered message type at
    /// startup, after registering its handler with [`Registry`].
    pub fn register_pipeline<T, R>(&self, pipeline: Arc<dyn Processor<T, R>>)
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.pipelines.insert(TypeId::of::<(T, R)>(), Box::new(pipeline));
    }

    fn pipeline_for<T, R>(&self) -> Option<Arc<dyn Processor<T, R>>>
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.pipelines.get(&TypeId::of::<(T, R)>()).map(|entry| {
            entry
                .downcast_ref::<Arc<dyn Processor<T, R>>>()
                .expect("pipeline type mismatch")
                .clone()
        })
    }

    /// spec.md §4.6 `send(command)`. Falls back to a bare terminal dispatch
    /// (no decorators) if no pipeline was registered for `C`, so unit tests
    /// can exercise the registry alone.
    pub async fn send<C: Command>(&self, payload: C) -> Result<C::Response, HeroMessagingError> {
        let envelope = Envelope::new(payload, self.time_provider.timestamp());
        let result = self.dispatch_command(&envelope).await;
        match result.response {
            Some(response) => Ok(response),
            None => Err(HeroMessagingError::HandlerFailed(
                std::any::type_name::<C>().to_string(),
                result.message.unwrap_or_else(|| "no response produced".to_string()),
            )),
        }
    }

    async fn dispatch_command<C: Command>(&self, envelope: &Envelope<C>) -> ProcessingResult<C::Response> {
        let cancellation = CancellationToken::new();
        match self.pipeline_for::<C, C::Response>() {
            Some(pipeline) => pipeline.process(envelope, ProcessingContext::new("command"), &cancellation).await,
            None => {
                TerminalCommandProcessor::<C>::new(self.registry.clone(), self.time_provider.clone())
                    .process(envelope, ProcessingContext::new("command"), &cancellation)
                    .await
            }
        }
    }

    pub async fn send_query<Q: Query>(&self, payload: Q) -> Result<Q::Response, HeroMessagingError> {
        let envelope = Envelope::new(payload, self.time_provider.timestamp());
        let cancellation = CancellationToken::new();
        let result = match self.pipeline_for::<Q, Q::Response>() {
            Some(pipeline) => pipeline.process(&envelope, ProcessingContext::new("query"), &cancellation).await,
            None => {
                TerminalQueryProcessor::<Q>::new(self.registry.clone(), self.time_provider.clone())
                    .process(&envelope, ProcessingContext::new("query"), &cancellation)
                    .await
            }
        };
        match result.response {
            Some(response) => Ok(response),
            None => Err(HeroMessagingError::HandlerFailed(
                std::any::type_name::<Q>().to_string(),
                result.message.unwrap_or_else(|| "no response produced".to_string()),
            )),
        }
    }

    pub async fn publish<E: Event>(&self, payload: E) -> ProcessingResult<()> {
        let envelope = Envelope::new(payload, self.time_provider.timestamp());
        let cancellation = CancellationToken::new();
        match self.pipeline_for::<E, ()>() {
            Some(pipeline) => pipeline.process(&envelope, ProcessingContext::new("event"), &cancellation).await,
            None => {
                TerminalEventProcessor::<E>::new(self.registry.clone(), self.time_provider.clone())
                    .process(&envelope, ProcessingContext::new("event"), &cancellation)
                    .await
            }
        }
    }

    /// Low-level escape hatch for message types that are neither
    /// `Command`, `Query`, nor `Event` but have a pipeline registered
    /// directly (spec.md §4.6 `enqueue`).
    pub async fn enqueue<T, R>(&self, payload: T, component: &str) -> ProcessingResult<R>
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        let envelope = Envelope::new(payload, self.time_provider.timestamp());
        let cancellation = CancellationToken::new();
        match self.pipeline_for::<T, R>() {
            Some(pipeline) => pipeline.process(&envelope, ProcessingContext::new(component), &cancellation).await,
            None => ProcessingResult::failed(
                ErrorInfo::new(ErrorKind::HandlerError, "no pipeline registered for this message type"),
                "no pipeline registered",
            ),
        }
    }

    /// spec.md §4.6 `sendBatch`: one result per input, in order.
    pub async fn send_batch<C: Command>(&self, payloads: Vec<C>) -> Vec<Result<C::Response, HeroMessagingError>> {
        let mut results = Vec::with_capacity(payloads.len());
        for payload in payloads {
            results.push(self.send(payload).await);
        }
        results
    }

    pub async fn publish_batch<E: Event>(&self, payloads: Vec<E>) -> Vec<ProcessingResult<()>> {
        let mut results = Vec::with_capacity(payloads.len());
        for payload in payloads {
            results.push(self.publish(payload).await);
        }
        results
    }

    /// Starts the background outbox/inbox processors that were wired in
    /// via `with_outbox`/`with_inbox`. Idempotent: a second call is a no-op
    /// for a processor that is already running.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(outbox) = lifecycle.outbox.clone() {
            if lifecycle.outbox_handle.is_none() {
                lifecycle.outbox_handle = Some(outbox.start());
            }
        }
        if let Some(inbox) = lifecycle.inbox.clone() {
            if lifecycle.inbox_handle.is_none() {
                lifecycle.inbox_handle = Some(inbox.start());
            }
        }
    }

    /// spec.md §4.6 shutdown: cancel, await, dispose.
    pub async fn stop(&self) {
        let (outbox_handle, inbox_handle) = {
            let mut lifecycle = self.lifecycle.lock();
            (lifecycle.outbox_handle.take(), lifecycle.inbox_handle.take())
        };
        if let Some(handle) = outbox_handle {
            handle.stop().await;
        }
        if let Some(handle) = inbox_handle {
            handle.stop().await;
        }
    }
}
